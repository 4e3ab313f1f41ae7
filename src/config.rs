//! Configuration system using Figment.
//!
//! Strongly-typed settings loaded from:
//! 1. built-in defaults
//! 2. a TOML file (see `config/stagesync.toml`)
//! 3. environment variables prefixed with `STAGESYNC_` (double underscore
//!    between nesting levels, e.g. `STAGESYNC_SWEEP__PITCH_UM=25`)
//!
//! Values that passed parsing are validated separately (`validate`), so
//! semantically invalid settings fail before any motion starts.

use crate::core::{ConnectTarget, MotionProfile};
use crate::error::{ScanError, ScanResult};
use crate::sweep::{OscillationSpec, SamplingSpec, SweepConfig};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub connection: ConnectionSettings,
    pub stage: StageSettings,
    pub sweep: SweepSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Stage addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Addressing mode and target.
    #[serde(flatten)]
    pub target: ConnectTarget,
    /// Gateway host:port, required for the cloud mode.
    pub gateway: Option<String>,
    /// Serial baud rate (serial mode only).
    pub baud: u32,
}

/// Stage driver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSettings {
    /// Device units per mm (also covers generic/rotary-as-linear mappings).
    pub unit_scale: f64,
    /// Traversal velocity in mm/s (0.0 = device default).
    pub velocity_mm_s: f64,
    /// Acceleration in mm/s² (0.0 = device default).
    pub acceleration_mm_s2: f64,
}

/// Sweep parameters. Pitch is configured in µm, the unit operators think
/// in; everything internal is mm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    pub lower_mm: f64,
    pub upper_mm: f64,
    pub pitch_um: f64,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub stall_grace: Duration,
    /// Full cycles to run; unset oscillates until cancelled.
    pub cycles: Option<u32>,
    /// Overall runtime guard.
    #[serde(default, with = "humantime_serde")]
    pub max_runtime: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings {
                log_level: "info".to_string(),
            },
            connection: ConnectionSettings {
                target: ConnectTarget::Serial("/dev/ttyUSB0".to_string()),
                gateway: None,
                baud: 115_200,
            },
            stage: StageSettings {
                unit_scale: 1000.0,
                velocity_mm_s: 1.0,
                acceleration_mm_s2: 0.0,
            },
            sweep: SweepSettings {
                lower_mm: 10.0,
                upper_mm: 12.0,
                pitch_um: 10.0,
                poll_interval: Duration::from_millis(5),
                stall_grace: Duration::from_millis(250),
                cycles: Some(1),
                max_runtime: Some(Duration::from_secs(300)),
            },
        }
    }
}

impl Settings {
    /// Load defaults, then the TOML file (if present), then environment
    /// overrides with prefix `STAGESYNC_`.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> ScanResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        // Double underscore separates nesting levels, so field names that
        // themselves contain underscores survive (STAGESYNC_SWEEP__PITCH_UM).
        let settings: Settings = figment
            .merge(Env::prefixed("STAGESYNC_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing catches.
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "invalid log_level '{}', must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        if !(self.stage.unit_scale.is_finite() && self.stage.unit_scale > 0.0) {
            return Err(ScanError::Configuration(format!(
                "unit_scale must be a positive finite number, got {}",
                self.stage.unit_scale
            )));
        }
        if matches!(self.connection.target, ConnectTarget::Cloud(_))
            && self.connection.gateway.is_none()
        {
            return Err(ScanError::Configuration(
                "cloud connection mode requires a gateway".to_string(),
            ));
        }
        self.sweep_config().validate_parameters()
    }

    /// The cloud device identifier, if the cloud mode is configured.
    pub fn cloud_device(&self) -> Option<Uuid> {
        match self.connection.target {
            ConnectTarget::Cloud(id) => Some(id),
            ConnectTarget::Serial(_) => None,
        }
    }

    /// Motion profile for sweep legs.
    pub fn motion_profile(&self) -> MotionProfile {
        MotionProfile {
            velocity_mm_s: self.stage.velocity_mm_s,
            acceleration_mm_s2: self.stage.acceleration_mm_s2,
        }
    }

    /// Assemble the runner configuration.
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            oscillation: OscillationSpec {
                lower_mm: self.sweep.lower_mm,
                upper_mm: self.sweep.upper_mm,
                profile: self.motion_profile(),
                cycles: self.sweep.cycles,
            },
            sampling: SamplingSpec {
                pitch_mm: self.sweep.pitch_um / 1000.0,
                poll_interval: self.sweep.poll_interval,
                stall_grace: self.sweep.stall_grace,
            },
            max_runtime: self.sweep.max_runtime,
        }
    }
}

impl SweepConfig {
    /// Parameter-only validation (travel limits are checked against the
    /// stage at run time).
    pub fn validate_parameters(&self) -> ScanResult<()> {
        self.sampling.validate()?;
        self.oscillation.validate()?;
        self.sampling
            .check_poll_rate(self.oscillation.profile.velocity_mm_s)
    }
}
