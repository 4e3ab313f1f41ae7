//! Core traits and data types for position-synchronized capture.
//!
//! This module defines the foundational abstractions shared by the stage
//! drivers, the sweep loop, and the capture sink:
//!
//! - [`Stage`]: capability trait for a single-axis linear stage with
//!   explicit link lifecycle management
//! - [`PositionTrigger`]: optional capability for stages that can pulse a
//!   hardware output every fixed distance of travel
//! - [`FrameTrigger`]: the camera boundary; the sweep loop only signals
//!   `capture()`, producing and storing the image is the collaborator's
//!   business
//! - [`LinkState`] / [`MotionProfile`] / [`ConnectTarget`]: shared value
//!   types
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` so drivers can be moved across async
//! tasks. The sweep loop itself is single-threaded cooperative polling; no
//! trait method is expected to be called concurrently on one instance.

use crate::error::ScanResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage link lifecycle.
///
/// Every [`Stage`] operation other than `connect` is rejected outside
/// `Connected` with a typed error, so callers can recover programmatically.
/// `Closed` is terminal: the link has released its transport for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No transport session; `connect` may (re-)establish one.
    Disconnected,
    /// Transport session established and a device identified.
    Connected,
    /// Link permanently shut down.
    Closed,
}

/// Velocity/acceleration setpoints for a motion command.
///
/// A value of `0.0` means "use the device default", matching the convention
/// of the stage's native move commands.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    /// Traversal velocity in mm/s (0.0 = device default)
    pub velocity_mm_s: f64,
    /// Acceleration in mm/s² (0.0 = device default)
    pub acceleration_mm_s2: f64,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            velocity_mm_s: 0.0,
            acceleration_mm_s2: 0.0,
        }
    }
}

impl MotionProfile {
    /// Profile with an explicit velocity and default acceleration.
    pub fn with_velocity(velocity_mm_s: f64) -> Self {
        Self {
            velocity_mm_s,
            acceleration_mm_s2: 0.0,
        }
    }
}

/// Stage addressing modes.
///
/// The underlying protocol and device enumeration belong to the driver; the
/// rest of the crate only carries this opaque target around.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "target", rename_all = "snake_case")]
pub enum ConnectTarget {
    /// Local serial-style port identifier, e.g. `/dev/ttyUSB0` or `COM4`.
    Serial(String),
    /// Cloud/network device identifier (virtual device or IoT relay).
    Cloud(Uuid),
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectTarget::Serial(port) => write!(f, "serial:{port}"),
            ConnectTarget::Cloud(id) => write!(f, "cloud:{id}"),
        }
    }
}

/// Single-axis linear stage capability trait.
///
/// The sweep loop works against this trait for hardware-agnostic motion
/// logic; `stage::zaber` speaks a real wire protocol and `stage::sim` is
/// the deterministic test double.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage identifier for logging.
    fn id(&self) -> &str;

    /// Current link lifecycle state.
    fn link_state(&self) -> LinkState;

    /// Establish the transport session and identify the axis.
    ///
    /// Idempotent after `disconnect`: calling again re-establishes the link.
    async fn connect(&mut self) -> ScanResult<()>;

    /// Release the transport session. Subsequent operations fail with
    /// `NotConnected` rather than silently no-op.
    async fn disconnect(&mut self) -> ScanResult<()>;

    /// Run the homing sequence; blocks until homing completes.
    async fn home(&mut self) -> ScanResult<()>;

    /// Current axis position in mm, scaled by the configured unit scale.
    ///
    /// Safe to call while the axis is moving (non-blocking read).
    async fn position(&mut self) -> ScanResult<f64>;

    /// Issue an absolute move. With `wait` the call blocks until the motion
    /// completes; otherwise it returns immediately and the caller polls
    /// `is_busy()`/`position()`.
    async fn move_absolute(
        &mut self,
        target_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()>;

    /// Issue a relative move; see [`Stage::move_absolute`] for `wait`.
    async fn move_relative(
        &mut self,
        delta_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()>;

    /// True while the axis is executing a motion command.
    async fn is_busy(&mut self) -> ScanResult<bool>;

    /// Decelerate and stop the axis.
    async fn stop_motion(&mut self) -> ScanResult<()>;

    /// Device travel limits (min_mm, max_mm).
    fn travel_range(&self) -> (f64, f64);
}

/// Optional capability: distance-based hardware trigger output.
///
/// Stages with trigger engines can pulse a digital output every fixed
/// increment of travel, replacing the software-timed path entirely. The raw
/// trigger command protocol stays inside the implementing driver.
#[async_trait]
pub trait PositionTrigger: Send + Sync {
    /// Arm a trigger that pulses `output_channel` every `pitch_mm` of travel.
    async fn configure_position_trigger(
        &mut self,
        pitch_mm: f64,
        output_channel: u8,
    ) -> ScanResult<()>;

    /// Enable the armed trigger, optionally for a bounded number of firings.
    async fn enable_trigger(&mut self, count: Option<u32>) -> ScanResult<()>;

    /// Disable the trigger.
    async fn disable_trigger(&mut self) -> ScanResult<()>;
}

/// Camera boundary.
///
/// The sweep loop only signals that an exposure should happen now; the
/// collaborator owns sensor readout and image storage.
#[async_trait]
pub trait FrameTrigger: Send + Sync {
    /// Request one capture.
    async fn capture(&mut self) -> ScanResult<()>;
}
