//! Zaber-style ASCII protocol stage driver.
//!
//! Speaks the single-device, single-axis subset of the Zaber ASCII protocol
//! over any [`Transport`]. All wire-format knowledge lives here; the rest of
//! the crate only sees the [`Stage`] and [`PositionTrigger`] capability
//! traits.
//!
//! ## Protocol
//!
//! Requests are `/`-prefixed command lines; every request gets one reply:
//!
//! ```text
//! /get pos          ->  @01 0 OK IDLE -- 252734
//! /move abs 300000  ->  @01 0 OK BUSY -- 0
//! /home             ->  @01 0 OK BUSY WR 0
//! ```
//!
//! Reply fields: address, axis, accept flag (`OK`/`RJ`), motion status
//! (`IDLE`/`BUSY`), warning flags, data. Positions on the wire are device
//! units; `unit_scale` (units per mm) converts to the caller's mm frame and
//! also supports generic/rotary-as-linear mappings.

use crate::core::{ConnectTarget, LinkState, MotionProfile, PositionTrigger, Stage};
use crate::error::{ScanError, ScanResult};
use crate::transport::Transport;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Default device resolution for the X-LRQ family: 1000 units per mm.
pub const DEFAULT_UNIT_SCALE: f64 = 1000.0;

/// Travel limits of the X-LRQ150 stage in mm.
pub const DEFAULT_TRAVEL_MM: (f64, f64) = (0.0, 150.0);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const WAIT_DEADLINE: Duration = Duration::from_secs(120);

/// Parsed device reply.
#[derive(Debug)]
struct Reply {
    accepted: bool,
    busy: bool,
    data: String,
}

/// Single-axis Zaber-style stage over a line transport.
pub struct ZaberStage {
    id: String,
    target: ConnectTarget,
    transport: Box<dyn Transport>,
    link: LinkState,
    unit_scale: f64,
    travel_mm: (f64, f64),
}

impl ZaberStage {
    /// Create a driver for the given target over the given transport.
    ///
    /// Fails fast with `Configuration` if `unit_scale` is not positive.
    pub fn new(
        id: impl Into<String>,
        target: ConnectTarget,
        transport: Box<dyn Transport>,
        unit_scale: f64,
    ) -> ScanResult<Self> {
        if !(unit_scale.is_finite() && unit_scale > 0.0) {
            return Err(ScanError::Configuration(format!(
                "unit scale must be a positive finite number, got {unit_scale}"
            )));
        }
        Ok(Self {
            id: id.into(),
            target,
            transport,
            link: LinkState::Disconnected,
            unit_scale,
            travel_mm: DEFAULT_TRAVEL_MM,
        })
    }

    /// Override the travel limits (mm).
    pub fn with_travel_range(mut self, min_mm: f64, max_mm: f64) -> Self {
        self.travel_mm = (min_mm, max_mm);
        self
    }

    /// Permanently shut the link down. Further operations, including
    /// `connect`, are rejected.
    pub async fn close(&mut self) -> ScanResult<()> {
        if self.link == LinkState::Connected {
            self.transport.close().await?;
        }
        self.link = LinkState::Closed;
        Ok(())
    }

    fn ensure_connected(&self) -> ScanResult<()> {
        match self.link {
            LinkState::Connected => Ok(()),
            LinkState::Disconnected => Err(ScanError::NotConnected),
            LinkState::Closed => Err(ScanError::LinkClosed),
        }
    }

    fn mm_to_units(&self, mm: f64) -> i64 {
        (mm * self.unit_scale).round() as i64
    }

    fn units_to_mm(&self, units: f64) -> f64 {
        units / self.unit_scale
    }

    fn parse_reply(line: &str) -> ScanResult<Reply> {
        let mut fields = line.split_whitespace();
        let addr = fields
            .next()
            .ok_or_else(|| ScanError::Protocol("empty reply".to_string()))?;
        if !addr.starts_with('@') {
            return Err(ScanError::Protocol(format!("malformed reply: '{line}'")));
        }
        let _axis = fields.next();
        let flag = fields
            .next()
            .ok_or_else(|| ScanError::Protocol(format!("reply missing accept flag: '{line}'")))?;
        let status = fields
            .next()
            .ok_or_else(|| ScanError::Protocol(format!("reply missing status: '{line}'")))?;
        let _warnings = fields.next();
        let data = fields.collect::<Vec<_>>().join(" ");

        Ok(Reply {
            accepted: flag == "OK",
            busy: status == "BUSY",
            data,
        })
    }

    /// Send a command and parse the single reply line, rejecting `RJ`.
    async fn command(&mut self, command: &str) -> ScanResult<Reply> {
        self.ensure_connected()?;
        let line = self.transport.query(command).await?;
        let reply = Self::parse_reply(&line)?;
        if !reply.accepted {
            return Err(ScanError::Protocol(format!(
                "device rejected '{command}': '{line}'"
            )));
        }
        Ok(reply)
    }

    /// Poll the device status until the axis goes idle.
    async fn wait_idle(&mut self) -> ScanResult<()> {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        loop {
            if !self.is_busy().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ScanError::Timeout(WAIT_DEADLINE));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Push non-default velocity/acceleration setpoints to the device.
    async fn apply_profile(&mut self, profile: MotionProfile) -> ScanResult<()> {
        if profile.velocity_mm_s > 0.0 {
            let units = self.mm_to_units(profile.velocity_mm_s);
            self.command(&format!("/set maxspeed {units}")).await?;
        }
        if profile.acceleration_mm_s2 > 0.0 {
            let units = self.mm_to_units(profile.acceleration_mm_s2);
            self.command(&format!("/set accel {units}")).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for ZaberStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn link_state(&self) -> LinkState {
        self.link
    }

    async fn connect(&mut self) -> ScanResult<()> {
        match self.link {
            LinkState::Connected => return Ok(()),
            LinkState::Closed => return Err(ScanError::LinkClosed),
            LinkState::Disconnected => {}
        }

        self.transport.open().await.map_err(|err| {
            ScanError::Connection(format!("cannot reach {}: {err:#}", self.target))
        })?;

        // Identify the device before declaring the link up.
        let line = self.transport.query("/").await.map_err(|err| {
            ScanError::Connection(format!("no response from {}: {err:#}", self.target))
        })?;
        let reply = Self::parse_reply(&line)?;
        if !reply.accepted {
            return Err(ScanError::Connection(format!(
                "no device identified at {}: '{line}'",
                self.target
            )));
        }

        self.link = LinkState::Connected;
        info!(stage = %self.id, target = %self.target, "stage connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> ScanResult<()> {
        if self.link == LinkState::Connected {
            self.transport.close().await?;
            info!(stage = %self.id, "stage disconnected");
        }
        if self.link != LinkState::Closed {
            self.link = LinkState::Disconnected;
        }
        Ok(())
    }

    async fn home(&mut self) -> ScanResult<()> {
        self.command("/home").await?;
        info!(stage = %self.id, "homing");
        self.wait_idle().await
    }

    async fn position(&mut self) -> ScanResult<f64> {
        let reply = self.command("/get pos").await?;
        let units: f64 = reply.data.trim().parse().map_err(|_| {
            ScanError::Protocol(format!("unparseable position response: '{}'", reply.data))
        })?;
        Ok(self.units_to_mm(units))
    }

    async fn move_absolute(
        &mut self,
        target_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()> {
        self.apply_profile(profile).await?;
        let units = self.mm_to_units(target_mm);
        self.command(&format!("/move abs {units}")).await?;
        debug!(stage = %self.id, target_mm, wait, "move absolute issued");
        if wait {
            self.wait_idle().await?;
        }
        Ok(())
    }

    async fn move_relative(
        &mut self,
        delta_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()> {
        self.apply_profile(profile).await?;
        let units = self.mm_to_units(delta_mm);
        self.command(&format!("/move rel {units}")).await?;
        debug!(stage = %self.id, delta_mm, wait, "move relative issued");
        if wait {
            self.wait_idle().await?;
        }
        Ok(())
    }

    async fn is_busy(&mut self) -> ScanResult<bool> {
        let reply = self.command("/").await?;
        Ok(reply.busy)
    }

    async fn stop_motion(&mut self) -> ScanResult<()> {
        self.command("/stop").await?;
        info!(stage = %self.id, "stop issued");
        Ok(())
    }

    fn travel_range(&self) -> (f64, f64) {
        self.travel_mm
    }
}

#[async_trait]
impl PositionTrigger for ZaberStage {
    async fn configure_position_trigger(
        &mut self,
        pitch_mm: f64,
        output_channel: u8,
    ) -> ScanResult<()> {
        if !(pitch_mm.is_finite() && pitch_mm > 0.0) {
            return Err(ScanError::Configuration(format!(
                "trigger pitch must be positive, got {pitch_mm}"
            )));
        }
        let units = self.mm_to_units(pitch_mm);
        self.command(&format!("/trigger 1 when 1 dist {units}"))
            .await?;
        // 50 ms low-high-low pulse on the digital output.
        self.command(&format!(
            "/trigger 1 action a io set do {output_channel} 1 schedule 50 0"
        ))
        .await?;
        info!(stage = %self.id, pitch_mm, output_channel, "position trigger armed");
        Ok(())
    }

    async fn enable_trigger(&mut self, count: Option<u32>) -> ScanResult<()> {
        match count {
            Some(n) => self.command(&format!("/trigger 1 enable {n}")).await?,
            None => self.command("/trigger 1 enable").await?,
        };
        Ok(())
    }

    async fn disable_trigger(&mut self) -> ScanResult<()> {
        self.command("/trigger 1 disable").await?;
        Ok(())
    }
}
