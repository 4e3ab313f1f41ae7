//! Simulated linear stage.
//!
//! Deterministic test double for the real hardware: constant-velocity motion
//! computed from `tokio::time::Instant`, so tests run under paused tokio
//! time and the whole sweep loop executes in simulated (non-wall-clock)
//! time.
//!
//! Test hooks:
//! - every issued motion command is recorded, so tests can assert that
//!   configuration errors fail before any move is sent
//! - `freeze_after` pins the reported position mid-motion while `is_busy`
//!   stays true, to exercise stall detection
//! - `with_noise` adds Gaussian-ish position read noise

use crate::core::{LinkState, MotionProfile, Stage};
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default traversal velocity when a move carries no explicit profile.
const DEFAULT_VELOCITY_MM_S: f64 = 5.0;

/// Travel limits of the simulated axis in mm.
const DEFAULT_TRAVEL_MM: (f64, f64) = (0.0, 150.0);

struct Motion {
    from_mm: f64,
    target_mm: f64,
    velocity_mm_s: f64,
    started: Instant,
}

impl Motion {
    fn duration(&self) -> Duration {
        let distance = (self.target_mm - self.from_mm).abs();
        Duration::from_secs_f64(distance / self.velocity_mm_s)
    }

    fn position_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration() {
            return self.target_mm;
        }
        let direction = (self.target_mm - self.from_mm).signum();
        self.from_mm + direction * self.velocity_mm_s * elapsed.as_secs_f64()
    }

    fn done(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration()
    }
}

/// Simulated single-axis stage with a constant-velocity motion model.
pub struct SimStage {
    id: String,
    link: LinkState,
    position_mm: f64,
    motion: Option<Motion>,
    travel_mm: (f64, f64),
    issued: Vec<String>,
    /// Pin the reported position partway into the nth move, while `is_busy`
    /// keeps reporting true.
    freeze: Option<(usize, Duration)>,
    moves_started: usize,
    frozen_at: Option<f64>,
    noise_mm: f64,
    rng: SmallRng,
}

impl SimStage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            link: LinkState::Disconnected,
            position_mm: 0.0,
            motion: None,
            travel_mm: DEFAULT_TRAVEL_MM,
            issued: Vec::new(),
            freeze: None,
            moves_started: 0,
            frozen_at: None,
            noise_mm: 0.0,
            rng: SmallRng::seed_from_u64(0x5747_4553),
        }
    }

    /// Simulate a mechanical stall: `after` into the `nth` issued move
    /// (1-based), the reported position stops changing while the axis stays
    /// busy.
    pub fn freeze_nth_move(mut self, nth: usize, after: Duration) -> Self {
        self.freeze = Some((nth, after));
        self
    }

    /// Add uniform position read noise of ±`noise_mm`.
    pub fn with_noise(mut self, noise_mm: f64) -> Self {
        self.noise_mm = noise_mm;
        self
    }

    /// Every motion command issued so far (moves and homing), in order.
    pub fn issued_commands(&self) -> &[String] {
        &self.issued
    }

    fn ensure_connected(&self) -> ScanResult<()> {
        match self.link {
            LinkState::Connected => Ok(()),
            LinkState::Disconnected => Err(ScanError::NotConnected),
            LinkState::Closed => Err(ScanError::LinkClosed),
        }
    }

    /// Advance the motion model to `now`, settling completed moves.
    fn poll(&mut self) {
        let now = Instant::now();
        if let Some(motion) = &self.motion {
            if let Some((nth, after)) = self.freeze {
                if self.frozen_at.is_none()
                    && self.moves_started == nth
                    && now.saturating_duration_since(motion.started) >= after
                {
                    self.frozen_at = Some(motion.position_at(motion.started + after));
                }
            }
            if self.frozen_at.is_some() {
                // Stalled: stays busy, position pinned.
                return;
            }
            if motion.done(now) {
                self.position_mm = motion.target_mm;
                self.motion = None;
            } else {
                self.position_mm = motion.position_at(now);
            }
        }
    }

    fn begin_motion(&mut self, target_mm: f64, profile: MotionProfile) {
        let velocity = if profile.velocity_mm_s > 0.0 {
            profile.velocity_mm_s
        } else {
            DEFAULT_VELOCITY_MM_S
        };
        self.moves_started += 1;
        self.motion = Some(Motion {
            from_mm: self.position_mm,
            target_mm,
            velocity_mm_s: velocity,
            started: Instant::now(),
        });
    }
}

#[async_trait]
impl Stage for SimStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn link_state(&self) -> LinkState {
        self.link
    }

    async fn connect(&mut self) -> ScanResult<()> {
        if self.link == LinkState::Closed {
            return Err(ScanError::LinkClosed);
        }
        self.link = LinkState::Connected;
        debug!(stage = %self.id, "sim stage connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> ScanResult<()> {
        if self.link == LinkState::Connected {
            self.link = LinkState::Disconnected;
        }
        Ok(())
    }

    async fn home(&mut self) -> ScanResult<()> {
        self.ensure_connected()?;
        self.issued.push("home".to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.motion = None;
        self.position_mm = 0.0;
        Ok(())
    }

    async fn position(&mut self) -> ScanResult<f64> {
        self.ensure_connected()?;
        self.poll();
        let pos = self.frozen_at.unwrap_or(self.position_mm);
        if self.noise_mm > 0.0 {
            let jitter = self.rng.gen_range(-self.noise_mm..=self.noise_mm);
            Ok(pos + jitter)
        } else {
            Ok(pos)
        }
    }

    async fn move_absolute(
        &mut self,
        target_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()> {
        self.ensure_connected()?;
        self.poll();
        self.issued.push(format!("move abs {target_mm}"));
        self.begin_motion(target_mm, profile);
        if wait {
            // Completion is observed through the same motion model the
            // polling path uses, so a frozen axis never "arrives".
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.poll();
                if self.motion.is_none() {
                    break;
                }
                if self.frozen_at.is_some() {
                    return Err(ScanError::Stall {
                        position_mm: self.frozen_at.unwrap_or(self.position_mm),
                        stalled_for: Duration::ZERO,
                    });
                }
            }
        }
        Ok(())
    }

    async fn move_relative(
        &mut self,
        delta_mm: f64,
        profile: MotionProfile,
        wait: bool,
    ) -> ScanResult<()> {
        self.ensure_connected()?;
        self.poll();
        let target = self.position_mm + delta_mm;
        self.issued.push(format!("move rel {delta_mm}"));
        self.begin_motion(target, profile);
        if wait {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.poll();
                if self.motion.is_none() {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn is_busy(&mut self) -> ScanResult<bool> {
        self.ensure_connected()?;
        self.poll();
        Ok(self.motion.is_some())
    }

    async fn stop_motion(&mut self) -> ScanResult<()> {
        self.ensure_connected()?;
        self.poll();
        if let Some(frozen) = self.frozen_at.take() {
            self.position_mm = frozen;
        }
        self.motion = None;
        Ok(())
    }

    fn travel_range(&self) -> (f64, f64) {
        self.travel_mm
    }
}
