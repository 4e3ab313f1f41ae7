//! Oscillation driver state machine.
//!
//! Sweeps the axis between two bounds, reversing at each arrival:
//! `Idle → MovingToUpper ⇄ MovingToLower → Stopped`. The machine itself is
//! pure; the sweep loop issues the non-blocking moves it decides on and
//! reports arrivals back via [`Oscillator::on_arrival`].

use crate::core::MotionProfile;
use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};

/// Bounds and motion parameters for one oscillation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OscillationSpec {
    /// Lower sweep bound in mm.
    pub lower_mm: f64,
    /// Upper sweep bound in mm.
    pub upper_mm: f64,
    /// Velocity/acceleration for every leg; direction flips implicitly.
    pub profile: MotionProfile,
    /// Full cycles (lower→upper→lower) to run; `None` oscillates until
    /// cancelled.
    pub cycles: Option<u32>,
}

impl OscillationSpec {
    /// Reject inverted/degenerate bounds before any motion starts.
    pub fn validate(&self) -> ScanResult<()> {
        if !(self.lower_mm.is_finite() && self.upper_mm.is_finite()) {
            return Err(ScanError::Configuration(
                "oscillation bounds must be finite".to_string(),
            ));
        }
        if self.lower_mm >= self.upper_mm {
            return Err(ScanError::Configuration(format!(
                "lower bound {} mm must be below upper bound {} mm",
                self.lower_mm, self.upper_mm
            )));
        }
        if self.cycles == Some(0) {
            return Err(ScanError::Configuration(
                "cycle count must be at least 1 (or unset for unbounded)".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the bounds against the device travel limits.
    pub fn validate_within(&self, travel_mm: (f64, f64)) -> ScanResult<()> {
        self.validate()?;
        let (min, max) = travel_mm;
        if self.lower_mm < min || self.upper_mm > max {
            return Err(ScanError::Configuration(format!(
                "bounds [{}, {}] mm outside device travel [{}, {}] mm",
                self.lower_mm, self.upper_mm, min, max
            )));
        }
        Ok(())
    }
}

/// Oscillator lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OscState {
    Idle,
    MovingToUpper,
    MovingToLower,
    Stopped,
}

/// Outcome of an arrival at a bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arrival {
    /// Reverse: the axis is at `at_mm`, next leg targets `next_target_mm`.
    Reversal { at_mm: f64, next_target_mm: f64 },
    /// Configured cycle count reached; the run is over.
    Finished,
}

/// State machine driving the back-and-forth sweep.
pub struct Oscillator {
    spec: OscillationSpec,
    state: OscState,
    legs_done: u32,
}

impl Oscillator {
    pub fn new(spec: OscillationSpec) -> Self {
        Self {
            spec,
            state: OscState::Idle,
            legs_done: 0,
        }
    }

    pub fn state(&self) -> OscState {
        self.state
    }

    /// Completed legs (two per cycle).
    pub fn legs_done(&self) -> u32 {
        self.legs_done
    }

    /// Target of the leg currently in flight, if any.
    pub fn current_target(&self) -> Option<f64> {
        match self.state {
            OscState::MovingToUpper => Some(self.spec.upper_mm),
            OscState::MovingToLower => Some(self.spec.lower_mm),
            OscState::Idle | OscState::Stopped => None,
        }
    }

    /// Begin the first leg (from the lower bound toward the upper); returns
    /// its target.
    pub fn begin(&mut self) -> f64 {
        self.state = OscState::MovingToUpper;
        self.spec.upper_mm
    }

    /// The axis went idle at a bound; decide the reversal or finish.
    pub fn on_arrival(&mut self) -> Arrival {
        match self.state {
            OscState::MovingToUpper => {
                self.legs_done += 1;
                self.state = OscState::MovingToLower;
                Arrival::Reversal {
                    at_mm: self.spec.upper_mm,
                    next_target_mm: self.spec.lower_mm,
                }
            }
            OscState::MovingToLower => {
                self.legs_done += 1;
                // Cycles complete only at the lower bound.
                if let Some(cycles) = self.spec.cycles {
                    if self.legs_done >= cycles * 2 {
                        self.state = OscState::Stopped;
                        return Arrival::Finished;
                    }
                }
                self.state = OscState::MovingToUpper;
                Arrival::Reversal {
                    at_mm: self.spec.lower_mm,
                    next_target_mm: self.spec.upper_mm,
                }
            }
            OscState::Idle | OscState::Stopped => Arrival::Finished,
        }
    }

    /// External stop request.
    pub fn stop(&mut self) {
        self.state = OscState::Stopped;
    }
}
