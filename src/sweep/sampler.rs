//! Position-synchronized sampler.
//!
//! The core algorithm: given a target pitch and a continuously moving axis
//! polled at some interval, decide when a capture happened and at what
//! position. The axis never stops at capture points, so the true pitch
//! crossing always falls between two polls; the sampler records the
//! interpolated crossing (reference ± pitch, with a timestamp interpolated
//! between the two poll points) and advances its reference to that crossing.
//! Residual travel past the crossing is therefore neither lost nor counted
//! twice, which keeps spacing error bounded by the inter-poll distance
//! instead of accumulating across captures.
//!
//! Stall detection rides along: if the axis claims busy but the position has
//! not changed for longer than the grace window, the sampler surfaces
//! [`ScanError::Stall`] instead of emitting zero-distance captures.

use crate::capture::SampleRecord;
use crate::error::{ScanError, ScanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Smallest accepted pitch: 1 µm.
pub const MIN_PITCH_MM: f64 = 1e-3;
/// Largest accepted pitch: 100 µm.
pub const MAX_PITCH_MM: f64 = 0.1;

/// Tolerance applied to the pitch threshold, absorbing float accumulation
/// across hundreds of captures.
const PITCH_EPS_MM: f64 = 1e-9;

/// Position change below this counts as "stationary" for stall detection.
const STALL_EPS_MM: f64 = 1e-6;

/// Sampling parameters for one sweep.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplingSpec {
    /// Target spacing between consecutive captures, in mm.
    pub pitch_mm: f64,
    /// Scheduler tick interval.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long the axis may report busy without position change before a
    /// stall is raised.
    #[serde(with = "humantime_serde")]
    pub stall_grace: Duration,
}

impl SamplingSpec {
    /// Reject out-of-range parameters before any motion starts.
    pub fn validate(&self) -> ScanResult<()> {
        if !self.pitch_mm.is_finite() || self.pitch_mm <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "pitch must be positive, got {} mm",
                self.pitch_mm
            )));
        }
        if self.pitch_mm < MIN_PITCH_MM - PITCH_EPS_MM
            || self.pitch_mm > MAX_PITCH_MM + PITCH_EPS_MM
        {
            return Err(ScanError::Configuration(format!(
                "pitch {} mm outside supported range [{} mm, {} mm]",
                self.pitch_mm, MIN_PITCH_MM, MAX_PITCH_MM
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ScanError::Configuration(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.stall_grace.is_zero() {
            return Err(ScanError::Configuration(
                "stall grace must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the poll interval against the expected sweep velocity.
    ///
    /// The distance traveled per tick must stay below the pitch or crossings
    /// get skipped outright; above half the pitch the interpolation error
    /// budget is already thin, which is worth a warning.
    pub fn check_poll_rate(&self, velocity_mm_s: f64) -> ScanResult<()> {
        if velocity_mm_s <= 0.0 {
            // Device-default velocity; nothing to derive from.
            return Ok(());
        }
        let per_tick_mm = velocity_mm_s * self.poll_interval.as_secs_f64();
        if per_tick_mm > self.pitch_mm {
            return Err(ScanError::Configuration(format!(
                "poll interval too coarse: {:.4} mm of travel per tick exceeds the {:.4} mm pitch",
                per_tick_mm, self.pitch_mm
            )));
        }
        if per_tick_mm > self.pitch_mm / 2.0 {
            warn!(
                per_tick_mm,
                pitch_mm = self.pitch_mm,
                "travel per poll tick exceeds half the pitch; spacing error will be coarse"
            );
        }
        Ok(())
    }
}

/// One (position, time) pair from the polling loop.
#[derive(Clone, Copy, Debug)]
struct PollPoint {
    position_mm: f64,
    at: DateTime<Utc>,
}

/// Pitch-crossing detector over asynchronous position polls.
pub struct PitchSampler {
    spec: SamplingSpec,
    /// Position of the last accepted capture (or the sampling start).
    reference_mm: f64,
    prev: PollPoint,
    frame: u64,
    stall_anchor_mm: f64,
    stall_anchor_at: Instant,
}

impl PitchSampler {
    /// Start sampling at the given position. The first capture fires one
    /// pitch of travel later.
    pub fn new(spec: SamplingSpec, start_mm: f64, started_at: DateTime<Utc>) -> Self {
        Self {
            spec,
            reference_mm: start_mm,
            prev: PollPoint {
                position_mm: start_mm,
                at: started_at,
            },
            frame: 0,
            stall_anchor_mm: start_mm,
            stall_anchor_at: Instant::now(),
        }
    }

    /// Frames accepted so far.
    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// Feed one poll into the sampler.
    ///
    /// Returns the captures accepted within this tick (possibly several if
    /// polling fell behind, each at its own interpolated crossing), or
    /// `ScanError::Stall` once the axis has been busy-but-stationary beyond
    /// the grace window.
    pub fn observe(
        &mut self,
        position_mm: f64,
        at: DateTime<Utc>,
        now: Instant,
        busy: bool,
    ) -> ScanResult<Vec<SampleRecord>> {
        if (position_mm - self.stall_anchor_mm).abs() > STALL_EPS_MM {
            self.stall_anchor_mm = position_mm;
            self.stall_anchor_at = now;
        } else if busy {
            let stationary_for = now.saturating_duration_since(self.stall_anchor_at);
            if stationary_for >= self.spec.stall_grace {
                return Err(ScanError::Stall {
                    position_mm,
                    stalled_for: stationary_for,
                });
            }
        }

        let prev = self.prev;
        self.prev = PollPoint { position_mm, at };

        let mut captures = Vec::new();
        loop {
            let traveled = position_mm - self.reference_mm;
            if traveled.abs() < self.spec.pitch_mm - PITCH_EPS_MM {
                break;
            }
            let crossing_mm = self.reference_mm + self.spec.pitch_mm * traveled.signum();
            let timestamp = interpolate_timestamp(&prev, position_mm, at, crossing_mm);
            self.frame += 1;
            captures.push(SampleRecord {
                frame: self.frame,
                timestamp,
                position_mm: crossing_mm,
            });
            self.reference_mm = crossing_mm;
        }
        Ok(captures)
    }

    /// Rebase the reference at a direction reversal so residual travel from
    /// the previous leg cannot fold into the next one.
    pub fn reset_reference(&mut self, position_mm: f64, at: DateTime<Utc>, now: Instant) {
        self.reference_mm = position_mm;
        self.prev = PollPoint { position_mm, at };
        self.stall_anchor_mm = position_mm;
        self.stall_anchor_at = now;
    }
}

/// Linear time interpolation between the two poll points bracketing a
/// crossing.
fn interpolate_timestamp(
    prev: &PollPoint,
    position_mm: f64,
    at: DateTime<Utc>,
    crossing_mm: f64,
) -> DateTime<Utc> {
    let span_mm = position_mm - prev.position_mm;
    if span_mm.abs() < f64::EPSILON {
        return at;
    }
    let fraction = ((crossing_mm - prev.position_mm) / span_mm).clamp(0.0, 1.0);
    let span_us = (at - prev.at).num_microseconds().unwrap_or(0) as f64;
    prev.at + chrono::Duration::microseconds((span_us * fraction) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pitch_mm: f64) -> SamplingSpec {
        SamplingSpec {
            pitch_mm,
            poll_interval: Duration::from_millis(5),
            stall_grace: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_pitch_range_validation() {
        assert!(spec(0.010).validate().is_ok());
        assert!(spec(MIN_PITCH_MM).validate().is_ok());
        assert!(spec(MAX_PITCH_MM).validate().is_ok());

        for bad in [0.0, -0.5, 0.5e-3, 0.2, f64::NAN] {
            assert!(
                matches!(spec(bad).validate(), Err(ScanError::Configuration(_))),
                "pitch {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_poll_rate_check() {
        // 1 mm/s * 5 ms = 5 µm per tick, pitch 10 µm: fine.
        assert!(spec(0.010).check_poll_rate(1.0).is_ok());
        // 1 mm/s * 5 ms = 5 µm per tick, pitch 1 µm: crossings skipped.
        assert!(matches!(
            spec(0.001).check_poll_rate(1.0),
            Err(ScanError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_captures_at_interpolated_crossings() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 10.0, t0);

        // 4 µm per tick: crossings land between polls.
        let mut captures = Vec::new();
        for i in 1..=6 {
            let pos = 10.0 + 0.004 * i as f64;
            let at = t0 + chrono::Duration::milliseconds(5 * i);
            captures.extend(sampler.observe(pos, at, Instant::now(), true).unwrap());
        }

        // Travel 24 µm -> crossings at 10.010 and 10.020.
        assert_eq!(captures.len(), 2);
        assert!((captures[0].position_mm - 10.010).abs() < 1e-9);
        assert!((captures[1].position_mm - 10.020).abs() < 1e-9);
        assert_eq!(captures[0].frame, 1);
        assert_eq!(captures[1].frame, 2);

        // First crossing at 10.010 fell halfway through the third tick
        // (10.008 -> 10.012), so its timestamp interpolates to 12.5 ms.
        let dt = (captures[0].timestamp - t0).num_microseconds().unwrap();
        assert!((dt - 12_500).abs() <= 1, "interpolated to {dt} µs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_residual_travel_not_lost() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 0.0, t0);

        // One coarse poll crossing two pitches at once.
        let records = sampler
            .observe(0.025, t0 + chrono::Duration::milliseconds(5), Instant::now(), true)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!((records[0].position_mm - 0.010).abs() < 1e-9);
        assert!((records[1].position_mm - 0.020).abs() < 1e-9);

        // The 5 µm residual carries into the next tick.
        let records = sampler
            .observe(0.030, t0 + chrono::Duration::milliseconds(10), Instant::now(), true)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].position_mm - 0.030).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_direction_captures() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 12.0, t0);

        let records = sampler
            .observe(11.988, t0 + chrono::Duration::milliseconds(5), Instant::now(), true)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].position_mm - 11.990).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversal_reset_prevents_cross_leg_delta() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 11.985, t0);

        // Approach the 12.0 bound.
        let records = sampler
            .observe(11.996, t0, Instant::now(), true)
            .unwrap();
        assert_eq!(records.len(), 1); // 11.995

        // Arrive and reverse; reference rebases at the bound.
        sampler.reset_reference(12.0, t0, Instant::now());

        // 6 µm back from the bound: no capture yet (would have been one
        // without the reset, folding both legs together).
        let records = sampler
            .observe(11.994, t0, Instant::now(), true)
            .unwrap();
        assert!(records.is_empty());

        let records = sampler
            .observe(11.989, t0, Instant::now(), true)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].position_mm - 11.990).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_detection_after_grace() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 5.0, t0);

        // Moving normally.
        sampler.observe(5.004, t0, Instant::now(), true).unwrap();

        // Position pinned while busy: tolerated inside the grace window.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sampler.observe(5.004, t0, Instant::now(), true).is_ok());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = sampler.observe(5.004, t0, Instant::now(), true);
        assert!(matches!(result, Err(ScanError::Stall { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stationary_axis_is_not_a_stall() {
        let t0 = Utc::now();
        let mut sampler = PitchSampler::new(spec(0.010), 5.0, t0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Not busy: settled at an endpoint, no stall and no captures.
        let records = sampler.observe(5.0, t0, Instant::now(), false).unwrap();
        assert!(records.is_empty());
    }
}
