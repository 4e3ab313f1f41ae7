//! The sweep run loop.
//!
//! Single-threaded cooperative polling on the caller's task: issue the next
//! oscillation leg as a non-blocking move, then tick at the configured poll
//! interval, feeding each (position, busy) poll into the sampler and firing
//! the camera for every accepted crossing. Cancellation is a watch-channel
//! flag checked every tick; runtime failures get a best-effort
//! stop/disconnect and the partial capture series stays with the caller.

pub mod oscillator;
pub mod sampler;

pub use oscillator::{Arrival, OscState, OscillationSpec, Oscillator};
pub use sampler::{PitchSampler, SamplingSpec, MAX_PITCH_MM, MIN_PITCH_MM};

use crate::capture::CaptureSeries;
use crate::core::{FrameTrigger, Stage};
use crate::error::{ScanError, ScanResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An idle axis this far from its leg target is treated as a failed move
/// rather than an arrival.
const ARRIVAL_TOL_MM: f64 = 0.01;

/// Everything one sweep needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    pub oscillation: OscillationSpec,
    pub sampling: SamplingSpec,
    /// Overall runtime guard; the sweep aborts with `Timeout` past this.
    #[serde(default, with = "humantime_serde")]
    pub max_runtime: Option<Duration>,
}

impl SweepConfig {
    /// Fail fast on invalid parameters, before any move is issued.
    pub fn validate(&self, travel_mm: (f64, f64)) -> ScanResult<()> {
        self.sampling.validate()?;
        self.oscillation.validate_within(travel_mm)?;
        self.sampling
            .check_poll_rate(self.oscillation.profile.velocity_mm_s)?;
        Ok(())
    }
}

/// How a sweep ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Configured cycle count completed.
    Completed,
    /// Cooperative stop honored; the partial series is valid.
    Cancelled,
}

/// Result of a finished sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepSummary {
    pub termination: Termination,
    /// Frames accepted over the whole run.
    pub frames: u64,
    /// Total loop runtime.
    pub elapsed: Duration,
}

/// Cooperative stop signal for a running sweep.
#[derive(Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Request the sweep to stop at its next tick.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a stop handle and the receiver half for [`run_sweep`].
pub fn stop_channel() -> (StopHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, rx)
}

/// Run one position-synchronized sweep.
///
/// Moves the stage to the lower bound, then oscillates between the bounds
/// while sampling pitch crossings. Accepted crossings trigger `camera` and
/// are appended to `series`; the series lives outside the runner so a
/// partial result survives every failure path.
pub async fn run_sweep<S, C>(
    stage: &mut S,
    camera: &mut C,
    series: &mut CaptureSeries,
    config: &SweepConfig,
    stop: watch::Receiver<bool>,
) -> ScanResult<SweepSummary>
where
    S: Stage + ?Sized,
    C: FrameTrigger + ?Sized,
{
    // Fail fast: nothing below this line runs with bad parameters.
    config.validate(stage.travel_range())?;

    match drive(stage, camera, series, config, stop).await {
        Ok(summary) => Ok(summary),
        Err(err) => {
            // Best-effort halt; the original error is what matters.
            let _ = stage.stop_motion().await;
            let _ = stage.disconnect().await;
            Err(err)
        }
    }
}

async fn drive<S, C>(
    stage: &mut S,
    camera: &mut C,
    series: &mut CaptureSeries,
    config: &SweepConfig,
    stop: watch::Receiver<bool>,
) -> ScanResult<SweepSummary>
where
    S: Stage + ?Sized,
    C: FrameTrigger + ?Sized,
{
    let profile = config.oscillation.profile;

    // Position at the lower bound; sampling starts from there.
    stage
        .move_absolute(config.oscillation.lower_mm, profile, true)
        .await?;

    let started = Instant::now();
    let start_mm = stage.position().await?;
    let mut sampler = PitchSampler::new(config.sampling.clone(), start_mm, Utc::now());
    let mut oscillator = Oscillator::new(config.oscillation.clone());

    let first_target = oscillator.begin();
    stage.move_absolute(first_target, profile, false).await?;
    info!(
        stage = %stage.id(),
        lower_mm = config.oscillation.lower_mm,
        upper_mm = config.oscillation.upper_mm,
        pitch_mm = config.sampling.pitch_mm,
        "sweep started"
    );

    loop {
        tokio::time::sleep(config.sampling.poll_interval).await;

        if *stop.borrow() {
            warn!(frames = sampler.frames(), "sweep cancelled, stopping axis");
            oscillator.stop();
            let _ = stage.stop_motion().await;
            return Ok(SweepSummary {
                termination: Termination::Cancelled,
                frames: sampler.frames(),
                elapsed: started.elapsed(),
            });
        }

        if let Some(max_runtime) = config.max_runtime {
            if started.elapsed() > max_runtime {
                return Err(ScanError::Timeout(max_runtime));
            }
        }

        let position_mm = stage.position().await?;
        let busy = stage.is_busy().await?;
        let now = Instant::now();

        for sample in sampler.observe(position_mm, Utc::now(), now, busy)? {
            camera.capture().await?;
            debug!(frame = sample.frame, position_mm = sample.position_mm, "capture");
            series.record(sample);
        }

        if !busy {
            if let Some(target_mm) = oscillator.current_target() {
                if (position_mm - target_mm).abs() > ARRIVAL_TOL_MM {
                    // Idle far from the leg target: the move died underneath us.
                    return Err(ScanError::Stall {
                        position_mm,
                        stalled_for: Duration::ZERO,
                    });
                }
            }
            match oscillator.on_arrival() {
                Arrival::Reversal {
                    at_mm,
                    next_target_mm,
                } => {
                    sampler.reset_reference(at_mm, Utc::now(), now);
                    stage.move_absolute(next_target_mm, profile, false).await?;
                    debug!(at_mm, next_target_mm, legs = oscillator.legs_done(), "reversal");
                }
                Arrival::Finished => break,
            }
        }
    }

    let summary = SweepSummary {
        termination: Termination::Completed,
        frames: sampler.frames(),
        elapsed: started.elapsed(),
    };
    info!(
        frames = summary.frames,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "sweep complete"
    );
    Ok(summary)
}
