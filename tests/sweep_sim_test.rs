//! End-to-end sweep runs against the simulated stage.
//!
//! All tests run under paused tokio time, so multi-minute sweeps execute in
//! milliseconds and every position the motion model reports is exact.

use stagesync::capture::{CaptureSeries, CountingCamera};
use stagesync::core::{MotionProfile, Stage};
use stagesync::error::ScanError;
use stagesync::stage::sim::SimStage;
use stagesync::sweep::{
    self, OscillationSpec, SamplingSpec, SweepConfig, Termination,
};
use std::time::Duration;

fn config(lower_mm: f64, upper_mm: f64, pitch_mm: f64, velocity_mm_s: f64) -> SweepConfig {
    SweepConfig {
        oscillation: OscillationSpec {
            lower_mm,
            upper_mm,
            profile: MotionProfile::with_velocity(velocity_mm_s),
            cycles: Some(1),
        },
        sampling: SamplingSpec {
            pitch_mm,
            poll_interval: Duration::from_millis(5),
            stall_grace: Duration::from_millis(250),
        },
        max_runtime: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_produces_evenly_spaced_captures() {
    let mut stage = SimStage::new("sim");
    stage.connect().await.unwrap();
    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();

    // 2 mm span at 10 µm pitch: 200 captures per leg, 400 for the cycle.
    let cfg = config(10.0, 12.0, 0.010, 1.0);
    let (_stop, rx) = sweep::stop_channel();
    let summary = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx)
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Completed);
    assert_eq!(series.len(), 400);
    assert_eq!(summary.frames, 400);
    assert_eq!(camera.frames(), 400);

    let records = series.records();
    assert!((records[0].position_mm - 10.010).abs() < 1e-6);
    assert!((records[199].position_mm - 12.000).abs() < 1e-6);
    assert!((records[200].position_mm - 11.990).abs() < 1e-6);
    assert!((records[399].position_mm - 10.000).abs() < 1e-6);

    // Spacing holds everywhere, including across the reversal.
    for (i, delta) in series.position_deltas().iter().enumerate() {
        assert!(
            (delta.abs() - 0.010).abs() < 1e-6,
            "record {i}: spacing {delta} mm"
        );
    }

    // Frame indices are gapless and ordered.
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.frame, i as u64 + 1);
    }

    // Timestamps never go backwards.
    for pair in records.windows(2) {
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
}

#[tokio::test(start_paused = true)]
async fn test_spacing_across_supported_pitch_range() {
    for pitch_mm in [0.001, 0.007, 0.025, 0.100] {
        let mut stage = SimStage::new("sim");
        stage.connect().await.unwrap();
        let mut camera = CountingCamera::new();
        let mut series = CaptureSeries::new();

        // Keep travel per tick under half the pitch.
        let velocity = pitch_mm / 0.005 * 0.4;
        let cfg = config(1.0, 1.1, pitch_mm, velocity);
        let (_stop, rx) = sweep::stop_channel();
        sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx)
            .await
            .unwrap();

        let per_leg = (0.1 / pitch_mm + 1e-9).floor() as usize;
        assert_eq!(
            series.len(),
            per_leg * 2,
            "pitch {pitch_mm} mm: expected {per_leg} captures per leg"
        );
        // The delta across the reversal is shorter than one pitch whenever
        // the pitch does not divide the span exactly (the reference rebases
        // at the bound), so only within-leg deltas are checked.
        for (i, delta) in series.position_deltas().iter().enumerate() {
            if i == per_leg - 1 {
                continue;
            }
            assert!(
                (delta.abs() - pitch_mm).abs() < 1e-6,
                "pitch {pitch_mm} mm: spacing {delta} mm at {i}"
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_pitch_rejected_before_any_motion() {
    for pitch_mm in [0.0, 0.0005, 0.2] {
        let mut stage = SimStage::new("sim");
        stage.connect().await.unwrap();
        let mut camera = CountingCamera::new();
        let mut series = CaptureSeries::new();

        let cfg = config(10.0, 12.0, pitch_mm, 1.0);
        let (_stop, rx) = sweep::stop_channel();
        let result = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx).await;

        assert!(
            matches!(result, Err(ScanError::Configuration(_))),
            "pitch {pitch_mm} mm should be rejected"
        );
        assert!(
            stage.issued_commands().is_empty(),
            "no motion may be issued for pitch {pitch_mm} mm"
        );
        assert!(series.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_bounds_outside_travel_rejected() {
    let mut stage = SimStage::new("sim");
    stage.connect().await.unwrap();
    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();

    let cfg = config(10.0, 200.0, 0.010, 1.0);
    let (_stop, rx) = sweep::stop_channel();
    let result = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx).await;

    assert!(matches!(result, Err(ScanError::Configuration(_))));
    assert!(stage.issued_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stall_mid_leg_aborts_with_partial_series() {
    // Move 1 positions at the lower bound; move 2 is the first sweep leg,
    // which freezes 500 ms in (at 10.5 mm) while still reporting busy.
    let mut stage =
        SimStage::new("sim").freeze_nth_move(2, Duration::from_millis(500));
    stage.connect().await.unwrap();
    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();

    let cfg = config(10.0, 12.0, 0.010, 1.0);
    let (_stop, rx) = sweep::stop_channel();
    let result = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx).await;

    match result {
        Err(ScanError::Stall {
            position_mm,
            stalled_for,
        }) => {
            assert!((position_mm - 10.5).abs() < 1e-6);
            assert!(stalled_for >= Duration::from_millis(250));
        }
        other => panic!("expected stall, got {other:?}"),
    }

    // Captures up to the freeze survive; nothing after it.
    assert_eq!(series.len(), 50);
    for record in series.records() {
        assert!(record.position_mm <= 10.5 + 1e-9);
    }

    // Runner halted and released the stage.
    assert_eq!(
        stage.link_state(),
        stagesync::core::LinkState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_partial_series() {
    let mut stage = SimStage::new("sim");
    stage.connect().await.unwrap();
    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();

    let mut cfg = config(10.0, 12.0, 0.010, 1.0);
    cfg.oscillation.cycles = None; // run until told otherwise

    let (stop, rx) = sweep::stop_channel();
    tokio::spawn(async move {
        // Positioning takes 10 s; stop about 1 s into the first leg.
        tokio::time::sleep(Duration::from_secs(11)).await;
        stop.stop();
    });

    let summary = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx)
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Cancelled);
    assert!(!series.is_empty());
    assert!(series.len() < 400);
    assert_eq!(summary.frames, series.len() as u64);

    // Axis was stopped, not left running.
    assert!(!stage.is_busy().await.unwrap());

    let first = series.export();
    let second = series.export();
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_max_runtime_guard() {
    let mut stage = SimStage::new("sim");
    stage.connect().await.unwrap();
    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();

    let mut cfg = config(10.0, 12.0, 0.010, 1.0);
    cfg.oscillation.cycles = None;
    cfg.max_runtime = Some(Duration::from_millis(500));

    let (_stop, rx) = sweep::stop_channel();
    let result = sweep::run_sweep(&mut stage, &mut camera, &mut series, &cfg, rx).await;

    assert!(matches!(result, Err(ScanError::Timeout(_))));
    // The guard covers the sweep itself, not the initial positioning move,
    // so captures from the first half-millimetre of travel are kept.
    assert!(!series.is_empty());
}
