//! Capture sink: the recorded series of position-tagged frames.
//!
//! Each accepted sample becomes an immutable [`SampleRecord`]; the
//! [`CaptureSeries`] is the append-only, single-writer sequence the sweep
//! loop produces and tests/analysis consume.

use crate::core::FrameTrigger;
use crate::error::ScanResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted capture event.
///
/// Immutable once recorded. `position_mm` is the interpolated crossing
/// position, not the raw poll sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Monotonic frame index, starting at 1.
    pub frame: u64,
    /// UTC wall-clock timestamp of the (interpolated) crossing.
    pub timestamp: DateTime<Utc>,
    /// Axis position at the crossing, in mm.
    pub position_mm: f64,
}

/// Ordered, append-only sequence of sample records.
///
/// Insertion order is capture order. Records are never mutated or deleted.
#[derive(Clone, Debug, Default)]
pub struct CaptureSeries {
    records: Vec<SampleRecord>,
}

impl CaptureSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Pure in-memory append; never blocks or fails.
    pub fn record(&mut self, sample: SampleRecord) {
        self.records.push(sample);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Full series as owned rows (frame, timestamp, position). Idempotent:
    /// exporting twice yields identical output.
    pub fn export(&self) -> Vec<SampleRecord> {
        self.records.clone()
    }

    /// Signed position deltas between consecutive records, for spacing
    /// analysis.
    pub fn position_deltas(&self) -> Vec<f64> {
        self.records
            .windows(2)
            .map(|w| w[1].position_mm - w[0].position_mm)
            .collect()
    }
}

/// Mock camera that counts capture requests.
///
/// Stands in for the external image-capture collaborator in tests and in
/// simulation runs; producing/storing an actual image is out of scope.
#[derive(Default)]
pub struct CountingCamera {
    frames: u64,
}

impl CountingCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total capture requests received.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[async_trait]
impl FrameTrigger for CountingCamera {
    async fn capture(&mut self) -> ScanResult<()> {
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame: u64, position_mm: f64) -> SampleRecord {
        SampleRecord {
            frame,
            timestamp: Utc::now(),
            position_mm,
        }
    }

    #[test]
    fn test_series_preserves_capture_order() {
        let mut series = CaptureSeries::new();
        series.record(record(1, 10.010));
        series.record(record(2, 10.020));
        series.record(record(3, 10.030));

        let frames: Vec<u64> = series.records().iter().map(|r| r.frame).collect();
        assert_eq!(frames, [1, 2, 3]);
    }

    #[test]
    fn test_export_is_idempotent() {
        let mut series = CaptureSeries::new();
        series.record(record(1, 10.010));
        series.record(record(2, 10.020));

        let first = series.export();
        let second = series.export();
        assert_eq!(first, second);
    }

    #[test]
    fn test_position_deltas_are_signed() {
        let mut series = CaptureSeries::new();
        series.record(record(1, 11.990));
        series.record(record(2, 12.000));
        series.record(record(3, 11.990));

        let deltas = series.position_deltas();
        assert_eq!(deltas.len(), 2);
        assert!((deltas[0] - 0.010).abs() < 1e-12);
        assert!((deltas[1] + 0.010).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_counting_camera_counts_frames() {
        let mut camera = CountingCamera::new();
        camera.capture().await.unwrap();
        camera.capture().await.unwrap();
        assert_eq!(camera.frames(), 2);
    }
}
