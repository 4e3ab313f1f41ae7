//! Capture series export with clean feature flag handling.
//!
//! The CSV layout is a JSON metadata block in `#`-prefixed comment lines,
//! followed by a header row and one row per captured frame.

use crate::capture::SampleRecord;
use crate::sweep::{SweepConfig, SweepSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run provenance written ahead of the data rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub stage_id: String,
    pub started_at: DateTime<Utc>,
    pub config: SweepConfig,
    pub frames: u64,
}

impl RunMetadata {
    pub fn new(stage_id: impl Into<String>, config: &SweepConfig, summary: &SweepSummary) -> Self {
        Self {
            stage_id: stage_id.into(),
            started_at: Utc::now(),
            config: config.clone(),
            frames: summary.frames,
        }
    }
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use anyhow::{Context, Result};
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    pub struct CsvWriter {
        path: PathBuf,
        writer: Option<csv::Writer<File>>,
    }

    impl CsvWriter {
        /// Create the output file, writing the metadata block and the
        /// column header.
        pub fn create<P: AsRef<Path>>(path: P, metadata: &RunMetadata) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create output directory at {parent:?}")
                    })?;
                }
            }
            let mut file = File::create(&path)
                .with_context(|| format!("Failed to create CSV file at {path:?}"))?;

            let json_string = serde_json::to_string_pretty(metadata)
                .context("Failed to serialize run metadata to JSON")?;
            for line in json_string.lines() {
                file.write_all(b"# ")
                    .and_then(|_| file.write_all(line.as_bytes()))
                    .and_then(|_| file.write_all(b"\n"))
                    .context("Failed to write metadata to CSV file")?;
            }

            let mut writer = csv::Writer::from_writer(file);
            writer
                .write_record(["frame", "timestamp", "position_mm"])
                .context("Failed to write CSV header")?;

            Ok(Self {
                path,
                writer: Some(writer),
            })
        }

        pub fn write(&mut self, records: &[SampleRecord]) -> Result<()> {
            if let Some(writer) = self.writer.as_mut() {
                for record in records {
                    writer
                        .write_record(&[
                            record.frame.to_string(),
                            record.timestamp.to_rfc3339(),
                            format!("{:.6}", record.position_mm),
                        ])
                        .context("Failed to write capture record to CSV file")?;
                }
            }
            Ok(())
        }

        pub fn finish(&mut self) -> Result<()> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush().context("Failed to flush CSV writer")?;
            }
            tracing::info!(path = %self.path.display(), "capture series written");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::ScanError;
    use anyhow::Result;
    use std::path::Path;

    pub struct CsvWriter;

    impl CsvWriter {
        pub fn create<P: AsRef<Path>>(_path: P, _metadata: &RunMetadata) -> Result<Self> {
            Err(ScanError::Configuration("feature 'storage_csv' not enabled".to_string()).into())
        }

        pub fn write(&mut self, _records: &[SampleRecord]) -> Result<()> {
            Err(ScanError::Configuration("feature 'storage_csv' not enabled".to_string()).into())
        }

        pub fn finish(&mut self) -> Result<()> {
            Err(ScanError::Configuration("feature 'storage_csv' not enabled".to_string()).into())
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvWriter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvWriter;

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::core::MotionProfile;
    use crate::sweep::{OscillationSpec, SamplingSpec, Termination};
    use std::time::Duration;

    fn sample_config() -> SweepConfig {
        SweepConfig {
            oscillation: OscillationSpec {
                lower_mm: 10.0,
                upper_mm: 12.0,
                profile: MotionProfile::with_velocity(1.0),
                cycles: Some(1),
            },
            sampling: SamplingSpec {
                pitch_mm: 0.010,
                poll_interval: Duration::from_millis(5),
                stall_grace: Duration::from_millis(250),
            },
            max_runtime: None,
        }
    }

    #[test]
    fn test_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let summary = SweepSummary {
            termination: Termination::Completed,
            frames: 2,
            elapsed: Duration::from_secs(4),
        };
        let metadata = RunMetadata::new("sim", &sample_config(), &summary);
        let records = vec![
            SampleRecord {
                frame: 1,
                timestamp: Utc::now(),
                position_mm: 10.010,
            },
            SampleRecord {
                frame: 2,
                timestamp: Utc::now(),
                position_mm: 10.020,
            },
        ];

        let mut writer = CsvWriter::create(&path, &metadata).unwrap();
        writer.write(&records).unwrap();
        writer.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("# "));

        let header = contents
            .lines()
            .find(|l| !l.starts_with('#'))
            .unwrap();
        assert_eq!(header, "frame,timestamp,position_mm");

        let data_rows: Vec<&str> = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .skip(1)
            .collect();
        assert_eq!(data_rows.len(), 2);
        assert!(data_rows[0].starts_with("1,"));
        assert!(data_rows[0].ends_with("10.010000"));
    }

    #[test]
    fn test_metadata_block_is_parseable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");

        let summary = SweepSummary {
            termination: Termination::Completed,
            frames: 0,
            elapsed: Duration::ZERO,
        };
        let metadata = RunMetadata::new("sim", &sample_config(), &summary);
        let mut writer = CsvWriter::create(&path, &metadata).unwrap();
        writer.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let json: String = contents
            .lines()
            .take_while(|l| l.starts_with("# "))
            .map(|l| &l[2..])
            .collect::<Vec<_>>()
            .join("\n");
        let parsed: RunMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stage_id, "sim");
        assert_eq!(parsed.config.oscillation.cycles, Some(1));
    }
}
