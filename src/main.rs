//! CLI entry point.
//!
//! Loads settings, builds the configured stage (real hardware or the
//! simulator), runs one position-synchronized sweep, and optionally writes
//! the capture series to CSV. Ctrl+C requests a cooperative stop; the
//! partial series is still written.

use anyhow::{Context, Result};
use clap::Parser;
use stagesync::capture::{CaptureSeries, CountingCamera};
use stagesync::config::Settings;
use stagesync::core::{ConnectTarget, Stage};
use stagesync::error::ScanError;
use stagesync::stage::sim::SimStage;
use stagesync::stage::zaber::ZaberStage;
use stagesync::storage::{CsvWriter, RunMetadata};
use stagesync::sweep::{self, Termination};
use stagesync::transport::{TcpTransport, Transport};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "stagesync")]
#[command(about = "Position-synchronized capture on an oscillating stage", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the simulated stage instead of real hardware
    #[arg(long)]
    sim: bool,

    /// Override the capture pitch in µm
    #[arg(long)]
    pitch_um: Option<f64>,

    /// Override the number of oscillation cycles (0 = run until Ctrl+C)
    #[arg(long)]
    cycles: Option<u32>,

    /// Write the capture series to this CSV file
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn build_hardware_stage(settings: &Settings) -> Result<ZaberStage> {
    let transport: Box<dyn Transport> = match &settings.connection.target {
        #[cfg(feature = "instrument_serial")]
        ConnectTarget::Serial(port) => Box::new(stagesync::transport::SerialTransport::new(
            port,
            settings.connection.baud,
        )),
        #[cfg(not(feature = "instrument_serial"))]
        ConnectTarget::Serial(_) => {
            return Err(ScanError::Configuration(
                "serial mode requires the 'instrument_serial' feature".to_string(),
            )
            .into());
        }
        ConnectTarget::Cloud(device_id) => {
            let gateway = settings
                .connection
                .gateway
                .as_deref()
                .context("cloud connection mode requires a gateway")?;
            Box::new(TcpTransport::new(gateway, *device_id))
        }
    };
    Ok(ZaberStage::new(
        "stage",
        settings.connection.target.clone(),
        transport,
        settings.stage.unit_scale,
    )?)
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(pitch_um) = cli.pitch_um {
        settings.sweep.pitch_um = pitch_um;
    }
    if let Some(cycles) = cli.cycles {
        settings.sweep.cycles = if cycles == 0 { None } else { Some(cycles) };
    }
    settings.validate()?;

    stagesync::logging::init(&settings.application.log_level);

    let mut stage: Box<dyn Stage> = if cli.sim {
        Box::new(SimStage::new("sim"))
    } else {
        Box::new(build_hardware_stage(&settings)?)
    };

    stage.connect().await?;
    stage.home().await?;

    let config = settings.sweep_config();
    let (stop, stop_rx) = sweep::stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping sweep");
            stop.stop();
        }
    });

    let mut camera = CountingCamera::new();
    let mut series = CaptureSeries::new();
    let result = sweep::run_sweep(&mut *stage, &mut camera, &mut series, &config, stop_rx).await;

    // A cancelled or failed run still keeps whatever was captured.
    if let Some(path) = &cli.output {
        if series.is_empty() {
            warn!("no frames captured, skipping CSV output");
        } else {
            let frames = series.len() as u64;
            let summary = match &result {
                Ok(summary) => *summary,
                Err(_) => sweep::SweepSummary {
                    termination: Termination::Cancelled,
                    frames,
                    elapsed: std::time::Duration::ZERO,
                },
            };
            let metadata = RunMetadata::new(stage.id(), &config, &summary);
            let mut writer = CsvWriter::create(path, &metadata)?;
            writer.write(series.records())?;
            writer.finish()?;
        }
    }

    let summary = result?;
    info!(
        frames = summary.frames,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        terminated = ?summary.termination,
        "run finished"
    );

    stage.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
