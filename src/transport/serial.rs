//! Serial transport for local stage hardware.
//!
//! Wraps `tokio-serial` for async line-oriented I/O over RS-232/USB serial
//! links. Only compiled with the `instrument_serial` feature so the crate
//! builds on machines without serial toolchains.

use super::Transport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Line-oriented transport over a local serial port.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM4")
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<BufReader<SerialStream>>,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_READ_TIMEOUT,
            port: None,
        }
    }

    /// Override the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn port_mut(&mut self) -> Result<&mut BufReader<SerialStream>> {
        self.port
            .as_mut()
            .ok_or_else(|| anyhow!("serial port {} not open", self.port_name))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    async fn open(&mut self) -> Result<()> {
        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .open_native_async()
            .with_context(|| format!("failed to open serial port {}", self.port_name))?;
        self.port = Some(BufReader::new(stream));
        debug!(port = %self.port_name, baud = self.baud_rate, "serial transport opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        let framed = format!("{command}\n");
        let port = self.port_mut()?;
        port.get_mut()
            .write_all(framed.as_bytes())
            .await
            .context("serial write failed")?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.send(command).await?;
        let timeout = self.timeout;
        let port = self.port_mut()?;
        let mut line = String::new();
        let n = tokio::time::timeout(timeout, port.read_line(&mut line))
            .await
            .context("serial read timed out")?
            .context("serial read failed")?;
        if n == 0 {
            return Err(anyhow!("unexpected EOF from serial port"));
        }
        Ok(line.trim_end().to_string())
    }
}
