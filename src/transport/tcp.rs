//! TCP transport for the network/cloud addressing mode.
//!
//! Virtual devices and IoT relays expose the same ASCII protocol as a local
//! serial link, framed as LF-terminated lines over a TCP session. The relay
//! routes by device identifier, which is sent once as the first line after
//! the session opens.

use super::Transport;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Line-oriented transport over a TCP session to a device gateway.
pub struct TcpTransport {
    /// Gateway address, e.g. "virtual-device.example:8080"
    gateway: String,
    /// Device routing identifier announced to the gateway.
    device_id: Uuid,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn new(gateway: impl Into<String>, device_id: Uuid) -> Self {
        Self {
            gateway: gateway.into(),
            device_id,
            timeout: DEFAULT_IO_TIMEOUT,
            reader: None,
            writer: None,
        }
    }

    /// Override the per-operation I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("tcp transport not open"))?;
        let framed = format!("{line}\n");
        tokio::time::timeout(self.timeout, writer.write_all(framed.as_bytes()))
            .await
            .context("tcp write timed out")?
            .context("tcp write failed")?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("tcp transport not open"))?;
        let mut line = String::new();
        let n = tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .context("tcp read timed out")?
            .context("tcp read failed")?;
        if n == 0 {
            return Err(anyhow!("gateway closed the session"));
        }
        Ok(line.trim_end().to_string())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn open(&mut self) -> Result<()> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.gateway))
            .await
            .with_context(|| format!("timed out connecting to gateway {}", self.gateway))?
            .with_context(|| format!("failed to connect to gateway {}", self.gateway))?;
        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        // Route to the device before any protocol traffic.
        let device_id = self.device_id;
        self.write_line(&format!("open {device_id}")).await?;
        debug!(gateway = %self.gateway, device = %device_id, "tcp transport opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        self.write_line(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.write_line(command).await?;
        self.read_line().await
    }
}
