//! Transport adapters for stage communication.
//!
//! This layer owns raw line-oriented I/O so the stage drivers can stay
//! protocol-only. Three implementations:
//!
//! - [`MockTransport`]: scripted responses for driver unit tests
//! - [`TcpTransport`]: network/cloud addressing mode (virtual devices,
//!   IoT relays)
//! - `SerialTransport`: local serial ports, behind the `instrument_serial`
//!   feature
//!
//! Transport errors are `anyhow::Error` with context; the drivers wrap them
//! into the typed crate error at the protocol boundary.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod tcp;

use anyhow::Result;
use async_trait::async_trait;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Line-oriented transport to a stage controller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging ("serial", "tcp", "mock").
    fn name(&self) -> &str;

    /// Open the underlying session.
    async fn open(&mut self) -> Result<()>;

    /// Close the underlying session. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Send one command line without waiting for a reply.
    async fn send(&mut self, command: &str) -> Result<()>;

    /// Send one command line and read one reply line.
    async fn query(&mut self, command: &str) -> Result<String>;
}
