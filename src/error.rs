//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent taxonomy for everything that can go wrong between the stage
//! link and the capture loop:
//!
//! - **`Connection`**: the stage could not be reached or no device answered
//!   at the configured target.
//! - **`NotConnected`**: an operation was attempted on a link that is not in
//!   the `Connected` state. Always returned as a typed error so callers can
//!   implement retry/recovery logic; nothing in this crate prints-and-continues
//!   after a connectivity failure.
//! - **`Configuration`**: semantically invalid settings (pitch out of range,
//!   inverted bounds, bad scale factor). Raised before any motion starts.
//! - **`Protocol`**: the device answered, but with something we could not
//!   parse or with an explicit rejection.
//! - **`Stall`**: the axis reports busy but its position has stopped changing
//!   beyond the configured grace window.
//! - **`Timeout`**: the overall max-runtime guard fired.
//!
//! Transport-level failures arrive as `anyhow::Error` from the adapter layer
//! and are wrapped via `#[from]`, so drivers can use `?` throughout.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("stage is not connected")]
    NotConnected,

    #[error("stage link is closed")]
    LinkClosed,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("axis stalled at {position_mm:.4} mm: busy but stationary for {stalled_for:?}")]
    Stall {
        position_mm: f64,
        stalled_for: Duration,
    },

    #[error("sweep exceeded max runtime of {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration file error: {0}")]
    ConfigFile(#[from] figment::Error),
}
