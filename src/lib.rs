//! Position-synchronized capture for continuously oscillating motion stages.
//!
//! A linear stage sweeps back and forth between two bounds while a camera is
//! fired at equally spaced position increments. Synchronization is done in
//! software: the stage position is polled, pitch crossings are detected (with
//! interpolation across the overshoot) and each crossing triggers a frame.

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod stage;
pub mod storage;
pub mod sweep;
pub mod transport;
