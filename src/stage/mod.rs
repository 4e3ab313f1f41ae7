//! Stage driver implementations.
//!
//! - [`zaber::ZaberStage`]: ASCII-protocol driver for Zaber-style linear
//!   stages over any [`crate::transport::Transport`]
//! - [`sim::SimStage`]: deterministic simulated stage for tests and dry runs

pub mod sim;
pub mod zaber;

pub use sim::SimStage;
pub use zaber::ZaberStage;
