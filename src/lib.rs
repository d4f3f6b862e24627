//! recoveryctl - client for the recovery image service
//!
//! Downloads recovery images together with their chunklists and verifies
//! them offline against the EFI ROM signing key, and probes how the
//! service answers for a given board-id and logic-board serial (MLB).

pub mod boards;
pub mod chunklist;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod logging;
pub mod mlb;
pub mod probe;
pub mod progress;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
