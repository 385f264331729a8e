//! RateCache Common Types
//!
//! This crate contains shared types used across the RateCache service,
//! including exchange-rate snapshots, access log entries, and the error
//! taxonomy surfaced by the caching core.

pub mod identifiers;
pub mod snapshot;
pub mod access_log;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use snapshot::*;
pub use access_log::*;
pub use error::*;
pub use time::*;
