//! Shared types and utilities for Opscope
//!
//! This crate contains the data structures produced and consumed by the
//! profiler runtime: operator events, sealed event sets, aggregation into
//! per-operator summaries, and the on-disk snapshot format.

pub mod snapshot;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{event::*, summary::*};
