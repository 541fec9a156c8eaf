//! Error types for the scope lifecycle

use thiserror::Error;

/// Violations of the one-live-scope contract
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfilerError {
    /// `begin` was called while this profiler already had a live scope
    #[error("a profiling scope is already active on this profiler")]
    AlreadyActive,

    /// `end` was called with no live scope
    #[error("no profiling scope is active on this profiler")]
    NotActive,

    /// The scope configuration was rejected
    #[error("invalid profiler configuration: {0}")]
    InvalidConfig(String),
}
