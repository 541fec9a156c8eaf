//! Scoped activity profiler
//!
//! Wraps a unit of work in a profiling scope: operator spans and accelerator
//! records are captured while the scope is live, sealed into an immutable
//! event set at scope exit, and aggregated or exported from there. Capture is
//! best effort — when the runtime cannot keep an event it counts a drop
//! instead of slowing or failing the instrumented work.
//!
//! ```no_run
//! use opscope_profiler::{profile, ChromeTraceSink, Config, DeviceKind};
//! use opscope_profiler::{aggregate, render_table, GroupBy, SortKey};
//!
//! # fn main() -> Result<(), opscope_profiler::ProfilerError> {
//! let config = Config::new()
//!     .shapes(true)
//!     .stack(true)
//!     .on_finalize(ChromeTraceSink::new("./log"));
//!
//! let ((), events) = profile(config, |rec| {
//!     let _step = rec.op("train_step", DeviceKind::Cpu);
//!     // ... run the model ...
//! })?;
//!
//! let summary = aggregate(&events, GroupBy::default(), SortKey::TotalAccelTime);
//! println!("{}", render_table(&summary, Some(20)));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod recorder;
pub mod scope;
pub mod sink;

pub use config::{Config, DeviceFilter, DEFAULT_MAX_EVENTS};
pub use error::ProfilerError;
pub use output::table::render_table;
pub use recorder::{OpSpan, Recorder};
pub use scope::{profile, Profiler, Scope};
pub use sink::{ChromeTraceSink, Finalizer, SnapshotSink};

// Re-export the shared data model so most callers need a single crate
pub use opscope_shared::types::event::{DeviceKind, EventSet, OpEvent};
pub use opscope_shared::types::summary::{aggregate, AggregateRecord, GroupBy, SortKey, Summary};
