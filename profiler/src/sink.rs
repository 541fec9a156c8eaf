//! Trace finalization
//!
//! A [`Finalizer`] runs exactly once when a scope seals, before the sealed
//! set is handed back to the caller. Finalizer failures are logged by the
//! scope machinery and never unwind into the instrumented work.

use crate::output;
use anyhow::{Context, Result};
use opscope_shared::snapshot::Snapshot;
use opscope_shared::types::event::EventSet;
use std::path::PathBuf;
use tracing::info;

/// Strategy invoked with the sealed event set at scope exit
pub trait Finalizer: Send + Sync {
    fn finalize(&self, events: &EventSet) -> Result<()>;
}

impl<F> Finalizer for F
where
    F: Fn(&EventSet) -> Result<()> + Send + Sync,
{
    fn finalize(&self, events: &EventSet) -> Result<()> {
        self(events)
    }
}

/// Host name used in trace file names (falls back to the pid)
fn capture_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| format!("host-{}", std::process::id()))
}

/// `{host}_{pid}.{timestamp}` — unique per scope on one host, so repeated
/// scopes never overwrite each other
fn file_stem() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.9f");
    format!("{}_{}.{}", capture_host(), std::process::id(), stamp)
}

/// Writes one Chrome-trace JSON file per sealed scope into a directory
///
/// The directory is created on first use. Files are named
/// `{host}_{pid}.{timestamp}.trace.json` and load in `chrome://tracing`
/// or Perfetto.
pub struct ChromeTraceSink {
    dir: PathBuf,
}

impl ChromeTraceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Finalizer for ChromeTraceSink {
    fn finalize(&self, events: &EventSet) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create trace directory: {}", self.dir.display())
        })?;
        let path = self.dir.join(format!("{}.trace.json", file_stem()));
        output::chrome::write_chrome_trace(events, &path)
    }
}

/// Writes one binary snapshot per sealed scope into a directory
///
/// Snapshots load back with [`Snapshot::read_file`] for offline aggregation.
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Finalizer for SnapshotSink {
    fn finalize(&self, events: &EventSet) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!(
                "failed to create snapshot directory: {}",
                self.dir.display()
            )
        })?;
        let path = self.dir.join(format!("{}.events.bin", file_stem()));
        info!("writing snapshot: {}", path.display());
        Snapshot::new(capture_host(), events.clone()).write_file(&path)
    }
}
