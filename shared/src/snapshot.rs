//! On-disk snapshot format for sealed event sets.
//!
//! Uses bincode with an explicit config so writers and readers always use the
//! same encoding (fixint for lengths and enums), avoiding skew between builds.
//! Bincode is positional (not self-describing), so the envelope carries a
//! version that is checked before the payload is trusted.

use crate::types::event::EventSet;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Single bincode config for the snapshot format: fixint encoding so vec
/// lengths and enum tags have a fixed size across builds and bincode versions.
fn snapshot_bincode() -> impl bincode::config::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Versioned envelope around one sealed event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Host the events were captured on
    pub host: String,
    pub events: EventSet,
}

impl Snapshot {
    /// Create a snapshot at the current format version
    pub fn new(host: impl Into<String>, events: EventSet) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            host: host.into(),
            events,
        }
    }

    /// Serialize to bytes (bincode, fixint encoding)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        snapshot_bincode().serialize(self).map_err(Into::into)
    }

    /// Deserialize from bytes, validating the format version
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = snapshot_bincode()
            .deserialize(bytes)
            .context("failed to decode snapshot")?;
        if snapshot.version != SNAPSHOT_VERSION {
            anyhow::bail!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot)
    }

    /// Write the snapshot to a file
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))
    }

    /// Read a snapshot back from a file
    pub fn read_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
        Self::from_bytes(&bytes)
    }
}
