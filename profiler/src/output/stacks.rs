//! Collapsed-stack export (Brendan Gregg format)
//!
//! One line per unique operator chain: `outer;inner;op weight`, weighted by
//! self time in microseconds. Compatible with `flamegraph.pl`, speedscope,
//! and Grafana Pyroscope ingestion. Only useful when the producing scope
//! captured stacks; without them every operation is its own root.

use anyhow::{Context, Result};
use opscope_shared::types::event::{DeviceKind, EventSet};
use opscope_shared::types::summary::same_device_child_time;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Write a collapsed-stack file for one device category
pub fn write_collapsed_stacks(events: &EventSet, device: DeviceKind, path: &Path) -> Result<()> {
    info!("writing collapsed stacks ({}): {}", device, path.display());

    let file = File::create(path)
        .with_context(|| format!("failed to create stacks file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for (stack, weight) in collapse(events, device) {
        writeln!(writer, "{} {}", stack, weight)?;
    }
    writer.flush()?;
    Ok(())
}

/// Fold self time per unique enclosing chain, in microseconds
///
/// Zero-weight chains are skipped. BTreeMap keeps the output deterministic.
fn collapse(events: &EventSet, device: DeviceKind) -> BTreeMap<String, u64> {
    let child_time = same_device_child_time(events);

    let mut folded: BTreeMap<String, u64> = BTreeMap::new();
    for event in events.iter().filter(|e| e.device == device) {
        let nested = child_time.get(&event.id).copied().unwrap_or(0);
        let self_us = event.duration_ns().saturating_sub(nested) / 1_000;
        if self_us == 0 {
            continue;
        }

        let mut line = String::new();
        for frame in &event.stack {
            line.push_str(frame);
            line.push(';');
        }
        line.push_str(&event.name);
        *folded.entry(line).or_insert(0) += self_us;
    }
    folded
}
