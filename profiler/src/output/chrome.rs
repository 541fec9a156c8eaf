//! Chrome-trace JSON output
//!
//! Emits the trace-event JSON consumed by `chrome://tracing` and Perfetto:
//! one complete (`"ph":"X"`) event per captured operation with microsecond
//! stamps relative to scope start, plus thread-name metadata for each lane
//! and accelerator stream.

use anyhow::{Context, Result};
use opscope_shared::types::event::{EventSet, OpEvent};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Virtual tid space for accelerator streams so they never collide with
/// cpu lanes
const STREAM_TID_BASE: u64 = 1_000_000;

/// Write one sealed set as a Chrome trace file
pub fn write_chrome_trace(events: &EventSet, path: &Path) -> Result<()> {
    info!("writing chrome trace: {}", path.display());

    let file = File::create(path)
        .with_context(|| format!("failed to create trace file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer(writer, &trace_value(events))
        .context("failed to serialize chrome trace")?;
    Ok(())
}

fn chrome_tid(event: &OpEvent) -> u64 {
    match event.stream {
        Some(stream) => STREAM_TID_BASE + stream as u64,
        None => event.lane,
    }
}

fn trace_value(events: &EventSet) -> serde_json::Value {
    let pid = std::process::id();

    // one thread_name metadata record per distinct track
    let mut labels: BTreeMap<u64, String> = BTreeMap::new();
    for event in events.iter() {
        labels.entry(chrome_tid(event)).or_insert_with(|| match event.stream {
            Some(stream) => format!("accel stream {}", stream),
            None => format!("lane {}", event.lane),
        });
    }

    let mut trace_events = Vec::with_capacity(events.len() + labels.len());
    for (tid, label) in &labels {
        trace_events.push(json!({
            "name": "thread_name",
            "ph": "M",
            "pid": pid,
            "tid": tid,
            "args": { "name": label }
        }));
    }

    for event in events.iter() {
        let ts_us = event.start_ns.saturating_sub(events.started_ns) as f64 / 1_000.0;
        let dur_us = event.duration_ns() as f64 / 1_000.0;

        let mut args = serde_json::Map::new();
        args.insert("op_id".to_string(), json!(event.id));
        if let Some(parent) = event.parent {
            args.insert("parent_op_id".to_string(), json!(parent));
        }
        if !event.input_shapes.is_empty() {
            args.insert("input_shapes".to_string(), json!(event.input_shapes));
        }
        if !event.stack.is_empty() {
            args.insert("stack".to_string(), json!(event.stack));
        }

        trace_events.push(json!({
            "name": event.name,
            "cat": event.device.as_str(),
            "ph": "X",
            "ts": ts_us,
            "dur": dur_us,
            "pid": pid,
            "tid": chrome_tid(event),
            "args": args
        }));
    }

    json!({
        "traceEvents": trace_events,
        "displayTimeUnit": "ms",
        "otherData": {
            "dropped_events": events.dropped.to_string()
        }
    })
}
