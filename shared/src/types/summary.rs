//! Aggregation of sealed event sets into per-operator summaries
//!
//! Groups captured events by operator key and derives self/total time per
//! device category. Pure functions over an [`EventSet`]; nothing here touches
//! the recording runtime.

use crate::types::event::{DeviceKind, DimVec, EventSet, OpId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Controls how events are folded into aggregate rows
///
/// The default groups by operator name alone. Enabling `input_shapes` or a
/// nonzero `stack_depth` splits rows that would otherwise merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupBy {
    /// Split rows by the formatted input shapes of each call
    pub input_shapes: bool,

    /// Split rows by the innermost `stack_depth` enclosing operator names
    /// (0 disables stack grouping)
    pub stack_depth: usize,
}

impl GroupBy {
    /// Group by operator name only
    pub fn name_only() -> Self {
        Self::default()
    }

    pub fn with_input_shapes(mut self) -> Self {
        self.input_shapes = true;
        self
    }

    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }
}

/// Column an aggregated summary is sorted by, always descending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Total accelerator time per row (the default)
    #[default]
    TotalAccelTime,
    SelfAccelTime,
    TotalCpuTime,
    SelfCpuTime,
    Count,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "total_accel_time" | "accel_time_total" => Ok(SortKey::TotalAccelTime),
            "self_accel_time" => Ok(SortKey::SelfAccelTime),
            "total_cpu_time" | "cpu_time_total" => Ok(SortKey::TotalCpuTime),
            "self_cpu_time" => Ok(SortKey::SelfCpuTime),
            "count" | "calls" => Ok(SortKey::Count),
            _ => anyhow::bail!("Invalid sort key: {}", s),
        }
    }
}

/// One aggregated row: every captured call that shares a group key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Display key the row was grouped under (name, optionally extended
    /// with shapes and enclosing operators)
    pub key: String,

    /// Bare operator name
    pub name: String,

    /// CPU time spent in these calls minus their same-device children
    pub self_cpu_ns: u64,

    /// CPU time spent in these calls including children
    pub total_cpu_ns: u64,

    /// Accelerator time minus same-device children
    pub self_accel_ns: u64,

    /// Accelerator time including children
    pub total_accel_ns: u64,

    /// Number of calls folded into this row
    pub count: u64,
}

impl AggregateRecord {
    fn empty(key: String, name: String) -> Self {
        Self {
            key,
            name,
            self_cpu_ns: 0,
            total_cpu_ns: 0,
            self_accel_ns: 0,
            total_accel_ns: 0,
            count: 0,
        }
    }

    /// Value of the column named by `key`
    pub fn sort_value(&self, key: SortKey) -> u64 {
        match key {
            SortKey::TotalAccelTime => self.total_accel_ns,
            SortKey::SelfAccelTime => self.self_accel_ns,
            SortKey::TotalCpuTime => self.total_cpu_ns,
            SortKey::SelfCpuTime => self.self_cpu_ns,
            SortKey::Count => self.count,
        }
    }
}

/// Aggregated view of one sealed event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Rows sorted descending by the requested sort key; rows with equal
    /// values keep discovery order
    pub records: Vec<AggregateRecord>,

    /// Total top-level CPU time in the set
    pub total_cpu_ns: u64,

    /// Total top-level accelerator time in the set
    pub total_accel_ns: u64,

    /// Events the producing scope observed but could not keep
    pub dropped: u64,

    /// Wall time the producing scope was open
    pub span_ns: u64,
}

/// Time consumed by direct children on the same device as their parent,
/// keyed by parent id
///
/// This is what separates an operator's self time from its total time.
pub fn same_device_child_time(events: &EventSet) -> HashMap<OpId, u64> {
    let device_of: HashMap<OpId, DeviceKind> =
        events.iter().map(|e| (e.id, e.device)).collect();

    let mut child_time: HashMap<OpId, u64> = HashMap::new();
    for e in events.iter() {
        if let Some(parent) = e.parent {
            if device_of.get(&parent).copied() == Some(e.device) {
                *child_time.entry(parent).or_insert(0) += e.duration_ns();
            }
        }
    }
    child_time
}

/// Fold a sealed event set into per-operator rows
///
/// Self time is each call's duration minus the durations of its direct
/// children on the same device, clamped at zero. Summed over a device
/// category, self time equals [`EventSet::total_device_time_ns`] for that
/// category as long as children do not outlive their parents.
pub fn aggregate(events: &EventSet, group_by: GroupBy, sort_key: SortKey) -> Summary {
    let child_time = same_device_child_time(events);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut records: Vec<AggregateRecord> = Vec::new();

    for e in events.iter() {
        let key = group_key(e, group_by);
        let row = match index.get(&key) {
            Some(&i) => i,
            None => {
                let i = records.len();
                records.push(AggregateRecord::empty(key.clone(), e.name.clone()));
                index.insert(key, i);
                i
            }
        };

        let total = e.duration_ns();
        let nested = child_time.get(&e.id).copied().unwrap_or(0);
        let self_time = total.saturating_sub(nested);

        let record = &mut records[row];
        match e.device {
            DeviceKind::Cpu => {
                record.total_cpu_ns += total;
                record.self_cpu_ns += self_time;
            }
            DeviceKind::Accelerator => {
                record.total_accel_ns += total;
                record.self_accel_ns += self_time;
            }
        }
        record.count += 1;
    }

    // Vec::sort_by is stable, so ties keep discovery order
    records.sort_by(|a, b| b.sort_value(sort_key).cmp(&a.sort_value(sort_key)));

    Summary {
        records,
        total_cpu_ns: events.total_device_time_ns(DeviceKind::Cpu),
        total_accel_ns: events.total_device_time_ns(DeviceKind::Accelerator),
        dropped: events.dropped,
        span_ns: events.span_ns(),
    }
}

/// Render input shapes the way they appear in grouped keys,
/// e.g. `[[32, 128], [128, 64]]`
pub fn format_shapes(shapes: &[DimVec]) -> String {
    let dims: Vec<String> = shapes
        .iter()
        .map(|shape| {
            let parts: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
            format!("[{}]", parts.join(", "))
        })
        .collect();
    format!("[{}]", dims.join(", "))
}

fn group_key(e: &crate::types::event::OpEvent, group_by: GroupBy) -> String {
    let mut key = e.name.clone();
    if group_by.input_shapes {
        key.push(' ');
        key.push_str(&format_shapes(&e.input_shapes));
    }
    if group_by.stack_depth > 0 && !e.stack.is_empty() {
        let depth = group_by.stack_depth.min(e.stack.len());
        let tail = &e.stack[e.stack.len() - depth..];
        key.push_str(" @ ");
        key.push_str(&tail.join(";"));
    }
    key
}
