//! Event type definitions for captured operator activity
//!
//! These types represent the raw records a profiling scope collects while
//! it is active, and the sealed set handed back when the scope ends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Timestamp in nanoseconds since UNIX epoch
pub type TimestampNs = u64;

/// Identifier of a single captured operation, unique within one scope
pub type OpId = u64;

/// Logical execution lane (one per recording thread)
pub type LaneId = u64;

/// Accelerator stream / queue identifier
pub type StreamId = u32;

/// Tensor-like shape: one dimension vector per input
pub type DimVec = Vec<i64>;

/// Device category an operation executed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Host CPU execution
    Cpu,
    /// Accelerator execution (GPU or similar offload device)
    Accelerator,
}

impl DeviceKind {
    /// Short lowercase label used in traces and tables
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured operation with its timing and optional context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpEvent {
    /// Scope-unique identifier
    pub id: OpId,

    /// Enclosing operation that was open on the same lane when this one
    /// started, if any
    pub parent: Option<OpId>,

    /// Operator name as reported by the instrumented code
    pub name: String,

    /// Device category the operation ran on
    pub device: DeviceKind,

    /// Start timestamp, nanoseconds since UNIX epoch
    pub start_ns: TimestampNs,

    /// End timestamp, nanoseconds since UNIX epoch
    pub end_ns: TimestampNs,

    /// Lane the operation was recorded from
    pub lane: LaneId,

    /// Accelerator stream the operation was enqueued on, if any
    pub stream: Option<StreamId>,

    /// Shapes of the operation inputs (empty unless shape capture is on)
    #[serde(default)]
    pub input_shapes: Vec<DimVec>,

    /// Names of enclosing operations, outermost first (empty unless stack
    /// capture is on)
    #[serde(default)]
    pub stack: Vec<String>,
}

impl OpEvent {
    /// Wall duration of the operation; zero if the end stamp precedes the
    /// start stamp
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Immutable set of events produced by one profiling scope
///
/// Sealed at scope exit; nothing is added or removed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    /// When the scope opened, nanoseconds since UNIX epoch
    pub started_ns: TimestampNs,

    /// When the scope sealed, nanoseconds since UNIX epoch
    pub sealed_ns: TimestampNs,

    /// Captured events in dispatch order
    pub events: Vec<OpEvent>,

    /// Number of events the scope observed but could not keep
    pub dropped: u64,
}

impl EventSet {
    /// Number of captured events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OpEvent> {
        self.events.iter()
    }

    /// Wall time the scope was open
    pub fn span_ns(&self) -> u64 {
        self.sealed_ns.saturating_sub(self.started_ns)
    }

    /// Number of events captured on one device category
    pub fn device_count(&self, device: DeviceKind) -> usize {
        self.events.iter().filter(|e| e.device == device).count()
    }

    /// Total busy time on one device category
    ///
    /// Sums the durations of events that have no enclosing event on the
    /// same device, so nested same-device work is not counted twice.
    pub fn total_device_time_ns(&self, device: DeviceKind) -> u64 {
        let device_of: HashMap<OpId, DeviceKind> =
            self.events.iter().map(|e| (e.id, e.device)).collect();

        self.events
            .iter()
            .filter(|e| e.device == device)
            .filter(|e| match e.parent {
                Some(parent) => device_of.get(&parent).copied() != Some(device),
                None => true,
            })
            .map(|e| e.duration_ns())
            .sum()
    }
}
