//! Event recording runtime
//!
//! A [`Recorder`] is a cheap cloneable handle the instrumented code uses to
//! open operator spans and post pre-timed records. All recording flows into
//! the scope currently live on the owning profiler; with no live scope every
//! call is a no-op. Recording never panics into the instrumented work:
//! anything that cannot be kept is counted as dropped instead.

use crate::config::Config;
use crate::scope::ProfilerShared;
use opscope_shared::types::event::{
    DeviceKind, DimVec, EventSet, LaneId, OpEvent, OpId, StreamId, TimestampNs,
};
use opscope_shared::utils::system_time_nanos;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Process-wide lane allocator; each recording thread gets one lane id
static NEXT_LANE: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_LANE: Cell<Option<LaneId>> = const { Cell::new(None) };
    static OPEN_SPANS: RefCell<SpanStack> = const { RefCell::new(SpanStack::new()) };
}

/// Lane id of the calling thread, assigned on first use
fn current_lane() -> LaneId {
    THREAD_LANE.with(|lane| match lane.get() {
        Some(id) => id,
        None => {
            let id = NEXT_LANE.fetch_add(1, Ordering::Relaxed);
            lane.set(Some(id));
            id
        }
    })
}

/// Per-thread stack of open spans, tagged with the scope generation so a
/// new scope never inherits frames left over from an earlier one
struct SpanStack {
    generation: u64,
    frames: Vec<Frame>,
}

struct Frame {
    id: OpId,
    name: String,
}

impl SpanStack {
    const fn new() -> Self {
        Self {
            generation: 0,
            frames: Vec::new(),
        }
    }

    fn align(&mut self, generation: u64) {
        if self.generation != generation {
            self.generation = generation;
            self.frames.clear();
        }
    }
}

/// Mutable state of one live scope, shared between the profiler, its
/// recorders, and any open spans
pub(crate) struct ScopeState {
    pub(crate) config: Config,
    pub(crate) generation: u64,
    started_ns: TimestampNs,
    clock: Instant,
    events: Mutex<Vec<OpEvent>>,
    open: AtomicBool,
    next_op: AtomicU64,
    dropped: AtomicU64,
}

impl ScopeState {
    pub(crate) fn new(config: Config, generation: u64) -> Self {
        Self {
            config,
            generation,
            started_ns: system_time_nanos(),
            clock: Instant::now(),
            events: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            next_op: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Current time on the scope clock, nanoseconds since UNIX epoch.
    /// Anchored to the wall clock at `begin`, advanced monotonically.
    fn now_ns(&self) -> TimestampNs {
        self.started_ns + self.clock.elapsed().as_nanos() as u64
    }

    fn next_op_id(&self) -> OpId {
        self.next_op.fetch_add(1, Ordering::Relaxed)
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Append one event. Counts a drop when the scope has sealed, the
    /// buffer is full, or the buffer lock is poisoned.
    fn append(&self, event: OpEvent) {
        let Ok(mut events) = self.events.lock() else {
            self.count_drop();
            return;
        };
        // open is re-checked under the lock so seal() cannot race past us
        if !self.open.load(Ordering::Acquire) || events.len() >= self.config.max_events {
            self.count_drop();
            return;
        }
        events.push(event);
    }

    /// Stop accepting events and hand the buffer out. Everything recorded
    /// after this point counts as dropped.
    pub(crate) fn seal(&self) -> EventSet {
        let mut events = {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            self.open.store(false, Ordering::Release);
            std::mem::take(&mut *events)
        };
        // spans append when they close, so nested ops land child-first;
        // ids are handed out at dispatch and restore that order
        events.sort_by_key(|e| e.id);
        EventSet {
            started_ns: self.started_ns,
            sealed_ns: self.now_ns(),
            events,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle for recording into whatever scope its profiler currently has live
///
/// `Clone + Send + Sync`; hand clones to worker threads. Recording while no
/// scope is live is a no-op.
#[derive(Clone)]
pub struct Recorder {
    pub(crate) shared: Arc<ProfilerShared>,
}

impl Recorder {
    fn current(&self) -> Option<Arc<ScopeState>> {
        let slot = self.shared.active.read().ok()?;
        slot.clone()
    }

    /// True while the owning profiler has a live scope
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Current time on the live scope's clock, or the system clock when no
    /// scope is live. Use for the stamps passed to [`record_complete`].
    ///
    /// [`record_complete`]: Recorder::record_complete
    pub fn now_ns(&self) -> TimestampNs {
        match self.current() {
            Some(scope) => scope.now_ns(),
            None => system_time_nanos(),
        }
    }

    /// Open a span for one operation; it records when it closes
    pub fn op(&self, name: impl Into<String>, device: DeviceKind) -> OpSpan {
        self.op_with_shapes(name, device, &[])
    }

    /// Open a span with input shapes attached (kept only when the scope
    /// captures shapes)
    pub fn op_with_shapes(
        &self,
        name: impl Into<String>,
        device: DeviceKind,
        shapes: &[&[i64]],
    ) -> OpSpan {
        let name = name.into();
        let Some(scope) = self.current() else {
            return OpSpan::disabled(name, device);
        };
        if !scope.config.devices.captures(device) {
            // filtered by configuration, not a drop
            return OpSpan::disabled(name, device);
        }

        let id = scope.next_op_id();
        let start_ns = scope.now_ns();
        let generation = scope.generation;
        let input_shapes = capture_shapes(&scope.config, shapes);

        let (parent, stack) = OPEN_SPANS.with(|spans| {
            let mut spans = spans.borrow_mut();
            spans.align(generation);
            let parent = spans.frames.last().map(|f| f.id);
            let stack = enclosing_names(&scope.config, &spans);
            spans.frames.push(Frame {
                id,
                name: name.clone(),
            });
            (parent, stack)
        });

        OpSpan {
            scope: Some(scope),
            id,
            parent,
            name,
            device,
            start_ns,
            lane: current_lane(),
            stream: None,
            input_shapes,
            stack,
            generation,
            finished: false,
            _not_send: PhantomData,
        }
    }

    /// Post a pre-timed record, e.g. an accelerator kernel whose stamps came
    /// from a device completion callback
    ///
    /// The record is parented to the span open on the calling thread, if
    /// any. An end stamp earlier than the start stamp yields a zero-length
    /// event rather than an error.
    pub fn record_complete(
        &self,
        name: impl Into<String>,
        device: DeviceKind,
        start_ns: TimestampNs,
        end_ns: TimestampNs,
        stream: Option<StreamId>,
        shapes: &[&[i64]],
    ) {
        let Some(scope) = self.current() else {
            return;
        };
        if !scope.config.devices.captures(device) {
            return;
        }

        let (parent, stack) = OPEN_SPANS.with(|spans| {
            let mut spans = spans.borrow_mut();
            spans.align(scope.generation);
            let parent = spans.frames.last().map(|f| f.id);
            let stack = enclosing_names(&scope.config, &spans);
            (parent, stack)
        });

        let event = OpEvent {
            id: scope.next_op_id(),
            parent,
            name: name.into(),
            device,
            start_ns,
            end_ns,
            lane: current_lane(),
            stream,
            input_shapes: capture_shapes(&scope.config, shapes),
            stack,
        };
        scope.append(event);
    }
}

fn capture_shapes(config: &Config, shapes: &[&[i64]]) -> Vec<DimVec> {
    if config.capture_shapes && !shapes.is_empty() {
        shapes.iter().map(|s| s.to_vec()).collect()
    } else {
        Vec::new()
    }
}

fn enclosing_names(config: &Config, spans: &SpanStack) -> Vec<String> {
    if config.capture_stack {
        spans.frames.iter().map(|f| f.name.clone()).collect()
    } else {
        Vec::new()
    }
}

/// RAII guard for one in-flight operation
///
/// Records an event into its scope when it closes, either through
/// [`finish`](OpSpan::finish) or by going out of scope. Closing after the
/// scope sealed counts toward the dropped total. Spans are not `Send`: they
/// must close on the thread that opened them so nesting stays consistent.
pub struct OpSpan {
    scope: Option<Arc<ScopeState>>,
    id: OpId,
    parent: Option<OpId>,
    name: String,
    device: DeviceKind,
    start_ns: TimestampNs,
    lane: LaneId,
    stream: Option<StreamId>,
    input_shapes: Vec<DimVec>,
    stack: Vec<String>,
    generation: u64,
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl OpSpan {
    /// Span that records nothing (profiler inactive or device filtered out)
    fn disabled(name: String, device: DeviceKind) -> Self {
        Self {
            scope: None,
            id: 0,
            parent: None,
            name,
            device,
            start_ns: 0,
            lane: 0,
            stream: None,
            input_shapes: Vec::new(),
            stack: Vec::new(),
            generation: 0,
            finished: true,
            _not_send: PhantomData,
        }
    }

    /// Tag the operation with an accelerator stream
    pub fn with_stream(mut self, stream: StreamId) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Close the span now instead of at the end of the block
    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(scope) = self.scope.take() else {
            return;
        };

        OPEN_SPANS.with(|spans| {
            let mut spans = spans.borrow_mut();
            if spans.generation != self.generation {
                return;
            }
            if spans.frames.last().map(|f| f.id) == Some(self.id) {
                spans.frames.pop();
            } else {
                // closed out of order; remove our frame wherever it sits
                spans.frames.retain(|f| f.id != self.id);
            }
        });

        let event = OpEvent {
            id: self.id,
            parent: self.parent,
            name: std::mem::take(&mut self.name),
            device: self.device,
            start_ns: self.start_ns,
            end_ns: scope.now_ns(),
            lane: self.lane,
            stream: self.stream,
            input_shapes: std::mem::take(&mut self.input_shapes),
            stack: std::mem::take(&mut self.stack),
        };
        scope.append(event);
    }
}

impl Drop for OpSpan {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceFilter;
    use crate::scope::{profile, Profiler};

    #[test]
    fn test_lane_is_stable_within_a_thread() {
        let first = current_lane();
        let second = current_lane();
        assert_eq!(first, second);
    }

    #[test]
    fn test_lanes_differ_across_threads() {
        let here = current_lane();
        let there = std::thread::spawn(current_lane).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_recording_without_scope_is_noop() {
        let profiler = Profiler::new();
        let recorder = profiler.recorder();
        assert!(!recorder.is_active());

        recorder.op("orphan", DeviceKind::Cpu).finish();
        recorder.record_complete("kernel", DeviceKind::Accelerator, 0, 100, Some(0), &[]);

        // nothing was live, so nothing was captured or dropped
        let scope = profiler.begin(Config::default()).unwrap();
        let events = scope.end().unwrap();
        assert!(events.is_empty());
        assert_eq!(events.dropped, 0);
    }

    #[test]
    fn test_span_records_parent_chain() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();

        let outer = recorder.op("outer", DeviceKind::Cpu);
        let inner = recorder.op("inner", DeviceKind::Cpu);
        inner.finish();
        outer.finish();

        let events = scope.end().unwrap();
        assert_eq!(events.len(), 2);

        let inner = events.iter().find(|e| e.name == "inner").unwrap();
        let outer = events.iter().find(|e| e.name == "outer").unwrap();
        assert_eq!(inner.parent, Some(outer.id));
        assert_eq!(outer.parent, None);
        assert!(inner.start_ns >= outer.start_ns);
        assert!(inner.end_ns <= outer.end_ns);
    }

    #[test]
    fn test_sealed_events_are_in_dispatch_order() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();

        // nested spans close child-first, but the sealed set must come
        // back in the order the ops were dispatched
        let outer = recorder.op("outer", DeviceKind::Cpu);
        let inner = recorder.op("inner", DeviceKind::Cpu);
        inner.finish();
        recorder.record_complete("kernel", DeviceKind::Accelerator, 0, 1_000, Some(0), &[]);
        outer.finish();

        let events = scope.end().unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner", "kernel"]);
        let ids: Vec<OpId> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_shapes_kept_only_when_enabled() {
        let profiler = Profiler::new();

        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();
        recorder
            .op_with_shapes("matmul", DeviceKind::Cpu, &[&[8, 16], &[16, 4]])
            .finish();
        let plain = scope.end().unwrap();
        assert!(plain.events[0].input_shapes.is_empty());

        let scope = profiler.begin(Config::new().shapes(true)).unwrap();
        let recorder = scope.recorder();
        recorder
            .op_with_shapes("matmul", DeviceKind::Cpu, &[&[8, 16], &[16, 4]])
            .finish();
        let shaped = scope.end().unwrap();
        assert_eq!(shaped.events[0].input_shapes, vec![vec![8, 16], vec![16, 4]]);
    }

    #[test]
    fn test_stack_capture_records_enclosing_names() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::new().stack(true)).unwrap();
        let recorder = scope.recorder();

        let _forward = recorder.op("forward", DeviceKind::Cpu);
        let _layer = recorder.op("layer0", DeviceKind::Cpu);
        recorder.record_complete(
            "sgemm",
            DeviceKind::Accelerator,
            recorder.now_ns(),
            recorder.now_ns(),
            Some(7),
            &[],
        );
        drop(_layer);
        drop(_forward);

        let events = scope.end().unwrap();
        let kernel = events.iter().find(|e| e.name == "sgemm").unwrap();
        assert_eq!(kernel.stack, vec!["forward".to_string(), "layer0".to_string()]);
        assert_eq!(kernel.stream, Some(7));

        let layer = events.iter().find(|e| e.name == "layer0").unwrap();
        assert_eq!(layer.stack, vec!["forward".to_string()]);
    }

    #[test]
    fn test_span_stream_tag_is_recorded() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();

        recorder
            .op("memcpy_h2d", DeviceKind::Accelerator)
            .with_stream(3)
            .finish();
        recorder.op("host_prep", DeviceKind::Cpu).finish();

        let events = scope.end().unwrap();
        let copy = events.iter().find(|e| e.name == "memcpy_h2d").unwrap();
        assert_eq!(copy.stream, Some(3));
        assert_eq!(copy.device, DeviceKind::Accelerator);
        let prep = events.iter().find(|e| e.name == "host_prep").unwrap();
        assert_eq!(prep.stream, None);
    }

    #[test]
    fn test_device_filter_skips_without_counting_drops() {
        let profiler = Profiler::new();
        let scope = profiler
            .begin(Config::new().devices(DeviceFilter::only(DeviceKind::Accelerator)))
            .unwrap();
        let recorder = scope.recorder();

        recorder.op("host_prep", DeviceKind::Cpu).finish();
        recorder.record_complete("kernel", DeviceKind::Accelerator, 0, 1_000, Some(0), &[]);

        let events = scope.end().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events.events[0].device, DeviceKind::Accelerator);
        assert_eq!(events.dropped, 0);
    }

    #[test]
    fn test_capacity_overflow_counts_drops() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::new().max_events(2)).unwrap();
        let recorder = scope.recorder();

        for i in 0..5 {
            recorder.op(format!("op{}", i), DeviceKind::Cpu).finish();
        }

        let events = scope.end().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events.dropped, 3);
    }

    #[test]
    fn test_stale_span_does_not_leak_into_next_scope() {
        let profiler = Profiler::new();
        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();

        let straggler = recorder.op("straggler", DeviceKind::Cpu);
        let events = scope.end().unwrap();
        assert!(events.is_empty());
        // counted against the sealed scope, not the next one
        straggler.finish();

        let scope = profiler.begin(Config::default()).unwrap();
        let recorder = scope.recorder();
        recorder.op("fresh", DeviceKind::Cpu).finish();

        let events = scope.end().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events.events[0].parent, None);
        assert_eq!(events.dropped, 0);
    }

    #[test]
    fn test_stale_span_from_another_profiler_does_not_leak() {
        // a span held across profile() calls leaves a frame behind; the
        // next scope runs on a different profiler and must not adopt it
        let (straggler, first) = profile(Config::default(), |rec| {
            rec.op("straggler", DeviceKind::Cpu)
        })
        .unwrap();
        assert!(first.is_empty());

        let (_, second) = profile(Config::default(), |rec| {
            let op = rec.op("fresh", DeviceKind::Cpu);
            std::thread::sleep(std::time::Duration::from_millis(1));
            op.finish();
        })
        .unwrap();
        drop(straggler);

        assert_eq!(second.len(), 1);
        assert_eq!(second.events[0].name, "fresh");
        assert_eq!(second.events[0].parent, None);
        assert!(second.total_device_time_ns(DeviceKind::Cpu) > 0);
    }

    #[test]
    fn test_filtered_span_does_not_break_nesting() {
        let profiler = Profiler::new();
        let scope = profiler
            .begin(Config::new().devices(DeviceFilter::only(DeviceKind::Cpu)))
            .unwrap();
        let recorder = scope.recorder();

        let outer = recorder.op("outer", DeviceKind::Cpu);
        // filtered out: never enters the enclosing chain
        let ghost = recorder.op("ghost", DeviceKind::Accelerator);
        let inner = recorder.op("inner", DeviceKind::Cpu);
        inner.finish();
        ghost.finish();
        outer.finish();

        let events = scope.end().unwrap();
        let inner = events.iter().find(|e| e.name == "inner").unwrap();
        let outer = events.iter().find(|e| e.name == "outer").unwrap();
        assert_eq!(inner.parent, Some(outer.id));
        assert!(events.iter().all(|e| e.name != "ghost"));
    }
}
