//! Profiling scope lifecycle
//!
//! A [`Profiler`] owns at most one live scope at a time. [`Profiler::begin`]
//! opens a scope and hands back a guard; ending the scope seals the captured
//! events into an immutable set, runs the configured finalizer exactly once,
//! and returns the set. Dropping the guard without an explicit end (early
//! return, panic unwinding through the profiled work) still seals and
//! finalizes.

use crate::config::Config;
use crate::error::ProfilerError;
use crate::recorder::{Recorder, ScopeState};
use opscope_shared::types::event::EventSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Process-wide scope generation allocator. Thread-local span stacks compare
/// generations to notice a scope change, so every scope needs a tag that is
/// unique across profilers, not just within one.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

/// State shared between a profiler, its recorders, and its scope guards
pub(crate) struct ProfilerShared {
    pub(crate) active: RwLock<Option<Arc<ScopeState>>>,
}

/// Profiling context
///
/// Owns the live-scope slot. Cheap to clone; clones share the slot, so a
/// scope begun through one clone is visible to all of them.
#[derive(Clone)]
pub struct Profiler {
    shared: Arc<ProfilerShared>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler {
    /// Create a profiler with no live scope
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ProfilerShared {
                active: RwLock::new(None),
            }),
        }
    }

    /// Open a profiling scope
    ///
    /// Fails with [`ProfilerError::AlreadyActive`] while a scope is live on
    /// this profiler, and with [`ProfilerError::InvalidConfig`] when the
    /// configuration is rejected.
    pub fn begin(&self, config: Config) -> Result<Scope, ProfilerError> {
        config
            .validate()
            .map_err(|e| ProfilerError::InvalidConfig(e.to_string()))?;

        let mut slot = self
            .shared
            .active
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(ProfilerError::AlreadyActive);
        }

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed) + 1;
        let state = Arc::new(ScopeState::new(config, generation));
        *slot = Some(state.clone());
        drop(slot);

        info!("profiling scope opened (generation {})", generation);
        Ok(Scope {
            shared: self.shared.clone(),
            state,
            finished: false,
        })
    }

    /// Seal the live scope and take its events
    ///
    /// The guard returned by [`begin`](Profiler::begin) becomes inert. Fails
    /// with [`ProfilerError::NotActive`] when no scope is live.
    pub fn end(&self) -> Result<EventSet, ProfilerError> {
        finish_scope(&self.shared, None)
    }

    /// True while a scope is live
    pub fn is_active(&self) -> bool {
        self.shared
            .active
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Recorder handle bound to this profiler
    pub fn recorder(&self) -> Recorder {
        Recorder {
            shared: self.shared.clone(),
        }
    }
}

/// Guard for one live profiling scope
///
/// Sealing happens exactly once, whether through [`Scope::end`],
/// [`Profiler::end`], or the guard dropping during unwinding. When the
/// guard seals on the drop path the captured events are only observable
/// through the finalizer.
pub struct Scope {
    shared: Arc<ProfilerShared>,
    state: Arc<ScopeState>,
    finished: bool,
}

impl Scope {
    /// Recorder handle bound to the owning profiler
    pub fn recorder(&self) -> Recorder {
        Recorder {
            shared: self.shared.clone(),
        }
    }

    /// Seal the scope and take the captured events
    ///
    /// Fails with [`ProfilerError::NotActive`] when the scope was already
    /// ended through the profiler.
    pub fn end(mut self) -> Result<EventSet, ProfilerError> {
        self.finished = true;
        finish_scope(&self.shared, Some(&self.state))
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // unwind or early-return path: seal and finalize, discard the set
        let _ = finish_scope(&self.shared, Some(&self.state));
    }
}

/// Seal the live scope (or the specific one in `expect`), run the finalizer,
/// and hand the events back
fn finish_scope(
    shared: &ProfilerShared,
    expect: Option<&Arc<ScopeState>>,
) -> Result<EventSet, ProfilerError> {
    let state = {
        let mut slot = shared.active.write().unwrap_or_else(|e| e.into_inner());
        let take = match (slot.as_ref(), expect) {
            (Some(live), Some(wanted)) => Arc::ptr_eq(live, wanted),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if take {
            slot.take()
        } else {
            None
        }
    };
    let Some(state) = state else {
        return Err(ProfilerError::NotActive);
    };

    let events = state.seal();
    if events.dropped > 0 {
        warn!("{} events were dropped during capture", events.dropped);
    }
    info!(
        "profiling scope sealed: {} events over {:.3} ms",
        events.len(),
        events.span_ns() as f64 / 1e6
    );

    // finalizer failures are reported, never propagated; the caller still
    // gets the sealed set
    if let Some(finalizer) = state.config.on_finalize.as_ref() {
        if let Err(e) = finalizer.finalize(&events) {
            warn!("trace finalizer failed: {:#}", e);
        }
    }

    Ok(events)
}

/// Profile one unit of work with a fresh profiler
///
/// Opens a scope around `work`, hands it a recorder, and returns the work's
/// output together with the sealed events. A panic inside `work` still seals
/// and finalizes the scope before unwinding continues.
pub fn profile<T>(
    config: Config,
    work: impl FnOnce(&Recorder) -> T,
) -> Result<(T, EventSet), ProfilerError> {
    let profiler = Profiler::new();
    let scope = profiler.begin(config)?;
    let recorder = scope.recorder();
    let output = work(&recorder);
    let events = scope.end()?;
    Ok((output, events))
}
