//! Per-(class, message) interception state.
//!
//! A [`DispatchRecord`] exists for every message the engine has swapped. It
//! keeps the saved original implementation, the trampoline that replaced it,
//! the hook slots, the decoded signature and the call statistics.
//!
//! Everything the trampoline touches on the call path is either immutable
//! after install or atomic, so concurrent calls on different threads never
//! contend on the record. Hook slots and owners sit behind `RwLock`s that
//! are only written by install/uninstall.

use crate::callback::{Callback, HookKind};
use crate::decoder::Signature;
use fxhash::FxHashSet;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use xtrace_runtime::{Class, ClassId, Imp, ObjectId, Selector};

/// Identifies a record: the class whose table was swapped and the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Class that declares the message
    pub class: ClassId,
    /// The intercepted message
    pub selector: Selector,
}

/// Hook slots of a record.
#[derive(Debug, Clone, Default)]
pub(crate) struct Hooks {
    pub before: Option<Callback>,
    pub replace: Option<Callback>,
    pub after: Option<Callback>,
}

impl Hooks {
    pub(crate) fn set(&mut self, kind: HookKind, callback: Option<Callback>) {
        match kind {
            HookKind::Log => {}
            HookKind::Before => self.before = callback,
            HookKind::Replace => self.replace = callback,
            HookKind::After => self.after = callback,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.before.is_none() && self.replace.is_none() && self.after.is_none()
    }
}

/// Call statistics, all in nanoseconds since the engine was created.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    entered: AtomicU64,
    elapsed: AtomicU64,
    call_count: AtomicU64,
}

impl Stats {
    /// Records the start of a call.
    pub(crate) fn enter(&self, now: Duration) {
        self.entered
            .fetch_max(saturating_nanos(now), Ordering::Relaxed);
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds one call's duration.
    pub(crate) fn add_elapsed(&self, elapsed: Duration) {
        self.elapsed
            .fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entered: Duration::from_nanos(self.entered.load(Ordering::Relaxed)),
            elapsed: Duration::from_nanos(self.elapsed.load(Ordering::Relaxed)),
            call_count: self.call_count.load(Ordering::Relaxed),
        }
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time copy of a record's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Time of the most recent entry, relative to engine creation
    pub entered: Duration,
    /// Total time spent producing results
    pub elapsed: Duration,
    /// Number of calls
    pub call_count: u64,
}

/// Interception state for one (class, message).
pub struct DispatchRecord {
    key: RecordKey,
    class: Class,
    types: Arc<str>,
    pub(crate) original: Imp,
    pub(crate) interceptor: Imp,
    pub(crate) signature: Signature,
    pub(crate) hooks: RwLock<Hooks>,
    pub(crate) owners: RwLock<FxHashSet<ClassId>>,
    depth: usize,
    pub(crate) stats: Stats,
    last_receiver: AtomicU64,
    pub(crate) logged: AtomicBool,
    pub(crate) calling_back: AtomicUsize,
}

impl DispatchRecord {
    pub(crate) fn new(
        class: Class,
        selector: Selector,
        types: Arc<str>,
        original: Imp,
        interceptor: Imp,
        signature: Signature,
        depth: usize,
    ) -> Self {
        DispatchRecord {
            key: RecordKey {
                class: class.id(),
                selector,
            },
            class,
            types,
            original,
            interceptor,
            signature,
            hooks: RwLock::new(Hooks::default()),
            owners: RwLock::new(FxHashSet::default()),
            depth,
            stats: Stats::default(),
            last_receiver: AtomicU64::new(0),
            logged: AtomicBool::new(false),
            calling_back: AtomicUsize::new(0),
        }
    }

    /// The record's key.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// Class whose dispatch table holds the trampoline.
    pub(crate) fn class(&self) -> Class {
        self.class
    }

    /// Returns true while at least one trace root wants calls logged.
    pub(crate) fn is_logging(&self) -> bool {
        !self.owners.read().is_empty()
    }

    pub(crate) fn set_last_receiver(&self, id: ObjectId) {
        self.last_receiver.store(id.as_u64(), Ordering::Relaxed);
    }

    /// Snapshot for diagnostics.
    pub(crate) fn info(&self) -> RecordInfo {
        let hooks = self.hooks.read();
        let mut owners: Vec<ClassId> = self.owners.read().iter().copied().collect();
        owners.sort();
        RecordInfo {
            class: self.class,
            selector: self.key.selector,
            method_types: self.types.to_string(),
            return_type: self.signature.ret.type_name.clone(),
            original: self.original.clone(),
            interceptor: self.interceptor.clone(),
            has_before: hooks.before.is_some(),
            has_replace: hooks.replace.is_some(),
            has_after: hooks.after.is_some(),
            signature: self.signature.clone(),
            stats: self.stats.snapshot(),
            logged: self.logged.load(Ordering::Relaxed),
            calling_back: self.calling_back.load(Ordering::Relaxed),
            depth: self.depth,
            last_receiver: ObjectId::from_u64(self.last_receiver.load(Ordering::Relaxed)),
            owners,
        }
    }
}

impl fmt::Debug for DispatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRecord")
            .field("class", &self.class.name())
            .field("selector", &self.key.selector)
            .field("types", &&*self.types)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of a [`DispatchRecord`].
#[derive(Debug, Clone)]
pub struct RecordInfo {
    /// Class whose table holds the trampoline
    pub class: Class,
    /// The intercepted message
    pub selector: Selector,
    /// Method type encoding
    pub method_types: String,
    /// Return type name
    pub return_type: String,
    /// Saved original implementation
    pub original: Imp,
    /// The installed trampoline
    pub interceptor: Imp,
    /// A before hook is set
    pub has_before: bool,
    /// A replace hook is set
    pub has_replace: bool,
    /// An after hook is set
    pub has_after: bool,
    /// Decoded argument layout
    pub signature: Signature,
    /// Call statistics
    pub stats: StatsSnapshot,
    /// The most recent completed call was logged
    pub logged: bool,
    /// Threads currently running a hook of this record
    pub calling_back: usize,
    /// Ancestor level at which `trace_class` installed the record
    pub depth: usize,
    /// Receiver of the most recent call, if any
    pub last_receiver: Option<ObjectId>,
    /// Trace roots that requested logging, sorted
    pub owners: Vec<ClassId>,
}
