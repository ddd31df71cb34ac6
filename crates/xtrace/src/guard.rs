//! Per-thread interception state.
//!
//! Three counters live in thread-local storage so concurrent calls on other
//! threads never see them:
//!
//! - the records whose hooks are currently running on this thread
//!   (re-entrant calls to them bypass interception),
//! - a suppression depth, raised while the engine itself sends messages
//!   (description rendering, delegate output) so those sends are not traced,
//! - the nesting depth of logged calls, used for indentation.
//!
//! Each counter is only touched through an RAII guard so it is restored on
//! every exit path.

use crate::record::{DispatchRecord, RecordKey};
use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;

thread_local! {
    static CALLING_BACK: RefCell<Vec<RecordKey>> = const { RefCell::new(Vec::new()) };
    static SUPPRESSED: Cell<u32> = const { Cell::new(0) };
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Returns true if a hook of the record `key` is running on this thread.
pub(crate) fn is_calling_back(key: RecordKey) -> bool {
    CALLING_BACK.with(|keys| keys.borrow().contains(&key))
}

/// Marks a record's hook as running on this thread.
pub(crate) struct CallingBack<'a> {
    record: &'a DispatchRecord,
}

impl<'a> CallingBack<'a> {
    pub(crate) fn enter(record: &'a DispatchRecord) -> Self {
        CALLING_BACK.with(|keys| keys.borrow_mut().push(record.key()));
        record.calling_back.fetch_add(1, Ordering::Relaxed);
        CallingBack { record }
    }
}

impl Drop for CallingBack<'_> {
    fn drop(&mut self) {
        let key = self.record.key();
        CALLING_BACK.with(|keys| {
            let mut keys = keys.borrow_mut();
            if let Some(pos) = keys.iter().rposition(|k| *k == key) {
                keys.remove(pos);
            }
        });
        self.record.calling_back.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Returns true while the engine is sending its own messages on this thread.
pub(crate) fn is_suppressed() -> bool {
    SUPPRESSED.with(Cell::get) > 0
}

/// Suppresses tracing on this thread while alive.
pub(crate) struct Suppress(());

impl Suppress {
    pub(crate) fn enter() -> Self {
        SUPPRESSED.with(|n| n.set(n.get() + 1));
        Suppress(())
    }
}

impl Drop for Suppress {
    fn drop(&mut self) {
        SUPPRESSED.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Current nesting depth of logged calls on this thread.
pub(crate) fn call_depth() -> usize {
    CALL_DEPTH.with(Cell::get)
}

/// Raises the nesting depth while alive.
pub(crate) struct Nested(());

impl Nested {
    pub(crate) fn enter() -> Self {
        CALL_DEPTH.with(|d| d.set(d.get() + 1));
        Nested(())
    }
}

impl Drop for Nested {
    fn drop(&mut self) {
        CALL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
