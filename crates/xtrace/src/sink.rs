//! Trace output.
//!
//! Every traced call produces an entry [`TraceEvent`] and, unless returns are
//! hidden, a return event. Events go to the delegate's
//! `xtrace:forInstance:` method when one is registered, otherwise to the
//! engine's [`TraceSink`].

use parking_lot::Mutex;
use xtrace_runtime::{ObjectId, Selector};

/// Delegate method that receives trace lines, encoded `v@:*@`: the line,
/// then the traced receiver.
pub const DELEGATE_OUTPUT_SELECTOR: &str = "xtrace:forInstance:";

/// Which half of a call an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Message received, before the implementation runs
    Entry,
    /// Implementation returned
    Return,
}

/// One formatted trace line with its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Entry or return
    pub kind: EventKind,
    /// Receiver of the traced message
    pub receiver: ObjectId,
    /// The traced message
    pub selector: Selector,
    /// Nesting depth of the call on its thread (0 = outermost traced call)
    pub depth: usize,
    /// The formatted line, indentation included
    pub line: String,
}

/// Destination for trace lines.
pub trait TraceSink: Send + Sync {
    /// Receives one event. Called on the traced thread, inline with the call.
    fn emit(&self, event: &TraceEvent);
}

/// Sink that writes each line through the `log` facade at info level,
/// target `"xtrace"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn emit(&self, event: &TraceEvent) {
        log::info!(target: "xtrace", "{}", event.line);
    }
}

/// Sink that keeps every event in memory.
///
/// # Example
///
/// ```rust
/// use xtrace::sink::{EventKind, MemorySink, TraceEvent, TraceSink};
/// use xtrace_runtime::{Class, Object, Selector};
/// use std::str::FromStr;
///
/// let sink = MemorySink::new();
/// let obj = Object::new(&Class::new_root("DocSinkReceiver").unwrap());
/// sink.emit(&TraceEvent {
///     kind: EventKind::Entry,
///     receiver: obj.id(),
///     selector: Selector::from_str("ping").unwrap(),
///     depth: 0,
///     line: "[<DocSinkReceiver#1> ping]".into(),
/// });
/// assert_eq!(sink.lines().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Snapshot of every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Snapshot of every line so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.line.clone()).collect()
    }

    /// Removes and returns every event so far.
    pub fn take(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Discards every event so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}
