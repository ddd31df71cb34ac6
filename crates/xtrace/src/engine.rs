//! The interception engine.
//!
//! [`Xtrace`] swaps a trampoline into a class's dispatch table in place of a
//! method's implementation, keeping the original in a [`DispatchRecord`].
//! The trampoline runs hooks, times the original, and emits trace lines,
//! then returns the (possibly substituted) result to the caller.
//!
//! # Locking
//!
//! All engine state sits behind one `RwLock`. Install and uninstall hold the
//! write lock for the whole swap. The trampoline takes the read lock only
//! long enough to clone what it needs (record, config, sink, delegate) and
//! never holds it while user code runs, so hooks and traced methods may
//! themselves install or uninstall.
//!
//! # Failure policy
//!
//! Nothing on the call path returns an error or panics. A missing record
//! forwards to the implementation that was current when the trampoline was
//! built; a hook that cannot run is skipped with a log line.

use crate::callback::{self, Callback, HookKind};
use crate::config::{LineOptions, TraceConfig};
use crate::decoder::decode;
use crate::error::{Error, Result};
use crate::format;
use crate::guard::{self, CallingBack, Nested, Suppress};
use crate::record::{DispatchRecord, RecordInfo, RecordKey};
use crate::sink::{DELEGATE_OUTPUT_SELECTOR, EventKind, LogSink, TraceEvent, TraceSink};
use crate::target::InstanceTag;
use crate::value;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;
use xtrace_runtime::{AssociationKey, Class, ClassId, Frame, Imp, Object, ObjectId, Selector};

/// How many times an install re-reads the dispatch table when another
/// writer swaps the implementation between the read and the swap.
const INSTALL_ATTEMPTS: usize = 3;

/// Result of an install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// A new record was created and the trampoline swapped in
    Installed,
    /// The existing record was updated in place
    Updated,
    /// The class is excluded; nothing changed
    Excluded,
}

/// Mutable engine state, guarded by [`Shared::state`].
pub(crate) struct EngineState {
    pub(crate) config: Arc<TraceConfig>,
    pub(crate) sink: Arc<dyn TraceSink>,
    pub(crate) delegate: Option<Object>,
    /// Records by class, then message
    pub(crate) classes: FxHashMap<ClassId, FxHashMap<Selector, Arc<DispatchRecord>>>,
    /// Records each trace root owns
    pub(crate) roots: FxHashMap<ClassId, Vec<RecordKey>>,
    /// Roots created by `trace_instance` rather than `trace_class`
    pub(crate) implicit_roots: FxHashSet<ClassId>,
    pub(crate) excluded: FxHashSet<ClassId>,
    pub(crate) instances: FxHashSet<ObjectId>,
}

impl EngineState {
    pub(crate) fn record(&self, key: RecordKey) -> Option<&Arc<DispatchRecord>> {
        self.classes.get(&key.class)?.get(&key.selector)
    }

    fn remove_record(&mut self, key: RecordKey) -> Option<Arc<DispatchRecord>> {
        let records = self.classes.get_mut(&key.class)?;
        let record = records.remove(&key.selector);
        if records.is_empty() {
            self.classes.remove(&key.class);
        }
        record
    }
}

pub(crate) struct Shared {
    pub(crate) state: RwLock<EngineState>,
    /// Associated-value key used to tag traced instances
    pub(crate) marker: AssociationKey,
    epoch: Instant,
}

/// What one trampoline invocation needs, cloned out of the engine state.
struct CallContext {
    record: Arc<DispatchRecord>,
    config: Arc<TraceConfig>,
    sink: Arc<dyn TraceSink>,
    delegate: Option<Object>,
    instances_active: bool,
}

fn delegate_output_selector() -> Option<Selector> {
    static SELECTOR: OnceLock<Option<Selector>> = OnceLock::new();
    *SELECTOR.get_or_init(|| Selector::from_str(DELEGATE_OUTPUT_SELECTOR).ok())
}

/// Builds the interceptor installed for `key`.
///
/// `fallback` is the implementation the trampoline replaced; it is called
/// directly if the engine is gone or no longer has a record for `key`.
fn trampoline(shared: Weak<Shared>, key: RecordKey, fallback: Imp) -> Imp {
    Imp::new(move |receiver, cmd, args| match shared.upgrade() {
        Some(shared) => shared.invoke(key, &fallback, receiver, cmd, args),
        None => fallback.call(receiver, cmd, args),
    })
}

/// Puts the original implementation back if our trampoline is still the
/// current one.
fn restore(record: &DispatchRecord) {
    let key = record.key();
    let class = record.class();
    match class.compare_and_replace(&key.selector, &record.interceptor, record.original.clone()) {
        Ok(true) => log::debug!("[{} {}] original restored", class.name(), key.selector),
        Ok(false) => log::warn!(
            "[{} {}] was replaced by another implementation after install; leaving it in place",
            class.name(),
            key.selector
        ),
        Err(e) => log::warn!("[{} {}] restore failed: {e}", class.name(), key.selector),
    }
}

impl Shared {
    fn context(&self, key: RecordKey) -> Option<CallContext> {
        let state = self.state.read();
        let record = Arc::clone(state.record(key)?);
        Some(CallContext {
            record,
            config: Arc::clone(&state.config),
            sink: Arc::clone(&state.sink),
            delegate: state.delegate.clone(),
            instances_active: !state.instances.is_empty(),
        })
    }

    /// Decides whether this call is logged and with which options.
    fn line_options(&self, ctx: &CallContext, receiver: &Object) -> Option<LineOptions> {
        if guard::is_suppressed() || !ctx.record.is_logging() {
            return None;
        }
        let tag = receiver.associated_as::<InstanceTag>(self.marker);
        if ctx.instances_active && tag.is_none() {
            // Instance tracing takes priority: only tagged receivers log
            return None;
        }
        Some(LineOptions::resolve(&ctx.config, tag.as_deref().map(InstanceTag::options)))
    }

    fn emit(&self, ctx: &CallContext, receiver: &Object, event: &TraceEvent) {
        if let (Some(delegate), Some(output)) = (&ctx.delegate, delegate_output_selector()) {
            if delegate.class().responds_to(&output) {
                let _quiet = Suppress::enter();
                let frame = Frame::new()
                    .with_cstr(Some(event.line.as_str()))
                    .with_object(Some(receiver));
                match delegate.send(&output, &frame) {
                    Ok(_) => return,
                    Err(e) => log::warn!("delegate output failed: {e}; using sink"),
                }
            }
        }
        ctx.sink.emit(event);
    }

    /// The call path of every trampoline.
    fn invoke(
        &self,
        key: RecordKey,
        fallback: &Imp,
        receiver: &Object,
        cmd: Selector,
        args: &Frame,
    ) -> Frame {
        let Some(ctx) = self.context(key) else {
            log::trace!("[{cmd}] no record, forwarding");
            return fallback.call(receiver, cmd, args);
        };
        let record = &*ctx.record;

        // A hook of this record is running on this thread: no hooks, no log
        if guard::is_calling_back(key) {
            return record.original.call(receiver, cmd, args);
        }

        record.set_last_receiver(receiver.id());
        let hooks = record.hooks.read().clone();
        let options = self.line_options(&ctx, receiver);
        let depth = guard::call_depth();

        if let Some(opts) = options {
            let values = opts
                .show_arguments
                .then(|| value::read_args(&record.signature, args));
            let line = format::entry_line(
                depth,
                receiver,
                cmd,
                &record.signature,
                values.as_deref(),
                opts.describe_values,
            );
            let event = TraceEvent {
                kind: EventKind::Entry,
                receiver: receiver.id(),
                selector: cmd,
                depth,
                line,
            };
            self.emit(&ctx, receiver, &event);
        }
        let nested = options.map(|_| Nested::enter());

        if let Some(before) = &hooks.before {
            let _hook = CallingBack::enter(record);
            before.invoke(&callback::receiver_frame(receiver, args));
        }

        let started = Instant::now();
        record.stats.enter(started.duration_since(self.epoch));
        let replaced = hooks.replace.as_ref().and_then(|replace| {
            let _hook = CallingBack::enter(record);
            replace.invoke(&callback::receiver_frame(receiver, args))
        });
        let mut result = match replaced {
            Some(ret) => ret,
            None => record.original.call(receiver, cmd, args),
        };
        let elapsed = started.elapsed();
        record.stats.add_elapsed(elapsed);

        if let Some(after) = &hooks.after {
            let frame = callback::after_frame(&result, receiver, args);
            let substitute = {
                let _hook = CallingBack::enter(record);
                after.invoke(&frame)
            };
            if let Some(ret) = substitute.filter(|ret| !ret.is_empty()) {
                result = ret;
            }
        }
        drop(nested);

        if let Some(opts) = options.filter(|opts| !opts.hide_returns) {
            let ret = value::read_return(&record.signature, &result);
            let event = TraceEvent {
                kind: EventKind::Return,
                receiver: receiver.id(),
                selector: cmd,
                depth,
                line: format::return_line(depth, &ret, opts.describe_values, elapsed),
            };
            self.emit(&ctx, receiver, &event);
        }
        record.logged.store(options.is_some(), Ordering::Relaxed);
        result
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for record in state.classes.values().flat_map(|records| records.values()) {
            restore(record);
        }
    }
}

/// A message-interception engine.
///
/// Cloning is shallow: clones drive the same engine. When the last clone is
/// dropped every intercepted method gets its original implementation back.
///
/// # Example
///
/// ```rust
/// use std::str::FromStr;
/// use std::sync::Arc;
/// use xtrace::{HookKind, MemorySink, TraceConfig, Xtrace};
/// use xtrace_runtime::{Class, Frame, Imp, Method, Object, Selector};
///
/// let class = Class::new_root("DocEngineCounter").unwrap();
/// let sel = Selector::from_str("count").unwrap();
/// let original = Imp::new(|_, _, _| Frame::returning(3_i32));
/// class.add_method(Method::new(sel, "i@:", original.clone()).unwrap()).unwrap();
///
/// let sink = Arc::new(MemorySink::new());
/// let xtrace = Xtrace::with_sink(TraceConfig::default(), sink.clone());
/// xtrace.install(&class, &sel, None, HookKind::Log).unwrap();
///
/// let obj = Object::new(&class);
/// let ret = obj.send(&sel, &Frame::new()).unwrap();
/// assert_eq!(ret.read::<i32>(0), Some(3));
/// assert_eq!(sink.lines().len(), 2);
///
/// assert!(xtrace.uninstall(&class, &sel));
/// assert!(class.method(&sel).unwrap().imp.ptr_eq(&original));
/// ```
#[derive(Clone)]
pub struct Xtrace {
    pub(crate) shared: Arc<Shared>,
}

impl Xtrace {
    /// Creates an engine writing trace lines through the `log` facade.
    #[must_use]
    pub fn new(config: TraceConfig) -> Self {
        Self::with_sink(config, Arc::new(LogSink))
    }

    /// Creates an engine writing trace lines to `sink`.
    #[must_use]
    pub fn with_sink(config: TraceConfig, sink: Arc<dyn TraceSink>) -> Self {
        Xtrace {
            shared: Arc::new(Shared {
                state: RwLock::new(EngineState {
                    config: Arc::new(config),
                    sink,
                    delegate: None,
                    classes: FxHashMap::default(),
                    roots: FxHashMap::default(),
                    implicit_roots: FxHashSet::default(),
                    excluded: FxHashSet::default(),
                    instances: FxHashSet::default(),
                }),
                marker: AssociationKey::unique(),
                epoch: Instant::now(),
            }),
        }
    }

    /// Creates an engine configured from the `XTRACE_*` environment.
    ///
    /// # Errors
    ///
    /// See [`TraceConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(TraceConfig::from_env()?))
    }

    /// Replaces the configuration. Calls already in flight finish with the
    /// previous snapshot.
    pub fn configure(&self, config: TraceConfig) {
        self.shared.state.write().config = Arc::new(config);
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<TraceConfig> {
        Arc::clone(&self.shared.state.read().config)
    }

    /// Replaces the sink trace lines are written to.
    pub fn set_sink(&self, sink: Arc<dyn TraceSink>) {
        self.shared.state.write().sink = sink;
    }

    /// Registers the delegate. The last registration wins.
    ///
    /// The delegate provides hook callbacks (see [`Xtrace::hook`]) and, if it
    /// implements `xtrace:forInstance:` (`v@:*@`), receives every trace line
    /// instead of the sink.
    pub fn set_delegate(&self, delegate: &Object) {
        let previous = self.shared.state.write().delegate.replace(delegate.clone());
        drop(previous);
    }

    /// Removes the delegate.
    pub fn clear_delegate(&self) {
        let previous = self.shared.state.write().delegate.take();
        drop(previous);
    }

    /// The registered delegate.
    #[must_use]
    pub fn delegate(&self) -> Option<Object> {
        self.shared.state.read().delegate.clone()
    }

    /// Intercepts `message` on `class`.
    ///
    /// `message` must be declared by `class` itself, not inherited. The first
    /// install for a (class, message) swaps the trampoline in; later installs
    /// only update the record. [`HookKind::Log`] turns logging on for the
    /// record; the other kinds set (or, with `None`, clear) that hook slot.
    ///
    /// # Errors
    ///
    /// - [`Error::SelectorNotFound`] if `class` does not declare `message`
    /// - [`Error::UnexpectedCallback`] if `callback` is given with
    ///   [`HookKind::Log`]
    /// - [`Error::InstallRaced`] if the implementation kept changing while
    ///   the trampoline was being swapped in
    pub fn install(
        &self,
        class: &Class,
        message: &Selector,
        callback: Option<Callback>,
        kind: HookKind,
    ) -> Result<InstallOutcome> {
        if kind == HookKind::Log && callback.is_some() {
            return Err(Error::UnexpectedCallback {
                class: class.name().to_string(),
                selector: message.name().to_string(),
            });
        }
        let owner = (kind == HookKind::Log).then(|| class.id());
        let mut state = self.shared.state.write();
        self.install_locked(&mut state, *class, *message, kind, callback, owner, 0)
    }

    /// Installs a hook whose callback is `callback` on the registered
    /// delegate.
    ///
    /// # Errors
    ///
    /// - [`Error::NoDelegate`] if no delegate is registered
    /// - [`Error::CallbackNotFound`] if the delegate lacks `callback`
    /// - anything [`Xtrace::install`] returns
    pub fn hook(
        &self,
        class: &Class,
        message: &Selector,
        kind: HookKind,
        callback: &Selector,
    ) -> Result<InstallOutcome> {
        let delegate = self.delegate().ok_or_else(|| Error::NoDelegate {
            selector: callback.name().to_string(),
        })?;
        let callback = Callback::resolve(&delegate, *callback)?;
        self.install(class, message, Some(callback), kind)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn install_locked(
        &self,
        state: &mut EngineState,
        class: Class,
        message: Selector,
        kind: HookKind,
        callback: Option<Callback>,
        owner: Option<ClassId>,
        level: usize,
    ) -> Result<InstallOutcome> {
        if state.excluded.contains(&class.id()) {
            log::debug!("[{} {message}] class excluded, not installing", class.name());
            return Ok(InstallOutcome::Excluded);
        }

        let key = RecordKey {
            class: class.id(),
            selector: message,
        };
        let (record, outcome) = match state.record(key) {
            Some(record) => (Arc::clone(record), InstallOutcome::Updated),
            None => {
                let record = self.swap_in(class, message, level)?;
                state
                    .classes
                    .entry(class.id())
                    .or_default()
                    .insert(message, Arc::clone(&record));
                (record, InstallOutcome::Installed)
            }
        };

        record.hooks.write().set(kind, callback);
        if let Some(owner) = owner {
            if record.owners.write().insert(owner) {
                state.roots.entry(owner).or_default().push(key);
            }
        }
        Ok(outcome)
    }

    fn swap_in(&self, class: Class, message: Selector, level: usize) -> Result<Arc<DispatchRecord>> {
        let key = RecordKey {
            class: class.id(),
            selector: message,
        };
        for _ in 0..INSTALL_ATTEMPTS {
            let Some(method) = class.method(&message) else {
                return Err(Error::SelectorNotFound {
                    class: class.name().to_string(),
                    selector: message.name().to_string(),
                });
            };
            let signature = decode(message, &method.types);
            let interceptor = trampoline(Arc::downgrade(&self.shared), key, method.imp.clone());
            if class.compare_and_replace(&message, &method.imp, interceptor.clone())? {
                log::debug!(
                    "[{} {message}] trampoline installed ({} args decoded)",
                    class.name(),
                    signature.supported_count()
                );
                return Ok(Arc::new(DispatchRecord::new(
                    class,
                    message,
                    method.types,
                    method.imp,
                    interceptor,
                    signature,
                    level,
                )));
            }
        }
        Err(Error::InstallRaced {
            class: class.name().to_string(),
            selector: message.name().to_string(),
        })
    }

    /// Removes interception of `message` on `class`, restoring the original
    /// implementation.
    ///
    /// If another implementation replaced the trampoline since install, that
    /// implementation is left in place and a warning is logged.
    ///
    /// Returns `false` if there was nothing to remove.
    pub fn uninstall(&self, class: &Class, message: &Selector) -> bool {
        let key = RecordKey {
            class: class.id(),
            selector: *message,
        };
        let mut state = self.shared.state.write();
        Self::uninstall_locked(&mut state, key)
    }

    pub(crate) fn uninstall_locked(state: &mut EngineState, key: RecordKey) -> bool {
        let Some(record) = state.remove_record(key) else {
            return false;
        };
        for keys in state.roots.values_mut() {
            keys.retain(|k| *k != key);
        }
        state.roots.retain(|_, keys| !keys.is_empty());
        restore(&record);
        true
    }

    /// Snapshot of the record for `message` on `class`.
    #[must_use]
    pub fn info_for(&self, class: &Class, message: &Selector) -> Option<RecordInfo> {
        let key = RecordKey {
            class: class.id(),
            selector: *message,
        };
        self.shared.state.read().record(key).map(|record| record.info())
    }

    /// Returns true if `message` on `class` is intercepted.
    #[must_use]
    pub fn is_installed(&self, class: &Class, message: &Selector) -> bool {
        let key = RecordKey {
            class: class.id(),
            selector: *message,
        };
        self.shared.state.read().record(key).is_some()
    }

    /// Number of intercepted (class, message) pairs.
    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.shared.state.read().classes.values().map(|records| records.len()).sum()
    }

    /// Classes with at least one intercepted message.
    #[must_use]
    pub fn traced_classes(&self) -> Vec<Class> {
        let mut classes: Vec<Class> = self
            .shared
            .state
            .read()
            .classes
            .keys()
            .filter_map(|id| Class::from_id(*id))
            .collect();
        classes.sort_by_key(Class::id);
        classes
    }
}

impl fmt::Debug for Xtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Xtrace")
            .field("classes", &state.classes.len())
            .field("roots", &state.roots.len())
            .field("excluded", &state.excluded.len())
            .field("instances", &state.instances.len())
            .finish_non_exhaustive()
    }
}
