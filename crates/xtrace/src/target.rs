//! Choosing what to trace.
//!
//! A *trace root* is a class passed to [`Xtrace::trace_class`] (or the class
//! of an instance passed to [`Xtrace::trace_instance`]). Tracing a root walks
//! the root and its superclasses and installs a logging record for every
//! message that passes the filters. Each record remembers which roots asked
//! for it, so untracing one root leaves records other roots still want.

use crate::callback::HookKind;
use crate::config::{InstanceOptions, TraceConfig};
use crate::decoder::decode;
use crate::engine::{EngineState, InstallOutcome, Shared, Xtrace};
use std::sync::{Arc, Weak};
use xtrace_runtime::{Class, ClassId, Method, Object, ObjectId};

/// Messages never traced: rendering and teardown would recurse into the
/// tracer itself.
const BUILTIN_EXCLUSIONS: &[&str] = &["description", "dealloc"];

/// How far up the class chain [`Xtrace::trace_class`] goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// The class and every superclass
    #[default]
    All,
    /// The class and `n - 1` superclasses; `Levels(1)` is the class alone
    Levels(usize),
}

impl Depth {
    fn limit(self) -> usize {
        match self {
            Depth::All => usize::MAX,
            Depth::Levels(n) => n,
        }
    }
}

/// Attached to a traced instance under the engine's marker key.
///
/// The tag lives exactly as long as the instance is traced: it is dropped
/// by [`Xtrace::untrace_instance`] or together with the instance, and its
/// `Drop` tells the engine either way.
pub(crate) struct InstanceTag {
    options: InstanceOptions,
    instance: ObjectId,
    engine: Weak<Shared>,
}

impl InstanceTag {
    pub(crate) fn options(&self) -> &InstanceOptions {
        &self.options
    }
}

impl Drop for InstanceTag {
    fn drop(&mut self) {
        if let Some(shared) = self.engine.upgrade() {
            shared.release_instance(self.instance);
        }
    }
}

impl Shared {
    /// Forgets a traced instance whose tag went away.
    ///
    /// Must not be called with the state lock held.
    fn release_instance(&self, id: ObjectId) {
        let retagged = Object::from_id(id)
            .is_some_and(|instance| instance.associated(self.marker).is_some());
        if retagged {
            return;
        }
        let mut state = self.state.write();
        state.instances.remove(&id);
        prune_instances(&mut state);
        if state.instances.is_empty() {
            let implicit: Vec<ClassId> = state.implicit_roots.drain().collect();
            for root in implicit {
                log::debug!("no traced instance left, releasing implicit root {root:?}");
                Xtrace::untrace_root_locked(&mut state, root);
            }
        }
    }
}

/// Returns true if `method` of `class` should be logged under `config`.
fn admits(config: &TraceConfig, class: Class, method: &Method) -> bool {
    let name = method.selector.name();
    if BUILTIN_EXCLUSIONS.contains(&name) {
        return false;
    }
    if !config.include_properties && class.is_property_accessor(&method.selector) {
        return false;
    }
    if !config.filters.allows_method(name) {
        return false;
    }
    !config
        .filters
        .excludes_signature(&decode(method.selector, &method.types))
}

impl Xtrace {
    /// Traces every message of `class` and its superclasses, down to
    /// `depth`, that passes the configured filters.
    ///
    /// Excluded classes in the chain are skipped; the walk continues past
    /// them. Returns the number of records this root now logs. Tracing the
    /// same root again installs nothing new.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::str::FromStr;
    /// use xtrace::{Depth, TraceConfig, Xtrace};
    /// use xtrace_runtime::{Class, Frame, Imp, Method, Selector};
    ///
    /// let base = Class::new_root("DocTargetBase").unwrap();
    /// let child = Class::new("DocTargetChild", &base).unwrap();
    /// for (class, name) in [(base, "reset"), (child, "run")] {
    ///     let sel = Selector::from_str(name).unwrap();
    ///     let imp = Imp::new(|_, _, _| Frame::new());
    ///     class.add_method(Method::new(sel, "v@:", imp).unwrap()).unwrap();
    /// }
    ///
    /// let xtrace = Xtrace::new(TraceConfig::default());
    /// assert_eq!(xtrace.trace_class(&child, Depth::Levels(1)), 1);
    /// assert_eq!(xtrace.trace_class(&child, Depth::All), 2);
    /// ```
    pub fn trace_class(&self, class: &Class, depth: Depth) -> usize {
        let mut state = self.shared.state.write();
        state.implicit_roots.remove(&class.id());
        self.trace_class_locked(&mut state, *class, depth)
    }

    fn trace_class_locked(
        &self,
        state: &mut EngineState,
        root: Class,
        depth: Depth,
    ) -> usize {
        let config = Arc::clone(&state.config);
        for (level, class) in root.ancestors().take(depth.limit()).enumerate() {
            if state.excluded.contains(&class.id()) {
                log::debug!("{}: excluded, skipping level {level}", class.name());
                continue;
            }
            for method in class.declared_methods() {
                if !admits(&config, class, &method) {
                    log::trace!("[{} {}] filtered out", class.name(), method.selector);
                    continue;
                }
                match self.install_locked(
                    state,
                    class,
                    method.selector,
                    HookKind::Log,
                    None,
                    Some(root.id()),
                    level,
                ) {
                    Ok(InstallOutcome::Installed | InstallOutcome::Updated) => {}
                    Ok(InstallOutcome::Excluded) => break,
                    Err(e) => log::warn!("[{} {}] not traced: {e}", class.name(), method.selector),
                }
            }
        }
        let count = state.roots.get(&root.id()).map_or(0, Vec::len);
        log::debug!("{}: tracing {count} messages", root.name());
        count
    }

    /// Traces calls made on `instance` only.
    ///
    /// Same as [`Xtrace::trace_instance_with`] with no overrides.
    pub fn trace_instance(&self, instance: &Object) {
        self.trace_instance_with(instance, InstanceOptions::default());
    }

    /// Traces calls made on `instance`, with per-instance formatting
    /// overrides.
    ///
    /// While any live instance is traced, only calls on traced instances
    /// are logged. If the instance's class is not a trace root yet it
    /// becomes one, and stops being one once no traced instance is left,
    /// whether through [`Xtrace::untrace_instance`] or because the traced
    /// instances were dropped.
    pub fn trace_instance_with(&self, instance: &Object, options: InstanceOptions) {
        let tag = InstanceTag {
            options,
            instance: instance.id(),
            engine: Arc::downgrade(&self.shared),
        };
        let previous = instance.set_associated(self.shared.marker, Arc::new(tag));

        {
            let mut state = self.shared.state.write();
            state.instances.insert(instance.id());
            prune_instances(&mut state);

            let class = instance.class();
            if !state.roots.contains_key(&class.id()) && !state.excluded.contains(&class.id()) {
                self.trace_class_locked(&mut state, class, Depth::All);
                state.implicit_roots.insert(class.id());
            }
        }
        // The replaced tag sees the new one and leaves the instance traced
        drop(previous);
    }

    /// Stops tracing `instance`.
    ///
    /// Returns `false` if it was not traced.
    pub fn untrace_instance(&self, instance: &Object) -> bool {
        // Dropping the tag releases the instance
        instance.remove_associated(self.shared.marker).is_some()
    }

    /// Returns true if `instance` is traced by this engine.
    #[must_use]
    pub fn is_instance_traced(&self, instance: &Object) -> bool {
        instance.associated(self.shared.marker).is_some()
    }

    /// Stops tracing `class` as a root.
    ///
    /// Records other roots or hooks still use stay installed. Returns the
    /// number of records the root released.
    pub fn untrace_class(&self, class: &Class) -> usize {
        let mut state = self.shared.state.write();
        state.implicit_roots.remove(&class.id());
        Self::untrace_root_locked(&mut state, class.id())
    }

    fn untrace_root_locked(state: &mut EngineState, root: ClassId) -> usize {
        let Some(keys) = state.roots.remove(&root) else {
            return 0;
        };
        let released = keys.len();
        for key in keys {
            let Some(record) = state.record(key).cloned() else {
                continue;
            };
            let orphaned = {
                let mut owners = record.owners.write();
                owners.remove(&root);
                owners.is_empty()
            };
            if orphaned && record.hooks.read().is_empty() {
                Self::uninstall_locked(state, key);
            }
        }
        released
    }

    /// Excludes `class` from future tracing and installs.
    ///
    /// Records already installed on it stay.
    pub fn dont_trace(&self, class: &Class) {
        self.shared.state.write().excluded.insert(class.id());
    }

    /// Returns true if `class` was excluded with [`Xtrace::dont_trace`].
    #[must_use]
    pub fn is_excluded(&self, class: &Class) -> bool {
        self.shared.state.read().excluded.contains(&class.id())
    }
}

/// Forgets traced instances that no longer exist.
fn prune_instances(state: &mut EngineState) {
    state.instances.retain(|id| Object::is_live(*id));
}
