//! Object allocation, identity and associated values.
//!
//! This module implements the object system with:
//! - Reference counting through `Arc`
//! - A stable numeric [`ObjectId`] per instance
//! - Class isa links for dynamic dispatch
//! - Associated values: per-object storage keyed by [`AssociationKey`]
//!
//! # Architecture
//!
//! Every live object is reachable from a global id table holding *weak*
//! references, so an id stored in a [`Frame`] can be resolved back to the
//! object while it is alive and safely resolves to `None` afterwards. The
//! entry is removed when the last strong reference is dropped.
//!
//! # Thread Safety
//!
//! Objects are `Send + Sync`. Associated values sit behind a `Mutex`; the
//! lock is never held while user code runs.

use crate::error::Result;
use crate::runtime::class::Class;
use crate::runtime::dispatch;
use crate::runtime::frame::Frame;
use crate::runtime::selector::Selector;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Unique identifier of an object. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(NonZeroU64);

impl ObjectId {
    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// Builds an id from its raw value; `0` is the nil id.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(ObjectId(id)),
            None => None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key for an associated value slot.
///
/// Keys are opaque; obtain distinct ones with [`AssociationKey::unique`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationKey(u64);

impl AssociationKey {
    /// Returns a key no other caller has been handed.
    #[must_use]
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        AssociationKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A value attached to an object.
pub type AssociatedValue = Arc<dyn Any + Send + Sync>;

struct ObjectInner {
    id: ObjectId,
    class: Class,
    associated: Mutex<FxHashMap<AssociationKey, AssociatedValue>>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        live().write().remove(&self.id);
    }
}

static LIVE: OnceLock<RwLock<FxHashMap<ObjectId, Weak<ObjectInner>>>> = OnceLock::new();

fn live() -> &'static RwLock<FxHashMap<ObjectId, Weak<ObjectInner>>> {
    LIVE.get_or_init(|| RwLock::new(FxHashMap::default()))
}

fn next_id() -> ObjectId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let raw = NEXT.fetch_add(1, Ordering::Relaxed);
    ObjectId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
}

/// A runtime instance.
///
/// Cloning is shallow: clones share identity and associated values.
///
/// # Example
///
/// ```rust
/// use xtrace_runtime::{AssociationKey, Class, Object};
/// use std::sync::Arc;
///
/// let class = Class::new_root("DocWidget").unwrap();
/// let obj = Object::new(&class);
/// assert_eq!(obj.class(), class);
///
/// let key = AssociationKey::unique();
/// obj.set_associated(key, Arc::new(7_u32));
/// assert_eq!(obj.associated_as::<u32>(key).as_deref(), Some(&7));
///
/// let id = obj.id();
/// assert!(Object::from_id(id).is_some());
/// drop(obj);
/// assert!(Object::from_id(id).is_none());
/// ```
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    /// Allocates a new instance of `class`.
    #[must_use]
    pub fn new(class: &Class) -> Self {
        let inner = Arc::new(ObjectInner {
            id: next_id(),
            class: *class,
            associated: Mutex::new(FxHashMap::default()),
        });
        live().write().insert(inner.id, Arc::downgrade(&inner));
        Object(inner)
    }

    /// Resolves a live object by id.
    #[must_use]
    pub fn from_id(id: ObjectId) -> Option<Object> {
        let weak = live().read().get(&id).cloned();
        weak.and_then(|weak| weak.upgrade()).map(Object)
    }

    /// Returns true if the object with `id` is still alive.
    ///
    /// Unlike [`Object::from_id`] this never takes a strong reference, so it
    /// cannot end up running the object's teardown.
    #[must_use]
    pub fn is_live(id: ObjectId) -> bool {
        live()
            .read()
            .get(&id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Returns the object's id.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Returns the object's class.
    #[must_use]
    pub fn class(&self) -> Class {
        self.0.class
    }

    /// Returns a weak handle that does not keep the object alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            id: self.0.id,
            inner: Arc::downgrade(&self.0),
        }
    }

    /// Current number of strong references.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Attaches `value` under `key`, returning the previous value.
    pub fn set_associated(
        &self,
        key: AssociationKey,
        value: AssociatedValue,
    ) -> Option<AssociatedValue> {
        self.0.associated.lock().insert(key, value)
    }

    /// Returns the value attached under `key`.
    #[must_use]
    pub fn associated(&self, key: AssociationKey) -> Option<AssociatedValue> {
        self.0.associated.lock().get(&key).cloned()
    }

    /// Returns the value attached under `key` if it has type `T`.
    #[must_use]
    pub fn associated_as<T: Any + Send + Sync>(&self, key: AssociationKey) -> Option<Arc<T>> {
        self.associated(key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Detaches and returns the value under `key`.
    pub fn remove_associated(&self, key: AssociationKey) -> Option<AssociatedValue> {
        // Bind first so the value is dropped after the lock is released
        let removed = self.0.associated.lock().remove(&key);
        removed
    }

    /// Sends a message to this object.
    ///
    /// Shorthand for [`dispatch::send_message`].
    ///
    /// # Errors
    ///
    /// See [`dispatch::send_message`].
    pub fn send(&self, selector: &Selector, args: &Frame) -> Result<Frame> {
        dispatch::send_message(self, selector, args)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("id", &self.id().as_u64())
            .finish()
    }
}

/// A non-owning reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    id: ObjectId,
    inner: Weak<ObjectInner>,
}

impl WeakObject {
    /// Id of the referenced object, valid even after it is gone.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the object if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(Object)
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObject")
            .field("id", &self.id.as_u64())
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
