//! `Class` creation, method tables and inheritance.
//!
//! This module implements the class system with:
//! - `Class` registration and metadata
//! - Single inheritance
//! - `Method` registration, lookup and implementation replacement
//! - Declared properties (getter/setter pairs)
//!
//! # Architecture
//!
//! `Class`es are **globally registered** and never deallocated:
//! - Each class name maps to exactly one `Class` instance
//! - `Class`es are `'static` and cheap to copy around
//! - Each class owns a [`DispatchTable`] of its *own* methods; inherited
//!   methods are found by walking the superclass chain
//!
//! # Thread Safety
//!
//! The class registry and every dispatch table are guarded by `RwLock`s.
//! Replacing an implementation takes the table's write lock and bumps its
//! version, so a concurrent send either sees the old or the new [`Imp`],
//! never a torn entry.

use crate::error::{Error, Result};
use crate::runtime::encoding;
use crate::runtime::frame::Frame;
use crate::runtime::object::Object;
use crate::runtime::selector::Selector;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

type ImpFn = dyn Fn(&Object, Selector, &Frame) -> Frame + Send + Sync;

/// A method implementation.
///
/// All implementations share one calling convention: the receiver, the
/// selector the message was sent with, and a [`Frame`] holding the arguments.
/// The returned frame holds the return value (empty for `void`).
///
/// Identity is by allocation: two `Imp`s are the same implementation iff
/// [`Imp::ptr_eq`] holds, which is what
/// [`Class::compare_and_replace`] relies on.
#[derive(Clone)]
pub struct Imp(Arc<ImpFn>);

impl Imp {
    /// Wraps a closure as an implementation.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Object, Selector, &Frame) -> Frame + Send + Sync + 'static,
    {
        Imp(Arc::new(f))
    }

    /// Invokes the implementation.
    #[inline]
    pub fn call(&self, receiver: &Object, cmd: Selector, args: &Frame) -> Frame {
        (self.0)(receiver, cmd, args)
    }

    /// Returns true if both handles refer to the same implementation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Imp) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the implementation, for diagnostics.
    #[must_use]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imp({:#x})", self.addr())
    }
}

/// `Method` metadata: selector, implementation and type encoding.
#[derive(Clone)]
pub struct Method {
    /// `Method` selector
    pub selector: Selector,
    /// Implementation
    pub imp: Imp,
    /// Type encoding string (e.g., "v@:" for void return, id self, SEL _cmd)
    pub types: Arc<str>,
}

impl Method {
    /// Creates a method, checking that `types` is a method encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncoding`] if `types` lacks the return, self
    /// and _cmd slots.
    pub fn new(selector: Selector, types: &str, imp: Imp) -> Result<Self> {
        encoding::validate_encoding(types)?;
        Ok(Method {
            selector,
            imp,
            types: Arc::from(types),
        })
    }

    /// Number of explicit arguments in the encoding (excluding self and _cmd).
    #[must_use]
    pub fn arg_count(&self) -> usize {
        encoding::method_arg_count(&self.types)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("selector", &self.selector)
            .field("imp", &self.imp)
            .field("types", &&*self.types)
            .finish()
    }
}

/// A declared property: a getter and, unless read-only, a setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    /// Property name
    pub name: &'static str,
    /// Getter selector (same as the name)
    pub getter: Selector,
    /// Setter selector (`setName:`), `None` for read-only properties
    pub setter: Option<Selector>,
}

/// Dense numeric identifier of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Returns the raw index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Builds an id from a raw index. The id may not name a live class.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        ClassId(raw)
    }
}

/// A class's own methods, keyed by selector.
///
/// The version is bumped on every mutation so callers can detect that a
/// table changed under them.
#[derive(Default)]
struct DispatchTable {
    entries: FxHashMap<Selector, Method>,
    version: u64,
}

struct ClassInner {
    name: &'static str,
    id: ClassId,
    super_class: Option<Class>,
    table: RwLock<DispatchTable>,
    properties: RwLock<Vec<Property>>,
}

struct ClassRegistry {
    by_name: FxHashMap<&'static str, Class>,
    by_id: Vec<Class>,
}

static REGISTRY: OnceLock<RwLock<ClassRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<ClassRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ClassRegistry {
            by_name: FxHashMap::default(),
            by_id: Vec::with_capacity(64),
        })
    })
}

/// `Class` represents a runtime class definition with methods and inheritance.
///
/// # Example
///
/// ```rust
/// use xtrace_runtime::Class;
///
/// let root = Class::new_root("DocRootClass").unwrap();
/// let subclass = Class::new("DocSubclass", &root).unwrap();
///
/// assert!(subclass.is_subclass_of(&root));
/// assert_eq!(Class::named("DocSubclass"), Some(subclass));
/// ```
#[derive(Clone, Copy)]
pub struct Class(&'static ClassInner);

impl Class {
    /// Creates a new root class (no superclass).
    ///
    /// # Errors
    ///
    /// - [`Error::ClassAlreadyExists`] if a class with this name is already
    ///   registered
    /// - [`Error::ClassRegistryFull`] if no class index is left
    pub fn new_root(name: &str) -> Result<Self> {
        Self::create_class(name, None)
    }

    /// Creates a new class with a superclass.
    ///
    /// # Errors
    ///
    /// - [`Error::ClassAlreadyExists`] if a class with this name is already
    ///   registered
    /// - [`Error::ClassRegistryFull`] if no class index is left
    pub fn new(name: &str, super_class: &Class) -> Result<Self> {
        Self::create_class(name, Some(*super_class))
    }

    fn create_class(name: &str, super_class: Option<Class>) -> Result<Self> {
        let mut reg = registry().write();
        if reg.by_name.contains_key(name) {
            return Err(Error::ClassAlreadyExists {
                name: name.to_string(),
            });
        }

        let Ok(index) = u32::try_from(reg.by_id.len()) else {
            return Err(Error::ClassRegistryFull {
                name: name.to_string(),
            });
        };
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let class = Class(Box::leak(Box::new(ClassInner {
            name: leaked,
            id: ClassId(index),
            super_class,
            table: RwLock::new(DispatchTable::default()),
            properties: RwLock::new(Vec::new()),
        })));

        reg.by_name.insert(leaked, class);
        reg.by_id.push(class);
        log::trace!("class {name} registered as {index}");
        Ok(class)
    }

    /// Looks up a registered class by name.
    #[must_use]
    pub fn named(name: &str) -> Option<Class> {
        registry().read().by_name.get(name).copied()
    }

    /// Looks up a registered class by id.
    #[must_use]
    pub fn from_id(id: ClassId) -> Option<Class> {
        registry().read().by_id.get(id.0 as usize).copied()
    }

    /// Returns the class id.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.0.id
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Returns the superclass, or `None` for a root class.
    #[must_use]
    pub fn super_class(&self) -> Option<Class> {
        self.0.super_class
    }

    /// The class itself followed by each superclass up to the root.
    pub fn ancestors(self) -> impl Iterator<Item = Class> {
        std::iter::successors(Some(self), Class::super_class)
    }

    /// Returns true if `self` is `class` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(&self, class: &Class) -> bool {
        self.ancestors().any(|c| c == *class)
    }

    /// Adds a method to this class's own table, replacing any existing entry
    /// for the same selector.
    ///
    /// # Errors
    ///
    /// This function currently always returns `Ok(())`. The `Result` type is
    /// kept so registration can grow validation without an API change.
    pub fn add_method(&self, method: Method) -> Result<()> {
        let mut table = self.0.table.write();
        table.entries.insert(method.selector, method);
        table.version += 1;
        Ok(())
    }

    /// Declares a property.
    ///
    /// Declaration is metadata only: the accessor methods are added
    /// separately with [`Class::add_method`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] if `name` is empty.
    pub fn add_property(&self, name: &str, readonly: bool) -> Result<Property> {
        let getter = Selector::intern(name)?;
        let setter = if readonly {
            None
        } else {
            let mut chars = name.chars();
            let capitalized: String = chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect())
                .unwrap_or_default();
            Some(Selector::intern(&format!("set{capitalized}:"))?)
        };

        let property = Property {
            name: getter.name(),
            getter,
            setter,
        };
        self.0.properties.write().push(property);
        Ok(property)
    }

    /// Properties declared directly on this class.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.0.properties.read().clone()
    }

    /// Returns true if `selector` is a getter or setter of a property
    /// declared on this class or any ancestor.
    #[must_use]
    pub fn is_property_accessor(&self, selector: &Selector) -> bool {
        self.ancestors().any(|class| {
            class
                .0
                .properties
                .read()
                .iter()
                .any(|p| p.getter == *selector || p.setter == Some(*selector))
        })
    }

    /// Methods declared directly on this class, sorted by selector name.
    #[must_use]
    pub fn declared_methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> =
            self.0.table.read().entries.values().cloned().collect();
        methods.sort_by(|a, b| a.selector.cmp(&b.selector));
        methods
    }

    /// Looks up a method in this class's own table only.
    #[must_use]
    pub fn method(&self, selector: &Selector) -> Option<Method> {
        self.0.table.read().entries.get(selector).cloned()
    }

    /// Looks up a method by selector, walking the inheritance chain.
    ///
    /// Returns the class that declares the method along with it.
    #[must_use]
    pub fn lookup_method(&self, selector: &Selector) -> Option<(Class, Method)> {
        self.ancestors()
            .find_map(|class| class.method(selector).map(|m| (class, m)))
    }

    /// Returns true if instances of this class respond to `selector`.
    #[must_use]
    pub fn responds_to(&self, selector: &Selector) -> bool {
        self.ancestors()
            .any(|class| class.0.table.read().entries.contains_key(selector))
    }

    /// Replaces the implementation of a method declared on this class.
    ///
    /// Inherited methods cannot be replaced here; replace them on the class
    /// that declares them.
    ///
    /// Returns the previous implementation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if this class's own table has no
    /// entry for `selector`.
    pub fn replace_implementation(&self, selector: &Selector, imp: Imp) -> Result<Imp> {
        let mut table = self.0.table.write();
        let Some(method) = table.entries.get_mut(selector) else {
            return Err(self.not_found(selector));
        };
        let previous = std::mem::replace(&mut method.imp, imp);
        table.version += 1;
        log::debug!("[{} {selector}] implementation replaced (v{})", self.name(), table.version);
        Ok(previous)
    }

    /// Installs `imp` only if the current implementation is `expected`.
    ///
    /// Returns `Ok(true)` if the swap happened, `Ok(false)` if someone else
    /// replaced the implementation in the meantime (the table is untouched).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelectorNotFound`] if this class's own table has no
    /// entry for `selector`.
    pub fn compare_and_replace(
        &self,
        selector: &Selector,
        expected: &Imp,
        imp: Imp,
    ) -> Result<bool> {
        let mut table = self.0.table.write();
        let Some(method) = table.entries.get_mut(selector) else {
            return Err(self.not_found(selector));
        };
        if !method.imp.ptr_eq(expected) {
            log::debug!("[{} {selector}] implementation changed, not swapping", self.name());
            return Ok(false);
        }
        method.imp = imp;
        table.version += 1;
        log::debug!("[{} {selector}] implementation swapped (v{})", self.name(), table.version);
        Ok(true)
    }

    /// Current version of this class's own dispatch table.
    #[must_use]
    pub fn table_version(&self) -> u64 {
        self.0.table.read().version
    }

    fn not_found(&self, selector: &Selector) -> Error {
        Error::SelectorNotFound {
            class: self.name().to_string(),
            selector: selector.name().to_string(),
        }
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        // Pointer equality: same name = same class (registry guarantee)
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let super_name = self.super_class().map(|c| c.name());
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("super_class", &super_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn noop() -> Imp {
        Imp::new(|_, _, _| Frame::new())
    }

    fn returning(value: i32) -> Imp {
        Imp::new(move |_, _, _| Frame::returning(value))
    }

    #[test]
    fn test_root_class_creation() {
        let class = Class::new_root("ClassTestRoot").unwrap();
        assert_eq!(class.name(), "ClassTestRoot");
        assert!(class.super_class().is_none());
        assert_eq!(Class::from_id(class.id()), Some(class));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        Class::new_root("ClassTestDuplicate").unwrap();
        assert!(matches!(
            Class::new_root("ClassTestDuplicate"),
            Err(Error::ClassAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_ancestors_order() {
        let a = Class::new_root("ClassTestA").unwrap();
        let b = Class::new("ClassTestB", &a).unwrap();
        let c = Class::new("ClassTestC", &b).unwrap();

        let chain: Vec<_> = c.ancestors().map(|c| c.name()).collect();
        assert_eq!(chain, vec!["ClassTestC", "ClassTestB", "ClassTestA"]);
        assert!(c.is_subclass_of(&a));
        assert!(c.is_subclass_of(&c));
        assert!(!a.is_subclass_of(&c));
    }

    #[test]
    fn test_lookup_walks_inheritance() {
        let parent = Class::new_root("ClassTestLookupParent").unwrap();
        let child = Class::new("ClassTestLookupChild", &parent).unwrap();
        let sel = Selector::from_str("inheritedMethod").unwrap();
        parent.add_method(Method::new(sel, "v@:", noop()).unwrap()).unwrap();

        let (owner, _) = child.lookup_method(&sel).unwrap();
        assert_eq!(owner, parent);
        assert!(child.method(&sel).is_none());
        assert!(child.responds_to(&sel));
    }

    #[test]
    fn test_method_rejects_bad_encoding() {
        let sel = Selector::from_str("badEncoding").unwrap();
        assert!(matches!(
            Method::new(sel, "v", noop()),
            Err(Error::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_declared_methods_sorted() {
        let class = Class::new_root("ClassTestSorted").unwrap();
        for name in ["zeta", "alpha", "mid:"] {
            let sel = Selector::from_str(name).unwrap();
            let types = if name.ends_with(':') { "v@:i" } else { "v@:" };
            class.add_method(Method::new(sel, types, noop()).unwrap()).unwrap();
        }
        let names: Vec<_> = class
            .declared_methods()
            .iter()
            .map(|m| m.selector.name())
            .collect();
        assert_eq!(names, vec!["alpha", "mid:", "zeta"]);
    }

    #[test]
    fn test_replace_implementation() {
        let class = Class::new_root("ClassTestReplace").unwrap();
        let sel = Selector::from_str("value").unwrap();
        let original = returning(1);
        class
            .add_method(Method::new(sel, "i@:", original.clone()).unwrap())
            .unwrap();
        let before = class.table_version();

        let previous = class.replace_implementation(&sel, returning(2)).unwrap();
        assert!(previous.ptr_eq(&original));
        assert!(class.table_version() > before);

        let obj = Object::new(&class);
        let ret = class.method(&sel).unwrap().imp.call(&obj, sel, &Frame::new());
        assert_eq!(ret.read::<i32>(0), Some(2));
    }

    #[test]
    fn test_replace_missing_selector() {
        let class = Class::new_root("ClassTestReplaceMissing").unwrap();
        let sel = Selector::from_str("missing").unwrap();
        assert!(matches!(
            class.replace_implementation(&sel, noop()),
            Err(Error::SelectorNotFound { .. })
        ));
    }

    #[test]
    fn test_compare_and_replace() {
        let class = Class::new_root("ClassTestCas").unwrap();
        let sel = Selector::from_str("value").unwrap();
        let original = returning(1);
        class
            .add_method(Method::new(sel, "i@:", original.clone()).unwrap())
            .unwrap();

        let ours = returning(2);
        assert!(class.compare_and_replace(&sel, &original, ours.clone()).unwrap());

        // Someone else swaps in between
        let foreign = returning(3);
        class.replace_implementation(&sel, foreign.clone()).unwrap();

        assert!(!class.compare_and_replace(&sel, &ours, original).unwrap());
        assert!(class.method(&sel).unwrap().imp.ptr_eq(&foreign));
    }

    #[test]
    fn test_properties() {
        let parent = Class::new_root("ClassTestPropsParent").unwrap();
        let child = Class::new("ClassTestPropsChild", &parent).unwrap();
        let title = parent.add_property("title", false).unwrap();
        let count = child.add_property("count", true).unwrap();

        assert_eq!(title.setter.unwrap().name(), "setTitle:");
        assert!(count.setter.is_none());

        assert!(child.is_property_accessor(&Selector::from_str("title").unwrap()));
        assert!(child.is_property_accessor(&Selector::from_str("setTitle:").unwrap()));
        assert!(child.is_property_accessor(&Selector::from_str("count").unwrap()));
        assert!(!parent.is_property_accessor(&Selector::from_str("count").unwrap()));
        assert_eq!(child.properties(), vec![count]);
    }
}
