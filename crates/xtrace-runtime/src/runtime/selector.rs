//! `Selector` interning for the runtime.
//!
//! Every unique message name maps to exactly one interned selector:
//! - Pointers are stable for the entire program duration
//! - Comparison is O(1) pointer equality
//! - Hash is precomputed once at creation time
//! - Each selector has a dense numeric [`SelectorId`] so it can be stored in
//!   a [`Frame`](crate::Frame) and recovered later
//!
//! # Thread Safety
//!
//! The registry is guarded by a `RwLock`. Lookups of already-interned names
//! take the read lock only; a miss upgrades to the write lock and re-checks
//! before inserting.

use crate::error::{Error, Result};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

/// Dense numeric identifier of an interned selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelectorId(u32);

impl SelectorId {
    /// Returns the raw index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Builds an id from a raw index. The id may not name an interned
    /// selector.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        SelectorId(raw)
    }
}

/// Interned selector data. Leaked on creation, never deallocated.
struct InternedSelector {
    /// Selector name (e.g., "setValue:flag:")
    name: &'static str,
    /// Registry index
    id: SelectorId,
    /// Precomputed hash
    hash: u64,
    /// Number of ':' in the name
    arg_count: usize,
}

struct SelectorRegistry {
    by_name: FxHashMap<&'static str, &'static InternedSelector>,
    by_id: Vec<&'static InternedSelector>,
}

static REGISTRY: OnceLock<RwLock<SelectorRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<SelectorRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(SelectorRegistry {
            by_name: FxHashMap::default(),
            by_id: Vec::with_capacity(256),
        })
    })
}

/// An interned message identifier.
///
/// # Example
///
/// ```rust
/// use xtrace_runtime::Selector;
/// use std::str::FromStr;
///
/// let a = Selector::from_str("setValue:flag:").unwrap();
/// let b = Selector::from_str("setValue:flag:").unwrap();
///
/// assert_eq!(a, b);
/// assert_eq!(a.arg_count(), 2);
/// assert_eq!(a.parts().collect::<Vec<_>>(), vec!["setValue", "flag"]);
/// ```
#[derive(Clone, Copy)]
pub struct Selector(&'static InternedSelector);

impl Selector {
    /// Interns `name`, returning the unique selector for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] if `name` is empty.
    pub fn intern(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidSelector {
                name: name.to_string(),
            });
        }

        if let Some(interned) = registry().read().by_name.get(name) {
            return Ok(Selector(*interned));
        }

        let mut reg = registry().write();

        // Another thread might have interned it while we waited
        if let Some(interned) = reg.by_name.get(name) {
            return Ok(Selector(*interned));
        }

        let Ok(index) = u32::try_from(reg.by_id.len()) else {
            return Err(Error::InvalidSelector {
                name: name.to_string(),
            });
        };
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let interned: &'static InternedSelector =
            Box::leak(Box::new(InternedSelector {
                name: leaked,
                id: SelectorId(index),
                hash: fxhash::hash64(leaked),
                arg_count: leaked.matches(':').count(),
            }));

        reg.by_name.insert(leaked, interned);
        reg.by_id.push(interned);

        Ok(Selector(interned))
    }

    /// Looks up a selector by its id.
    #[must_use]
    pub fn from_id(id: SelectorId) -> Option<Self> {
        registry()
            .read()
            .by_id
            .get(id.0 as usize)
            .map(|interned| Selector(*interned))
    }

    /// Returns the selector's id.
    #[must_use]
    pub fn id(&self) -> SelectorId {
        self.0.id
    }

    /// Returns the selector name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Returns the precomputed hash of the name.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.0.hash
    }

    /// Number of arguments implied by the name (one per `:`).
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.0.arg_count
    }

    /// Keyword parts of the name, one per argument.
    ///
    /// `"setValue:flag:"` yields `"setValue"` and `"flag"`. Anonymous parts
    /// (as in `"with::"`) come back as empty strings.
    pub fn parts(self) -> impl Iterator<Item = &'static str> {
        self.0.name.split(':').take(self.0.arg_count)
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Selector::intern(s)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for Selector {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Selector {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.name.cmp(other.0.name)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({:?})", self.0.name)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}
