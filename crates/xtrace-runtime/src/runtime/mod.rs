//! Runtime object model.
//!
//! - [`selector`]: selector interning
//! - [`class`]: classes, methods and the per-class dispatch table
//! - [`object`]: instances, identity and associated values
//! - [`frame`]: argument and return-value storage
//! - [`encoding`]: method type-encoding scanner
//! - [`dispatch`]: message sending
//!
//! Classes and selectors are registered globally and live for the whole
//! program. Objects are reference counted and unregister themselves from the
//! id lookup table when the last reference goes away.

pub mod class;
pub mod dispatch;
pub mod encoding;
pub mod frame;
pub mod object;
pub mod selector;

pub use class::{Class, ClassId, Imp, Method, Property};
pub use frame::{Frame, Scalar, Slot, SlotKind};
pub use object::{AssociatedValue, AssociationKey, Object, ObjectId, WeakObject};
pub use selector::{Selector, SelectorId};
