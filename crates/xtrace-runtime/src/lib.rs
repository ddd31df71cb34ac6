//! `xtrace-runtime`: a small dynamic object runtime for message interception.
//!
//! The runtime models Objective-C style late binding with explicit, owned
//! data structures instead of language-level tricks:
//!
//! - **Selectors** are interned message identifiers with pointer equality
//! - **Classes** own a versioned dispatch table mapping selectors to [`Imp`]s
//! - **Objects** carry identity, an isa class, and associated values
//! - **Frames** hold call arguments and return values as aligned bytes
//!
//! Every implementation shares one calling convention
//! (`Fn(&Object, Selector, &Frame) -> Frame`), so an interceptor can stand in
//! for any method without knowing its signature at compile time.
//!
//! # Example
//!
//! ```rust
//! use xtrace_runtime::{Class, Frame, Imp, Method, Object, Selector};
//! use std::str::FromStr;
//!
//! let class = Class::new_root("DocCounter").unwrap();
//! let sel = Selector::from_str("answer").unwrap();
//! let imp = Imp::new(|_obj, _cmd, _args| Frame::returning(42_i32));
//! class.add_method(Method::new(sel, "i@:", imp).unwrap()).unwrap();
//!
//! let obj = Object::new(&class);
//! let ret = obj.send(&sel, &Frame::new()).unwrap();
//! assert_eq!(ret.read::<i32>(0), Some(42));
//! ```

pub mod error;
pub mod runtime;

pub use error::{Error, Result};
pub use runtime::{
    AssociatedValue, AssociationKey, Class, ClassId, Frame, Imp, Method, Object,
    ObjectId, Property, Scalar, Selector, SelectorId, Slot, SlotKind,
    WeakObject,
};
