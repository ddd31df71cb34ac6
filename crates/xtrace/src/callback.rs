//! Delegate callbacks.
//!
//! A [`Callback`] pairs a weak reference to the delegate object with the
//! implementation of one of its methods. Hooks are called with the traced
//! method's own calling convention, so a callback is an ordinary method on
//! the delegate:
//!
//! | hook    | callback frame                                  | result                      |
//! |---------|-------------------------------------------------|-----------------------------|
//! | before  | `(receiver, args...)`                           | ignored                     |
//! | replace | `(receiver, args...)`                           | returned to the caller      |
//! | after   | `(return value if non-void, receiver, args...)` | substitute, or void to keep |
//!
//! For a traced `i@:i` method the callbacks are therefore `v@:@i` (before),
//! `i@:@i` (replace) and `i@:i@i` (after).

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use xtrace_runtime::runtime::encoding;
use xtrace_runtime::{Frame, Imp, Object, Selector, WeakObject};

/// Which slot of a record a hook occupies, or plain logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Log calls, no hook
    Log,
    /// Run before the original
    Before,
    /// Run instead of the original
    Replace,
    /// Run after the original, may substitute the result
    After,
}

/// A resolved delegate method.
#[derive(Clone)]
pub struct Callback {
    delegate: WeakObject,
    selector: Selector,
    imp: Imp,
    types: Arc<str>,
}

impl Callback {
    /// Resolves `selector` on `delegate`'s class (ancestors included).
    ///
    /// The callback does not keep the delegate alive; once the delegate is
    /// dropped the hook is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CallbackNotFound`] if the delegate does not respond
    /// to `selector`.
    pub fn resolve(delegate: &Object, selector: Selector) -> Result<Self> {
        let class = delegate.class();
        let Some((_, method)) = class.lookup_method(&selector) else {
            return Err(Error::CallbackNotFound {
                class: class.name().to_string(),
                selector: selector.name().to_string(),
            });
        };
        Ok(Callback {
            delegate: delegate.downgrade(),
            selector,
            imp: method.imp,
            types: method.types,
        })
    }

    /// The callback's selector.
    #[must_use]
    pub fn selector(&self) -> Selector {
        self.selector
    }

    /// The callback's type encoding.
    #[must_use]
    pub fn types(&self) -> &str {
        &self.types
    }

    /// Returns true while the delegate is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.delegate.upgrade().is_some()
    }

    /// Calls the callback with `frame`.
    ///
    /// Returns `None`, after logging why, if the delegate is gone or the
    /// callback's encoding expects a different number of arguments.
    pub(crate) fn invoke(&self, frame: &Frame) -> Option<Frame> {
        let Some(delegate) = self.delegate.upgrade() else {
            log::debug!("callback {}: delegate released, skipping", self.selector);
            return None;
        };
        let expected = encoding::method_arg_count(&self.types);
        if expected != frame.count() {
            log::warn!(
                "callback {} takes {expected} arguments but the hook passes {}; skipping",
                self.selector,
                frame.count()
            );
            return None;
        }
        Some(self.imp.call(&delegate, self.selector, frame))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("selector", &self.selector)
            .field("types", &&*self.types)
            .field("delegate", &self.delegate.id().as_u64())
            .finish()
    }
}

/// Frame for before and replace hooks: `(receiver, args...)`.
pub(crate) fn receiver_frame(receiver: &Object, args: &Frame) -> Frame {
    let mut frame = Frame::new().with_object(Some(receiver));
    frame.append(args);
    frame
}

/// Frame for after hooks: `(return value, receiver, args...)`, where the
/// return value is omitted for void methods.
pub(crate) fn after_frame(ret: &Frame, receiver: &Object, args: &Frame) -> Frame {
    let mut frame = ret.clone();
    frame.push_object(Some(receiver));
    frame.append(args);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use xtrace_runtime::{Class, Method};

    fn delegate_class(name: &str) -> (Class, Selector) {
        let class = Class::new_root(name).unwrap();
        let sel = Selector::from_str("onValue:with:").unwrap();
        let imp = Imp::new(|_, _, frame| {
            let receiver = frame.read_object_id(0).map_or(0, |id| id.as_u64());
            let arg = frame.read::<i32>(8).unwrap_or_default();
            Frame::returning(receiver as i64 + i64::from(arg))
        });
        class.add_method(Method::new(sel, "q@:@i", imp).unwrap()).unwrap();
        (class, sel)
    }

    #[test]
    fn test_resolve_and_invoke() {
        let (class, sel) = delegate_class("CallbackTestDelegate");
        let delegate = Object::new(&class);
        let receiver = Object::new(&class);
        let callback = Callback::resolve(&delegate, sel).unwrap();

        let frame = receiver_frame(&receiver, &Frame::new().with(5_i32));
        let ret = callback.invoke(&frame).unwrap();
        assert_eq!(
            ret.read::<i64>(0),
            Some(receiver.id().as_u64() as i64 + 5)
        );
    }

    #[test]
    fn test_resolve_missing() {
        let class = Class::new_root("CallbackTestEmpty").unwrap();
        let delegate = Object::new(&class);
        let sel = Selector::from_str("absentCallback:").unwrap();
        assert!(matches!(
            Callback::resolve(&delegate, sel),
            Err(Error::CallbackNotFound { .. })
        ));
    }

    #[test]
    fn test_arity_mismatch_skips() {
        let (class, sel) = delegate_class("CallbackTestArity");
        let delegate = Object::new(&class);
        let callback = Callback::resolve(&delegate, sel).unwrap();
        assert!(callback.invoke(&Frame::new()).is_none());
    }

    #[test]
    fn test_released_delegate_skips() {
        let (class, sel) = delegate_class("CallbackTestReleased");
        let delegate = Object::new(&class);
        let receiver = Object::new(&class);
        let callback = Callback::resolve(&delegate, sel).unwrap();
        drop(delegate);

        assert!(!callback.is_alive());
        let frame = receiver_frame(&receiver, &Frame::new().with(1_i32));
        assert!(callback.invoke(&frame).is_none());
    }

    #[test]
    fn test_after_frame_layout() {
        let class = Class::new_root("CallbackTestAfterFrame").unwrap();
        let receiver = Object::new(&class);

        let frame = after_frame(&Frame::returning(3_i32), &receiver, &Frame::new().with(4_i32));
        assert_eq!(frame.count(), 3);
        assert_eq!(frame.read::<i32>(0), Some(3));
        assert_eq!(frame.read_object(8), Some(receiver.clone()));
        assert_eq!(frame.read::<i32>(16), Some(4));

        // Void methods contribute no return slot
        let frame = after_frame(&Frame::new(), &receiver, &Frame::new());
        assert_eq!(frame.count(), 1);
    }
}
