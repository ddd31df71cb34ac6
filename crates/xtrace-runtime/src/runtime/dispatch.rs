//! Message dispatch.
//!
//! A send looks the selector up on the receiver's class (walking the
//! superclass chain), checks the argument count against the method's type
//! encoding, and calls the current [`Imp`](crate::Imp) with the frame.
//!
//! The implementation is cloned out of the dispatch table before it is
//! called, so no runtime lock is held while user code runs. An implementation
//! may therefore replace methods, including its own, while executing.

use crate::error::{Error, Result};
use crate::runtime::class::{Class, Method};
use crate::runtime::frame::Frame;
use crate::runtime::object::Object;
use crate::runtime::selector::Selector;

/// Sends `selector` to `receiver` with `args`.
///
/// # Errors
///
/// - [`Error::SelectorNotFound`] if no class in the receiver's chain
///   implements `selector`
/// - [`Error::ArgumentCountMismatch`] if `args` does not hold exactly the
///   number of arguments the method's encoding declares
pub fn send_message(receiver: &Object, selector: &Selector, args: &Frame) -> Result<Frame> {
    let class = receiver.class();
    let method = resolve(&class, selector)?;
    invoke(&method, receiver, *selector, args)
}

/// Sends `selector` to `receiver`, starting the lookup at the superclass of
/// `from`.
///
/// Used by overriding implementations to reach the inherited behavior.
///
/// # Errors
///
/// Same as [`send_message`]; a root `from` always yields
/// [`Error::SelectorNotFound`].
pub fn send_super(
    receiver: &Object,
    from: &Class,
    selector: &Selector,
    args: &Frame,
) -> Result<Frame> {
    let Some(super_class) = from.super_class() else {
        return Err(Error::SelectorNotFound {
            class: from.name().to_string(),
            selector: selector.name().to_string(),
        });
    };
    let method = resolve(&super_class, selector)?;
    invoke(&method, receiver, *selector, args)
}

/// Returns true if `receiver` implements `selector`.
#[must_use]
pub fn responds_to(receiver: &Object, selector: &Selector) -> bool {
    receiver.class().responds_to(selector)
}

fn resolve(class: &Class, selector: &Selector) -> Result<Method> {
    class
        .lookup_method(selector)
        .map(|(_, method)| method)
        .ok_or_else(|| Error::SelectorNotFound {
            class: class.name().to_string(),
            selector: selector.name().to_string(),
        })
}

fn invoke(method: &Method, receiver: &Object, cmd: Selector, args: &Frame) -> Result<Frame> {
    let expected = method.arg_count();
    if args.count() != expected {
        // Counts include self and _cmd
        return Err(Error::ArgumentCountMismatch {
            expected: expected + 2,
            got: args.count() + 2,
        });
    }
    Ok(method.imp.call(receiver, cmd, args))
}
