//! Trace line formatting.
//!
//! Entry lines look like a message send, return lines carry the value and
//! the time spent:
//!
//! ```text
//! [<Account#12> deposit:250 memo:"rent"]
//!   [<Ledger#3> record:250]
//!   -> void (1.2µs)
//! -> true (8.9µs)
//! ```
//!
//! Nested traced calls on the same thread are indented two spaces per
//! level.

use crate::decoder::Signature;
use crate::guard::Suppress;
use crate::value::ArgValue;
use std::fmt::Write;
use std::str::FromStr;
use std::time::Duration;
use xtrace_runtime::runtime::encoding;
use xtrace_runtime::{Frame, Object, Selector};

const INDENT: &str = "  ";

/// `<Class#id>` label for an object.
pub(crate) fn object_label(object: &Object) -> String {
    format!("<{}#{}>", object.class().name(), object.id())
}

/// Renders `object` through its `description` method, if it has one
/// returning a C string.
///
/// The send is made with tracing suppressed on this thread.
pub(crate) fn describe(object: &Object) -> Option<String> {
    let selector = Selector::from_str("description").ok()?;
    let (_, method) = object.class().lookup_method(&selector)?;
    if encoding::return_type(&method.types) != Some("*") {
        return None;
    }
    let _quiet = Suppress::enter();
    let ret = object.send(&selector, &Frame::new()).ok()?;
    ret.read_cstr(0).map(str::to_string)
}

/// Renders a single value.
pub(crate) fn render_value(value: &ArgValue, describe_values: bool) -> String {
    match value {
        ArgValue::Void => "void".to_string(),
        ArgValue::Int(v) => v.to_string(),
        ArgValue::UInt(v) => v.to_string(),
        ArgValue::Bool(v) => v.to_string(),
        ArgValue::Float(v) => v.to_string(),
        ArgValue::Object { id: None, .. } => "nil".to_string(),
        ArgValue::Object {
            id: Some(id),
            live: None,
        } => format!("<deallocated#{id}>"),
        ArgValue::Object {
            live: Some(object), ..
        } => {
            if describe_values {
                if let Some(text) = describe(object) {
                    return text;
                }
            }
            object_label(object)
        }
        ArgValue::Class(Some(class)) => class.name().to_string(),
        ArgValue::Class(None) => "Nil".to_string(),
        ArgValue::Selector(Some(selector)) => format!("@selector({selector})"),
        ArgValue::Selector(None) | ArgValue::CString(None) => "NULL".to_string(),
        ArgValue::CString(Some(s)) => format!("{s:?}"),
        ArgValue::Pointer(address) => format!("{address:#x}"),
        ArgValue::Struct(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|field| render_value(field, describe_values))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        ArgValue::Opaque(type_name) => format!("<{type_name}>"),
        ArgValue::Unsupported => "<unsupported>".to_string(),
    }
}

/// Formats the entry line of a call.
///
/// `args` is `None` when argument display is off; the selector is then
/// printed as is.
pub(crate) fn entry_line(
    depth: usize,
    receiver: &Object,
    selector: Selector,
    signature: &Signature,
    args: Option<&[ArgValue]>,
    describe_values: bool,
) -> String {
    let mut line = INDENT.repeat(depth);
    let _ = write!(line, "[{} ", object_label(receiver));

    match args {
        Some(values) if !values.is_empty() => {
            let parts: Vec<&str> = selector.parts().collect();
            let rendered: Vec<String> = signature
                .args
                .iter()
                .zip(values)
                .map(|(arg, value)| {
                    let label: &str = match parts.get(arg.index) {
                        Some(part) => part,
                        None => &arg.name,
                    };
                    format!("{label}:{}", render_value(value, describe_values))
                })
                .collect();
            line.push_str(&rendered.join(" "));
        }
        _ => line.push_str(selector.name()),
    }
    line.push(']');
    line
}

/// Formats the return line of a call.
pub(crate) fn return_line(
    depth: usize,
    value: &ArgValue,
    describe_values: bool,
    elapsed: Duration,
) -> String {
    format!(
        "{}-> {} ({elapsed:?})",
        INDENT.repeat(depth),
        render_value(value, describe_values)
    )
}
