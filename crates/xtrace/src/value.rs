//! Typed values read out of call frames.
//!
//! Reads are driven by a [`TypeKind`] and a byte offset from a decoded
//! [`Signature`]. A read that falls outside the frame yields
//! [`ArgValue::Unsupported`] rather than an error.

use crate::decoder::{Signature, TypeDescriptor, TypeKind};
use xtrace_runtime::{Class, Frame, Object, ObjectId, Selector};

/// A value captured from an argument or return frame.
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// No value
    Void,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Boolean
    Bool(bool),
    /// Floating point
    Float(f64),
    /// Object reference; `id` is `None` for nil, `live` is `None` once the
    /// object is gone
    Object {
        /// Id stored in the frame
        id: Option<ObjectId>,
        /// The object, if still alive
        live: Option<Object>,
    },
    /// Class reference (`None` for Nil)
    Class(Option<Class>),
    /// Selector (`None` for NULL)
    Selector(Option<Selector>),
    /// C string (`None` for NULL)
    CString(Option<String>),
    /// Raw address
    Pointer(usize),
    /// Flat struct fields in declaration order
    Struct(Vec<ArgValue>),
    /// Value of a type that is not rendered, with its type name
    Opaque(String),
    /// Value that could not be read
    Unsupported,
}

impl ArgValue {
    /// Reads a value of `ty` at `offset`.
    #[must_use]
    pub fn read(frame: &Frame, ty: &TypeDescriptor, offset: usize) -> ArgValue {
        match &ty.kind {
            TypeKind::Opaque => ArgValue::Opaque(ty.type_name.clone()),
            kind => read_kind(frame, kind, offset).unwrap_or(ArgValue::Unsupported),
        }
    }

    /// Returns the object if this is a live object reference.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            ArgValue::Object { live, .. } => live.as_ref(),
            _ => None,
        }
    }
}

fn read_kind(frame: &Frame, kind: &TypeKind, offset: usize) -> Option<ArgValue> {
    let value = match kind {
        TypeKind::Void => ArgValue::Void,
        TypeKind::SignedInt(1) => ArgValue::Int(frame.read::<i8>(offset)?.into()),
        TypeKind::SignedInt(2) => ArgValue::Int(frame.read::<i16>(offset)?.into()),
        TypeKind::SignedInt(4) => ArgValue::Int(frame.read::<i32>(offset)?.into()),
        TypeKind::SignedInt(_) => ArgValue::Int(frame.read::<i64>(offset)?),
        TypeKind::UnsignedInt(1) => ArgValue::UInt(frame.read::<u8>(offset)?.into()),
        TypeKind::UnsignedInt(2) => ArgValue::UInt(frame.read::<u16>(offset)?.into()),
        TypeKind::UnsignedInt(4) => ArgValue::UInt(frame.read::<u32>(offset)?.into()),
        TypeKind::UnsignedInt(_) => ArgValue::UInt(frame.read::<u64>(offset)?),
        TypeKind::Float(4) => ArgValue::Float(frame.read::<f32>(offset)?.into()),
        TypeKind::Float(_) => ArgValue::Float(frame.read::<f64>(offset)?),
        TypeKind::Bool => ArgValue::Bool(frame.read_bool(offset)?),
        TypeKind::Object => {
            // Bounds check first; a zero handle is nil
            frame.read::<u64>(offset)?;
            ArgValue::Object {
                id: frame.read_object_id(offset),
                live: frame.read_object(offset),
            }
        }
        TypeKind::Class => {
            frame.read::<u64>(offset)?;
            ArgValue::Class(frame.read_class(offset))
        }
        TypeKind::Selector => {
            frame.read::<u64>(offset)?;
            ArgValue::Selector(frame.read_selector(offset))
        }
        TypeKind::CString => {
            frame.read::<u64>(offset)?;
            ArgValue::CString(frame.read_cstr(offset).map(str::to_string))
        }
        TypeKind::Pointer => ArgValue::Pointer(frame.read_pointer(offset)?),
        TypeKind::Struct(fields) => ArgValue::Struct(
            fields
                .iter()
                .map(|field| read_kind(frame, &field.kind, offset + field.offset))
                .collect::<Option<Vec<_>>>()?,
        ),
        TypeKind::Opaque | TypeKind::Unsupported => return None,
    };
    Some(value)
}

/// Reads every argument of `signature` from `args`.
///
/// Unsupported arguments come back as [`ArgValue::Unsupported`].
#[must_use]
pub fn read_args(signature: &Signature, args: &Frame) -> Vec<ArgValue> {
    signature
        .args
        .iter()
        .map(|arg| match arg.offset {
            Some(offset) if arg.is_supported() => ArgValue::read(args, &arg.ty, offset),
            _ => ArgValue::Unsupported,
        })
        .collect()
}

/// Reads the return value of `signature` from `ret`.
#[must_use]
pub fn read_return(signature: &Signature, ret: &Frame) -> ArgValue {
    ArgValue::read(ret, &signature.ret, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use std::str::FromStr;

    #[test]
    fn test_read_scalars() {
        let sel = Selector::from_str("mix:with:and:").unwrap();
        let sig = decode(sel, "v@:sQf");
        let frame = Frame::new().with(-3_i16).with(7_u64).with(0.5_f32);

        let values = read_args(&sig, &frame);
        assert!(matches!(values[0], ArgValue::Int(-3)));
        assert!(matches!(values[1], ArgValue::UInt(7)));
        assert!(matches!(values[2], ArgValue::Float(f) if (f - 0.5).abs() < f64::EPSILON));
    }

    #[test]
    fn test_read_short_frame_is_unsupported() {
        let sel = Selector::from_str("take:").unwrap();
        let sig = decode(sel, "v@:q");
        let values = read_args(&sig, &Frame::new());
        assert!(matches!(values[0], ArgValue::Unsupported));
    }

    #[test]
    fn test_read_struct() {
        let sel = Selector::from_str("moveTo:").unwrap();
        let sig = decode(sel, "v@:{Point=dd}");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5_f64.to_ne_bytes());
        bytes.extend_from_slice(&(-2.0_f64).to_ne_bytes());
        let frame = Frame::new().with_bytes(&bytes, 8);

        let values = read_args(&sig, &frame);
        let ArgValue::Struct(fields) = &values[0] else {
            panic!("expected struct");
        };
        assert!(matches!(fields[0], ArgValue::Float(f) if (f - 1.5).abs() < f64::EPSILON));
        assert!(matches!(fields[1], ArgValue::Float(f) if (f + 2.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_read_handles() {
        let class = Class::new_root("ValueTestHandles").unwrap();
        let obj = Object::new(&class);
        let sel = Selector::from_str("a:b:c:d:").unwrap();
        let sig = decode(sel, "v@:@#*@");
        let frame = Frame::new()
            .with_object(Some(&obj))
            .with_class(Some(&class))
            .with_cstr(None)
            .with_object(None);

        let values = read_args(&sig, &frame);
        assert_eq!(values[0].as_object(), Some(&obj));
        assert!(matches!(values[1], ArgValue::Class(Some(c)) if c == class));
        assert!(matches!(values[2], ArgValue::CString(None)));
        assert!(matches!(values[3], ArgValue::Object { id: None, live: None }));
    }

    #[test]
    fn test_read_return() {
        let sel = Selector::from_str("name").unwrap();
        let sig = decode(sel, "*@:");
        let ret = Frame::new().with_cstr(Some("widget"));
        assert!(matches!(read_return(&sig, &ret), ArgValue::CString(Some(s)) if s == "widget"));

        let sig = decode(sel, "v@:");
        assert!(matches!(read_return(&sig, &Frame::new()), ArgValue::Void));
    }

    #[test]
    fn test_opaque_keeps_type_name() {
        let sel = Selector::from_str("run:").unwrap();
        let sig = decode(sel, "v@:@?");
        let frame = Frame::new().with_pointer(0x10);
        let values = read_args(&sig, &frame);
        assert!(matches!(&values[0], ArgValue::Opaque(name) if name == "block"));
    }
}
