//! Method signature decoding.
//!
//! Turns a method type encoding into a [`Signature`]: one [`TypeDescriptor`]
//! for the return value and one [`ArgDescriptor`] per declared argument, with
//! the byte offset at which that argument sits in the call's
//! [`Frame`](xtrace_runtime::Frame).
//!
//! Decoding never fails. Codes outside the primitive set degrade to
//! [`TypeKind::Opaque`] (size known) or [`TypeKind::Unsupported`] (size
//! unknown). Offsets can only be computed while every preceding argument has
//! a known size, so the first unsized argument, and every argument after it
//! or past [`ARGS_SUPPORTED`], is left without an offset and is reported as
//! unsupported when values are read.

use xtrace_runtime::Selector;
use xtrace_runtime::runtime::encoding::{
    aggregate_members, align_up, next_type, size_and_align, split_types,
};

/// Number of arguments decoded per call. Later arguments are described but
/// never read.
pub const ARGS_SUPPORTED: usize = 10;

/// One primitive field of a flat struct.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    /// Offset from the start of the struct
    pub offset: usize,
    /// Field kind (never a struct)
    pub kind: TypeKind,
}

/// How a value is read from a frame and rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// No value
    Void,
    /// Signed integer of the given byte width
    SignedInt(u8),
    /// Unsigned integer of the given byte width
    UnsignedInt(u8),
    /// Boolean
    Bool,
    /// Floating point of the given byte width
    Float(u8),
    /// Object reference
    Object,
    /// Class reference
    Class,
    /// Selector
    Selector,
    /// NUL-terminated string
    CString,
    /// Raw pointer
    Pointer,
    /// Struct whose fields are all primitives
    Struct(Vec<StructField>),
    /// Known layout but no rendering (unions, arrays, nested structs, blocks)
    Opaque,
    /// Unknown layout
    Unsupported,
}

impl TypeKind {
    /// Returns true for kinds that can appear as a flat struct field.
    fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypeKind::SignedInt(_)
                | TypeKind::UnsignedInt(_)
                | TypeKind::Bool
                | TypeKind::Float(_)
                | TypeKind::Pointer
                | TypeKind::CString
                | TypeKind::Object
                | TypeKind::Class
                | TypeKind::Selector
        )
    }
}

/// A decoded type code.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    /// The raw code, e.g. `{Point=dd}`
    pub encoding: String,
    /// C-style name, e.g. `struct Point`
    pub type_name: String,
    /// How values of this type are read
    pub kind: TypeKind,
    /// Size and alignment, when determinable
    pub layout: Option<(usize, usize)>,
}

impl TypeDescriptor {
    /// Returns true for the `void` type.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.kind == TypeKind::Void
    }
}

/// A decoded argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDescriptor {
    /// Position among the explicit arguments
    pub index: usize,
    /// Keyword part of the selector, or `argN`
    pub name: String,
    /// Argument type
    pub ty: TypeDescriptor,
    /// Byte offset in the argument frame; `None` when unreadable
    pub offset: Option<usize>,
}

impl ArgDescriptor {
    /// Returns true if the argument's value can be read.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.offset.is_some() && self.ty.kind != TypeKind::Unsupported
    }
}

/// A decoded method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Return type
    pub ret: TypeDescriptor,
    /// Every declared argument, in order
    pub args: Vec<ArgDescriptor>,
}

impl Signature {
    /// Number of arguments whose values can be read.
    #[must_use]
    pub fn supported_count(&self) -> usize {
        self.args.iter().filter(|arg| arg.is_supported()).count()
    }
}

/// Decodes the encoding of a method answering `selector`.
///
/// # Example
///
/// ```rust
/// use std::str::FromStr;
/// use xtrace::decoder::{decode, TypeKind};
/// use xtrace_runtime::Selector;
///
/// let sel = Selector::from_str("setValue:flag:").unwrap();
/// let sig = decode(sel, "v@:qB");
///
/// assert!(sig.ret.is_void());
/// assert_eq!(sig.args[0].name, "setValue");
/// assert_eq!(sig.args[0].ty.kind, TypeKind::SignedInt(8));
/// assert_eq!(sig.args[1].offset, Some(8));
/// ```
#[must_use]
pub fn decode(selector: Selector, encoding: &str) -> Signature {
    let tokens = split_types(encoding);
    let ret = tokens
        .first()
        .map_or_else(|| describe_type("v"), |token| describe_type(token));

    let parts: Vec<&str> = selector.parts().collect();
    let mut offset = Some(0usize);
    let args = tokens
        .iter()
        .skip(3)
        .enumerate()
        .map(|(index, token)| {
            let ty = describe_type(token);
            let name = match parts.get(index) {
                Some(part) if !part.is_empty() => (*part).to_string(),
                _ => format!("arg{index}"),
            };

            let arg_offset = match (offset, ty.layout) {
                (Some(current), Some((size, align))) if index < ARGS_SUPPORTED => {
                    let aligned = align_up(current, align);
                    offset = Some(aligned + size);
                    Some(aligned)
                }
                _ => {
                    offset = None;
                    None
                }
            };

            if ty.kind == TypeKind::Unsupported {
                log::debug!(
                    "{selector}: argument {index} type {:?} not supported",
                    ty.encoding
                );
            }

            ArgDescriptor {
                index,
                name,
                ty,
                offset: arg_offset,
            }
        })
        .collect();

    Signature { ret, args }
}

/// Decodes a single type code.
///
/// # Example
///
/// ```rust
/// use xtrace::decoder::{describe_type, TypeKind};
///
/// let ty = describe_type("@\"Widget\"");
/// assert_eq!(ty.type_name, "Widget *");
/// assert_eq!(ty.kind, TypeKind::Object);
///
/// let ty = describe_type("b3");
/// assert_eq!(ty.type_name, "bitfield:3");
/// assert_eq!(ty.kind, TypeKind::Unsupported);
/// ```
#[must_use]
pub fn describe_type(token: &str) -> TypeDescriptor {
    let layout = size_and_align(token);
    let kind = match token.as_bytes().first() {
        Some(b'v') => TypeKind::Void,
        Some(b'c') => TypeKind::SignedInt(1),
        Some(b's') => TypeKind::SignedInt(2),
        Some(b'i') => TypeKind::SignedInt(4),
        Some(b'l' | b'q') => TypeKind::SignedInt(8),
        Some(b'C') => TypeKind::UnsignedInt(1),
        Some(b'S') => TypeKind::UnsignedInt(2),
        Some(b'I') => TypeKind::UnsignedInt(4),
        Some(b'L' | b'Q') => TypeKind::UnsignedInt(8),
        Some(b'f') => TypeKind::Float(4),
        Some(b'd') => TypeKind::Float(8),
        Some(b'B') => TypeKind::Bool,
        Some(b'*') => TypeKind::CString,
        Some(b'#') => TypeKind::Class,
        Some(b':') => TypeKind::Selector,
        Some(b'@') if token == "@?" => TypeKind::Opaque,
        Some(b'@') => TypeKind::Object,
        Some(b'^') if token == "^?" => TypeKind::Opaque,
        Some(b'^') => TypeKind::Pointer,
        Some(b'{') => struct_kind(token),
        Some(b'(' | b'[') if layout.is_some() => TypeKind::Opaque,
        _ => TypeKind::Unsupported,
    };

    TypeDescriptor {
        encoding: token.to_string(),
        type_name: type_name(token),
        kind,
        layout,
    }
}

fn struct_kind(token: &str) -> TypeKind {
    let Some((_, members)) = aggregate_members(token) else {
        return TypeKind::Unsupported;
    };
    if members.is_empty() {
        // Forward reference, layout unknown
        return TypeKind::Unsupported;
    }

    let mut fields = Vec::with_capacity(members.len());
    let mut offset = 0;
    for member in members {
        let field = describe_type(member);
        match field.layout {
            Some((size, align)) if field.kind.is_primitive() => {
                let aligned = align_up(offset, align);
                fields.push(StructField {
                    offset: aligned,
                    kind: field.kind,
                });
                offset = aligned + size;
            }
            _ => {
                return if size_and_align(token).is_some() {
                    TypeKind::Opaque
                } else {
                    TypeKind::Unsupported
                };
            }
        }
    }
    TypeKind::Struct(fields)
}

/// C-style spelling of a type code.
///
/// # Example
///
/// ```rust
/// use xtrace::decoder::type_name;
///
/// assert_eq!(type_name("Q"), "unsigned long long");
/// assert_eq!(type_name("^{Node=@^{Node}}"), "struct Node *");
/// assert_eq!(type_name("[4i]"), "int[4]");
/// ```
#[must_use]
pub fn type_name(token: &str) -> String {
    let simple = match token {
        "v" => Some("void"),
        "c" => Some("char"),
        "C" => Some("unsigned char"),
        "s" => Some("short"),
        "S" => Some("unsigned short"),
        "i" => Some("int"),
        "I" => Some("unsigned int"),
        "l" => Some("long"),
        "L" => Some("unsigned long"),
        "q" => Some("long long"),
        "Q" => Some("unsigned long long"),
        "f" => Some("float"),
        "d" => Some("double"),
        "B" => Some("bool"),
        "*" => Some("char *"),
        "@" => Some("id"),
        "@?" => Some("block"),
        "#" => Some("Class"),
        ":" => Some("SEL"),
        "^?" => Some("function pointer"),
        "?" => Some("unknown"),
        _ => None,
    };
    if let Some(name) = simple {
        return name.to_string();
    }

    match token.as_bytes().first() {
        Some(b'@') => {
            let class = token[1..].trim_matches('"');
            format!("{class} *")
        }
        Some(b'^') => {
            let inner = next_type(&token[1..]).map_or("?", |(inner, _)| inner);
            format!("{} *", type_name(inner))
        }
        Some(b'{') => aggregate_members(token).map_or_else(
            || token.to_string(),
            |(name, _)| format!("struct {name}"),
        ),
        Some(b'(') => aggregate_members(token).map_or_else(
            || token.to_string(),
            |(name, _)| format!("union {name}"),
        ),
        Some(b'[') => {
            let body = token[1..].trim_end_matches(']');
            let digits = body.bytes().take_while(u8::is_ascii_digit).count();
            let elem = next_type(&body[digits..]).map_or("?", |(elem, _)| elem);
            format!("{}[{}]", type_name(elem), &body[..digits])
        }
        Some(b'b') => format!("bitfield:{}", &token[1..]),
        _ => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sel(name: &str) -> Selector {
        Selector::from_str(name).unwrap()
    }

    #[test]
    fn test_decode_no_arguments() {
        let sig = decode(sel("count"), "Q@:");
        assert_eq!(sig.ret.kind, TypeKind::UnsignedInt(8));
        assert_eq!(sig.ret.type_name, "unsigned long long");
        assert!(sig.args.is_empty());
    }

    #[test]
    fn test_decode_offsets_follow_alignment() {
        let sig = decode(sel("put:at:scale:"), "v@:cid");
        let offsets: Vec<_> = sig.args.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(4), Some(8)]);
        let names: Vec<_> = sig.args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["put", "at", "scale"]);
    }

    #[test]
    fn test_decode_with_stack_offsets_in_encoding() {
        let sig = decode(sel("setFlag:"), "v20@0:8B16");
        assert_eq!(sig.args.len(), 1);
        assert_eq!(sig.args[0].ty.kind, TypeKind::Bool);
        assert_eq!(sig.args[0].offset, Some(0));
    }

    #[test]
    fn test_decode_names_fall_back_to_position() {
        let sig = decode(sel("with::"), "v@:ii");
        assert_eq!(sig.args[0].name, "with");
        assert_eq!(sig.args[1].name, "arg1");

        // More encoded arguments than selector parts
        let sig = decode(sel("variadic:"), "v@:ii");
        assert_eq!(sig.args[1].name, "arg1");
    }

    #[test]
    fn test_decode_struct_argument() {
        let sig = decode(sel("moveTo:"), "v@:{Point=dd}");
        let arg = &sig.args[0];
        assert_eq!(arg.ty.type_name, "struct Point");
        assert_eq!(
            arg.ty.kind,
            TypeKind::Struct(vec![
                StructField {
                    offset: 0,
                    kind: TypeKind::Float(8)
                },
                StructField {
                    offset: 8,
                    kind: TypeKind::Float(8)
                },
            ])
        );
        assert_eq!(arg.ty.layout, Some((16, 8)));
    }

    #[test]
    fn test_decode_nested_struct_is_opaque() {
        let sig = decode(sel("setFrame:tag:"), "v@:{Rect={Point=dd}{Size=dd}}i");
        assert_eq!(sig.args[0].ty.kind, TypeKind::Opaque);
        assert_eq!(sig.args[0].ty.type_name, "struct Rect");
        // Size is known, so the next argument is still readable
        assert_eq!(sig.args[1].offset, Some(32));
    }

    #[test]
    fn test_decode_unsized_argument_blocks_the_rest() {
        let sig = decode(sel("odd:after:"), "v@:?i");
        assert_eq!(sig.args[0].ty.kind, TypeKind::Unsupported);
        assert!(!sig.args[0].is_supported());
        assert_eq!(sig.args[1].offset, None);
        assert!(!sig.args[1].is_supported());
        assert_eq!(sig.supported_count(), 0);
    }

    #[test]
    fn test_decode_past_bound() {
        let encoding = format!("v@:{}", "i".repeat(12));
        let sig = decode(sel("many"), &encoding);
        assert_eq!(sig.args.len(), 12);
        assert!(sig.args[..ARGS_SUPPORTED].iter().all(ArgDescriptor::is_supported));
        assert!(sig.args[ARGS_SUPPORTED..].iter().all(|a| !a.is_supported()));
        assert_eq!(sig.supported_count(), ARGS_SUPPORTED);
    }

    #[test]
    fn test_describe_special_codes() {
        assert_eq!(describe_type("@?").kind, TypeKind::Opaque);
        assert_eq!(describe_type("@?").type_name, "block");
        assert_eq!(describe_type("^?").type_name, "function pointer");
        assert_eq!(describe_type("^v").type_name, "void *");
        assert_eq!(describe_type("^v").kind, TypeKind::Pointer);
        assert_eq!(describe_type("(U=if)").kind, TypeKind::Opaque);
        assert_eq!(describe_type("(U=if)").type_name, "union U");
        assert_eq!(describe_type("{Node}").kind, TypeKind::Unsupported);
        assert_eq!(describe_type("#").type_name, "Class");
        assert_eq!(describe_type(":").type_name, "SEL");
        assert_eq!(describe_type("x").kind, TypeKind::Unsupported);
    }

    #[test]
    fn test_decode_empty_encoding() {
        let sig = decode(sel("broken"), "");
        assert!(sig.ret.is_void());
        assert!(sig.args.is_empty());
    }
}
