//! Type encoding for Objective-C style method signatures.
//!
//! A method encoding is a string of type codes: the return type first, then
//! the receiver (`@`), the selector (`:`) and one code per argument. Codes are
//! scanned token by token; this module only splits and sizes them, the
//! interpretation for display lives in the interception engine.
//!
//! # Encoding Format
//!
//! - `c` `C` `s` `S` `i` `I` `l` `L` `q` `Q` - signed/unsigned integers of
//!   width 1, 2, 4, 8, 8 (`l`/`L` are 64-bit here)
//! - `f` `d` - float, double
//! - `B` - bool
//! - `v` - void
//! - `*` - C string
//! - `@` - object (`@"Name"` names the class, `@?` is a block)
//! - `#` - class
//! - `:` - selector
//! - `^type` - pointer to type (`^?` is a function pointer)
//! - `{name=types}` - struct, `(name=types)` - union, `[Ntype]` - array
//! - `bN` - bitfield of N bits
//! - `?` - unknown
//!
//! Type qualifiers (`r n N o O R V`) and the stack-offset digits emitted by
//! some compilers are skipped.
//!
//! Example encodings:
//! - `"v@:"` - void return, no arguments
//! - `"i@:i"` - int return, one int argument
//! - `"v24@0:8{Point=dd}16"` - void return, one struct argument, with offsets

#![allow(clippy::match_same_arms)]

use crate::error::{Error, Result};

/// Type encoding constant definitions.
pub mod types {
    /// Void type encoding
    pub const VOID: &str = "v";

    /// Object (id) type encoding
    pub const OBJECT: &str = "@";

    /// Selector (SEL) type encoding
    pub const SELECTOR: &str = ":";

    /// Char (i8) type encoding
    pub const CHAR: &str = "c";

    /// Int (i32) type encoding
    pub const INT: &str = "i";

    /// Unsigned int (u32) type encoding
    pub const UNSIGNED_INT: &str = "I";

    /// Long (64-bit) type encoding
    pub const LONG: &str = "l";

    /// Long long (i64) type encoding
    pub const LONG_LONG: &str = "q";

    /// Unsigned long long (u64) type encoding
    pub const UNSIGNED_LONG_LONG: &str = "Q";

    /// Float (f32) type encoding
    pub const FLOAT: &str = "f";

    /// Double (f64) type encoding
    pub const DOUBLE: &str = "d";

    /// Bool type encoding
    pub const BOOL: &str = "B";

    /// C string (char*) type encoding
    pub const C_STRING: &str = "*";

    /// Pointer (void*) type encoding
    pub const POINTER: &str = "^v";

    /// Class type encoding
    pub const CLASS: &str = "#";

    /// Block type encoding
    pub const BLOCK: &str = "@?";
}

const QUALIFIERS: &[u8] = b"rnNoORV";

/// Strips leading qualifiers, offset digits and quoted member names.
fn skip_noise(mut s: &str) -> &str {
    loop {
        let Some(&b) = s.as_bytes().first() else {
            return s;
        };
        if QUALIFIERS.contains(&b) || b.is_ascii_digit() || b == b'-' {
            s = &s[1..];
        } else if b == b'"' {
            // Quoted member name inside a struct body
            match s[1..].find('"') {
                Some(end) => s = &s[end + 2..],
                None => return "",
            }
        } else {
            return s;
        }
    }
}

/// Returns the length of a bracketed group starting at `s[0]`.
///
/// Returns `None` if the group is not closed.
fn group_len(s: &str, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, b) in s.bytes().enumerate() {
        if b == b'"' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }
    None
}

/// Scans the next type token from `encoding`.
///
/// Returns `(token, rest)`, or `None` when only qualifiers/digits remain.
/// An unterminated struct, union or array swallows the rest of the string as
/// a single token, so scanning never fails.
///
/// # Example
///
/// ```
/// use xtrace_runtime::runtime::encoding::next_type;
///
/// assert_eq!(next_type("v@:"), Some(("v", "@:")));
/// assert_eq!(next_type("16{Point=dd}24i"), Some(("{Point=dd}", "24i")));
/// assert_eq!(next_type("^{Node=@^{Node}}"), Some(("^{Node=@^{Node}}", "")));
/// assert_eq!(next_type("24"), None);
/// ```
#[must_use]
pub fn next_type(encoding: &str) -> Option<(&str, &str)> {
    let s = skip_noise(encoding);
    let first = *s.as_bytes().first()?;

    let len = match first {
        b'^' => {
            let inner = next_type(&s[1..]).map_or(0, |(tok, _)| {
                // Offset of the inner token within s[1..]
                let start = tok.as_ptr() as usize - s[1..].as_ptr() as usize;
                start + tok.len()
            });
            1 + inner
        }
        b'@' => match s.as_bytes().get(1) {
            Some(b'?') => 2,
            Some(b'"') => s[2..].find('"').map_or(s.len(), |end| end + 3),
            _ => 1,
        },
        b'{' => group_len(s, b'{', b'}').unwrap_or(s.len()),
        b'(' => group_len(s, b'(', b')').unwrap_or(s.len()),
        b'[' => group_len(s, b'[', b']').unwrap_or(s.len()),
        b'b' => 1 + s[1..].bytes().take_while(u8::is_ascii_digit).count(),
        _ => s.chars().next().map_or(1, char::len_utf8),
    };

    Some((&s[..len], &s[len..]))
}

/// Splits a full encoding into its type tokens.
///
/// # Example
///
/// ```
/// use xtrace_runtime::runtime::encoding::split_types;
///
/// assert_eq!(split_types("i@:if"), vec!["i", "@", ":", "i", "f"]);
/// assert_eq!(split_types("v24@0:8d16"), vec!["v", "@", ":", "d"]);
/// ```
#[must_use]
pub fn split_types(encoding: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = encoding;
    while let Some((token, tail)) = next_type(rest) {
        tokens.push(token);
        rest = tail;
    }
    tokens
}

/// Validates a type encoding string for a method signature.
///
/// A method encoding must hold a return type followed by the receiver (`@`)
/// and selector (`:`) slots. Argument codes are not checked here: unknown or
/// complex codes are legal and are degraded at decode time.
///
/// # Example
///
/// ```
/// use xtrace_runtime::runtime::encoding::validate_encoding;
///
/// assert!(validate_encoding("v@:").is_ok());
/// assert!(validate_encoding("i@:i").is_ok());
/// assert!(validate_encoding("v@:{Weird=?}").is_ok());
/// assert!(validate_encoding("@").is_err()); // Missing self and _cmd
/// ```
///
/// # Errors
///
/// Returns [`Error::InvalidEncoding`] if the encoding string is empty or
/// doesn't include the required self and _cmd slots.
pub fn validate_encoding(encoding: &str) -> Result<()> {
    let tokens = split_types(encoding);
    let valid = tokens.len() >= 3 && tokens[1].starts_with('@') && tokens[2] == ":";
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidEncoding {
            encoding: encoding.to_string(),
        })
    }
}

/// Number of arguments after the receiver and selector slots.
#[must_use]
pub fn method_arg_count(encoding: &str) -> usize {
    split_types(encoding).len().saturating_sub(3)
}

/// Returns the return-type token of a method encoding.
#[must_use]
pub fn return_type(encoding: &str) -> Option<&str> {
    next_type(encoding).map(|(token, _)| token)
}

/// Rounds `offset` up to the next multiple of `align`.
#[must_use]
pub const fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

/// Splits a struct or union token into its name and member tokens.
///
/// # Example
///
/// ```
/// use xtrace_runtime::runtime::encoding::aggregate_members;
///
/// let (name, fields) = aggregate_members("{Point=\"x\"d\"y\"d}").unwrap();
/// assert_eq!(name, "Point");
/// assert_eq!(fields, vec!["d", "d"]);
///
/// // Forward references carry no member list
/// let (name, fields) = aggregate_members("{Node}").unwrap();
/// assert_eq!(name, "Node");
/// assert!(fields.is_empty());
/// ```
#[must_use]
pub fn aggregate_members(token: &str) -> Option<(&str, Vec<&str>)> {
    let close = match token.as_bytes().first()? {
        b'{' => '}',
        b'(' => ')',
        _ => return None,
    };
    let body = token[1..].strip_suffix(close)?;
    match body.split_once('=') {
        Some((name, members)) => Some((name, split_types(members))),
        None => Some((body, Vec::new())),
    }
}

/// Returns the size and alignment in bytes of a single type token.
///
/// Structs follow C layout rules. Returns `None` if the size cannot be
/// determined (void-sized unknowns, bitfields, forward-declared aggregates).
///
/// # Example
///
/// ```
/// use xtrace_runtime::runtime::encoding::size_and_align;
///
/// assert_eq!(size_and_align("i"), Some((4, 4)));
/// assert_eq!(size_and_align("q"), Some((8, 8)));
/// assert_eq!(size_and_align("v"), Some((0, 1)));
/// assert_eq!(size_and_align("{Pair=ci}"), Some((8, 4)));
/// assert_eq!(size_and_align("?"), None);
/// ```
#[must_use]
pub fn size_and_align(token: &str) -> Option<(usize, usize)> {
    let first = *token.as_bytes().first()?;
    match first {
        b'v' => Some((0, 1)),
        b'c' | b'C' | b'B' => Some((1, 1)),
        b's' | b'S' => Some((2, 2)),
        b'i' | b'I' | b'f' => Some((4, 4)),
        b'l' | b'L' | b'q' | b'Q' | b'd' => Some((8, 8)),
        b'*' | b'@' | b'#' | b':' | b'^' => Some((8, 8)),
        b'{' => {
            let (_, members) = aggregate_members(token)?;
            if members.is_empty() {
                return None;
            }
            let mut offset = 0;
            let mut align = 1;
            for member in members {
                let (size, member_align) = size_and_align(member)?;
                offset = align_up(offset, member_align) + size;
                align = align.max(member_align);
            }
            Some((align_up(offset, align), align))
        }
        b'(' => {
            let (_, members) = aggregate_members(token)?;
            let mut size = 0;
            let mut align = 1;
            for member in members {
                let (member_size, member_align) = size_and_align(member)?;
                size = size.max(member_size);
                align = align.max(member_align);
            }
            (size > 0).then(|| (align_up(size, align), align))
        }
        b'[' => {
            let body = token[1..].strip_suffix(']')?;
            let digits = body.bytes().take_while(u8::is_ascii_digit).count();
            let count: usize = body[..digits].parse().ok()?;
            let (elem_size, elem_align) = size_and_align(next_type(&body[digits..])?.0)?;
            Some((count * elem_size, elem_align))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_encoding_valid() {
        assert!(validate_encoding("v@:").is_ok());
        assert!(validate_encoding("i@:i").is_ok());
        assert!(validate_encoding("@@:@").is_ok());
        assert!(validate_encoding("q@:dq").is_ok());
        assert!(validate_encoding("v24@0:8i16").is_ok());
        assert!(validate_encoding("v@\"Widget\":").is_ok());
    }

    #[test]
    fn test_validate_encoding_invalid() {
        assert!(validate_encoding("").is_err());
        assert!(validate_encoding("v:@").is_err());
        assert!(validate_encoding("@").is_err());
        assert!(validate_encoding("v@").is_err());
    }

    #[test]
    fn test_split_types_skips_qualifiers_and_offsets() {
        assert_eq!(split_types("Vv16@0:8r*8"), vec!["v", "@", ":", "*"]);
        assert_eq!(split_types("@?"), vec!["@?"]);
        assert_eq!(split_types("v@:@?^?"), vec!["v", "@", ":", "@?", "^?"]);
    }

    #[test]
    fn test_split_types_aggregates() {
        assert_eq!(
            split_types("v@:{Rect={Point=dd}{Size=dd}}i"),
            vec!["v", "@", ":", "{Rect={Point=dd}{Size=dd}}", "i"]
        );
        assert_eq!(split_types("v@:[4i](U=if)b3"), vec!["v", "@", ":", "[4i]", "(U=if)", "b3"]);
    }

    #[test]
    fn test_split_types_unterminated_struct() {
        assert_eq!(split_types("v@:{Broken=ii"), vec!["v", "@", ":", "{Broken=ii"]);
    }

    #[test]
    fn test_method_arg_count() {
        assert_eq!(method_arg_count("v@:"), 0);
        assert_eq!(method_arg_count("i@:if"), 2);
        assert_eq!(method_arg_count("v@:{Point=dd}^v"), 2);
        assert_eq!(method_arg_count("v"), 0);
    }

    #[test]
    fn test_size_and_align_primitives() {
        assert_eq!(size_and_align("c"), Some((1, 1)));
        assert_eq!(size_and_align("s"), Some((2, 2)));
        assert_eq!(size_and_align("f"), Some((4, 4)));
        assert_eq!(size_and_align("d"), Some((8, 8)));
        assert_eq!(size_and_align("@"), Some((8, 8)));
        assert_eq!(size_and_align("^{Node}"), Some((8, 8)));
        assert_eq!(size_and_align("x"), None);
        assert_eq!(size_and_align("b4"), None);
    }

    #[test]
    fn test_size_and_align_aggregates() {
        assert_eq!(size_and_align("{Point=dd}"), Some((16, 8)));
        assert_eq!(size_and_align("{Mixed=cdc}"), Some((24, 8)));
        assert_eq!(size_and_align("{Node}"), None);
        assert_eq!(size_and_align("(U=cd)"), Some((8, 8)));
        assert_eq!(size_and_align("[3s]"), Some((6, 2)));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(5, 1), 5);
    }

    #[test]
    fn test_return_type() {
        assert_eq!(return_type("i@:"), Some("i"));
        assert_eq!(return_type("{Point=dd}16@0:8"), Some("{Point=dd}"));
        assert_eq!(return_type(""), None);
    }

    #[test]
    fn test_type_constants() {
        assert_eq!(types::VOID, "v");
        assert_eq!(types::OBJECT, "@");
        assert_eq!(types::SELECTOR, ":");
        assert_eq!(types::INT, "i");
        assert_eq!(types::DOUBLE, "d");
        assert_eq!(types::C_STRING, "*");
        assert_eq!(types::BLOCK, "@?");
    }
}
