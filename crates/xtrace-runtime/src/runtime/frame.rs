//! Argument and return-value storage.
//!
//! A [`Frame`] is a flat byte buffer laid out the way a C argument block
//! would be: each value is placed at the next offset aligned to its natural
//! alignment (scalars align to their size, references and pointers to 8,
//! byte blobs to an explicit alignment). The receiver and selector are not
//! part of the frame; argument 0 is the first explicit argument.
//!
//! Non-scalar values are stored as 8-byte handles:
//!
//! | kind     | stored as                                 |
//! |----------|-------------------------------------------|
//! | object   | [`ObjectId`] raw value, `0` for nil        |
//! | class    | [`ClassId`] + 1, `0` for Nil               |
//! | selector | [`SelectorId`] + 1, `0` for NULL           |
//! | C string | index into the frame's string table + 1   |
//! | pointer  | address as `usize`                        |
//!
//! Objects pushed into a frame are retained by it, so a callee can resolve an
//! argument even if the caller dropped its own reference.
//!
//! [`ClassId`]: crate::ClassId
//! [`SelectorId`]: crate::SelectorId

use crate::runtime::class::{Class, ClassId};
use crate::runtime::encoding::align_up;
use crate::runtime::object::{Object, ObjectId};
use crate::runtime::selector::{Selector, SelectorId};
use std::fmt;
use std::sync::Arc;

/// What a slot in a [`Frame`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// Boolean, one byte
    Bool,
    /// Object handle
    Object,
    /// Class handle
    Class,
    /// Selector handle
    Selector,
    /// C string handle
    CString,
    /// Raw address
    Pointer,
    /// Opaque bytes (structs, unions, arrays)
    Bytes {
        /// Size in bytes
        size: usize,
        /// Alignment in bytes
        align: usize,
    },
}

impl SlotKind {
    /// Size and alignment of the slot in bytes.
    #[must_use]
    pub const fn layout(self) -> (usize, usize) {
        match self {
            SlotKind::I8 | SlotKind::U8 | SlotKind::Bool => (1, 1),
            SlotKind::I16 | SlotKind::U16 => (2, 2),
            SlotKind::I32 | SlotKind::U32 | SlotKind::F32 => (4, 4),
            SlotKind::I64
            | SlotKind::U64
            | SlotKind::F64
            | SlotKind::Object
            | SlotKind::Class
            | SlotKind::Selector
            | SlotKind::CString
            | SlotKind::Pointer => (8, 8),
            SlotKind::Bytes { size, align } => (size, align),
        }
    }
}

/// A value's position in a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset
    pub offset: usize,
    /// Slot kind
    pub kind: SlotKind,
}

/// Plain numeric types that can be stored in a frame.
pub trait Scalar: Copy + 'static {
    /// Slot kind recorded for this type.
    const KIND: SlotKind;
    /// Size in bytes (also the alignment).
    const SIZE: usize;

    /// Writes native-endian bytes into `out` (exactly `SIZE` long).
    fn write_bytes(self, out: &mut [u8]);

    /// Reads a value from native-endian bytes (exactly `SIZE` long).
    fn read_bytes(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const KIND: SlotKind = SlotKind::$kind;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_bytes(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn read_bytes(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_ne_bytes)
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Argument or return-value storage for one call.
///
/// # Example
///
/// ```rust
/// use xtrace_runtime::Frame;
///
/// let frame = Frame::new().with(7_u8).with(1.5_f64).with_cstr(Some("hi"));
/// assert_eq!(frame.count(), 3);
///
/// let slots = frame.slots();
/// assert_eq!(slots[1].offset, 8); // f64 aligned to 8
/// assert_eq!(frame.read::<f64>(8), Some(1.5));
/// assert_eq!(frame.read_cstr(16), Some("hi"));
/// ```
#[derive(Clone, Default)]
pub struct Frame {
    bytes: Vec<u8>,
    slots: Vec<Slot>,
    strings: Vec<Arc<str>>,
    retained: Vec<Object>,
}

impl Frame {
    /// Creates an empty frame (no arguments, or a `void` return).
    #[must_use]
    pub fn new() -> Self {
        Frame::default()
    }

    /// A frame holding a single scalar return value.
    #[must_use]
    pub fn returning<T: Scalar>(value: T) -> Self {
        Frame::new().with(value)
    }

    fn reserve_slot(&mut self, kind: SlotKind) -> &mut [u8] {
        let (size, align) = kind.layout();
        let offset = align_up(self.bytes.len(), align);
        self.bytes.resize(offset + size, 0);
        self.slots.push(Slot { offset, kind });
        &mut self.bytes[offset..offset + size]
    }

    fn push_handle(&mut self, kind: SlotKind, raw: u64) {
        self.reserve_slot(kind).copy_from_slice(&raw.to_ne_bytes());
    }

    /// Appends a scalar.
    pub fn push<T: Scalar>(&mut self, value: T) {
        value.write_bytes(self.reserve_slot(T::KIND));
    }

    /// Appends a boolean.
    pub fn push_bool(&mut self, value: bool) {
        self.reserve_slot(SlotKind::Bool)[0] = u8::from(value);
    }

    /// Appends an object reference (`None` is nil). The object is retained.
    pub fn push_object(&mut self, object: Option<&Object>) {
        let raw = object.map_or(0, |obj| obj.id().as_u64());
        if let Some(obj) = object {
            if !self.retained.contains(obj) {
                self.retained.push(obj.clone());
            }
        }
        self.push_handle(SlotKind::Object, raw);
    }

    /// Appends a class (`None` is Nil).
    pub fn push_class(&mut self, class: Option<&Class>) {
        let raw = class.map_or(0, |c| u64::from(c.id().as_u32()) + 1);
        self.push_handle(SlotKind::Class, raw);
    }

    /// Appends a selector (`None` is NULL).
    pub fn push_selector(&mut self, selector: Option<Selector>) {
        let raw = selector.map_or(0, |s| u64::from(s.id().as_u32()) + 1);
        self.push_handle(SlotKind::Selector, raw);
    }

    /// Appends a C string (`None` is NULL).
    pub fn push_cstr(&mut self, value: Option<&str>) {
        let raw = match value {
            Some(s) => {
                self.strings.push(Arc::from(s));
                self.strings.len() as u64
            }
            None => 0,
        };
        self.push_handle(SlotKind::CString, raw);
    }

    /// Appends a raw address.
    pub fn push_pointer(&mut self, address: usize) {
        self.push_handle(SlotKind::Pointer, address as u64);
    }

    /// Appends an opaque byte blob with the given alignment.
    pub fn push_bytes(&mut self, bytes: &[u8], align: usize) {
        let kind = SlotKind::Bytes {
            size: bytes.len(),
            align: align.max(1),
        };
        self.reserve_slot(kind).copy_from_slice(bytes);
    }

    /// Builder form of [`Frame::push`].
    #[must_use]
    pub fn with<T: Scalar>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Builder form of [`Frame::push_bool`].
    #[must_use]
    pub fn with_bool(mut self, value: bool) -> Self {
        self.push_bool(value);
        self
    }

    /// Builder form of [`Frame::push_object`].
    #[must_use]
    pub fn with_object(mut self, object: Option<&Object>) -> Self {
        self.push_object(object);
        self
    }

    /// Builder form of [`Frame::push_class`].
    #[must_use]
    pub fn with_class(mut self, class: Option<&Class>) -> Self {
        self.push_class(class);
        self
    }

    /// Builder form of [`Frame::push_selector`].
    #[must_use]
    pub fn with_selector(mut self, selector: Option<Selector>) -> Self {
        self.push_selector(selector);
        self
    }

    /// Builder form of [`Frame::push_cstr`].
    #[must_use]
    pub fn with_cstr(mut self, value: Option<&str>) -> Self {
        self.push_cstr(value);
        self
    }

    /// Builder form of [`Frame::push_pointer`].
    #[must_use]
    pub fn with_pointer(mut self, address: usize) -> Self {
        self.push_pointer(address);
        self
    }

    /// Builder form of [`Frame::push_bytes`].
    #[must_use]
    pub fn with_bytes(mut self, bytes: &[u8], align: usize) -> Self {
        self.push_bytes(bytes, align);
        self
    }

    /// Re-pushes every value of `other` onto this frame, re-aligning each
    /// slot relative to the current end of the buffer.
    pub fn append(&mut self, other: &Frame) {
        for slot in &other.slots {
            let (size, _) = slot.kind.layout();
            let src = &other.bytes[slot.offset..slot.offset + size];
            match slot.kind {
                SlotKind::Object => {
                    let object = read_u64(src)
                        .and_then(ObjectId::from_u64)
                        .and_then(|id| other.resolve_object(id));
                    match object {
                        Some(obj) => self.push_object(Some(&obj)),
                        // Dead or nil: keep the raw id
                        None => self.push_handle(SlotKind::Object, read_u64(src).unwrap_or(0)),
                    }
                }
                SlotKind::CString => {
                    let value = read_u64(src).and_then(|raw| other.string_at(raw));
                    self.push_cstr(value.as_deref());
                }
                kind => self.reserve_slot(kind).copy_from_slice(src),
            }
        }
    }

    /// Number of values in the frame.
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the frame holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot layout, in push order.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Size of the byte buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Raw bytes at `offset`, or `None` if out of range.
    #[must_use]
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    /// Reads a scalar at `offset`.
    #[must_use]
    pub fn read<T: Scalar>(&self, offset: usize) -> Option<T> {
        T::read_bytes(self.bytes(offset, T::SIZE)?)
    }

    /// Reads a boolean at `offset`.
    #[must_use]
    pub fn read_bool(&self, offset: usize) -> Option<bool> {
        self.read::<u8>(offset).map(|b| b != 0)
    }

    /// Reads an object id at `offset`; `None` for nil or out of range.
    #[must_use]
    pub fn read_object_id(&self, offset: usize) -> Option<ObjectId> {
        self.read::<u64>(offset).and_then(ObjectId::from_u64)
    }

    /// Resolves the object at `offset` if it is alive.
    #[must_use]
    pub fn read_object(&self, offset: usize) -> Option<Object> {
        self.resolve_object(self.read_object_id(offset)?)
    }

    /// Reads a class at `offset`; `None` for Nil or an unknown id.
    #[must_use]
    pub fn read_class(&self, offset: usize) -> Option<Class> {
        let raw = self.read::<u64>(offset)?.checked_sub(1)?;
        Class::from_id(ClassId::from_u32(u32::try_from(raw).ok()?))
    }

    /// Reads a selector at `offset`; `None` for NULL or an unknown id.
    #[must_use]
    pub fn read_selector(&self, offset: usize) -> Option<Selector> {
        let raw = self.read::<u64>(offset)?.checked_sub(1)?;
        Selector::from_id(SelectorId::from_u32(u32::try_from(raw).ok()?))
    }

    /// Reads a C string at `offset`; `None` for NULL.
    #[must_use]
    pub fn read_cstr(&self, offset: usize) -> Option<&str> {
        let raw = self.read::<u64>(offset)?;
        let index = usize::try_from(raw.checked_sub(1)?).ok()?;
        self.strings.get(index).map(|s| &**s)
    }

    /// Reads a raw address at `offset`.
    #[must_use]
    pub fn read_pointer(&self, offset: usize) -> Option<usize> {
        self.read::<u64>(offset).and_then(|raw| usize::try_from(raw).ok())
    }

    fn resolve_object(&self, id: ObjectId) -> Option<Object> {
        self.retained
            .iter()
            .find(|obj| obj.id() == id)
            .cloned()
            .or_else(|| Object::from_id(id))
    }

    fn string_at(&self, raw: u64) -> Option<Arc<str>> {
        let index = usize::try_from(raw.checked_sub(1)?).ok()?;
        self.strings.get(index).cloned()
    }
}

fn read_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_ne_bytes)
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("slots", &self.slots)
            .field("len", &self.bytes.len())
            .finish()
    }
}
