//! Node taxonomy: tagged slots, size classes, and the six node shapes
//! described by the trie's data model.
//!
//! A [`Slot`] is a plain `usize`: the low 3 bits are a [`Tag`] and the
//! high bits are the byte address of the tagged node inside the
//! arena. A slot value of zero means "empty". Every node type is a
//! thin, `Copy` view over a raw byte pointer; the view knows how many
//! bytes the node occupies and (for linear nodes) the current
//! `keysize`, and does the anchor arithmetic described in spec §3/§9.

use std::mem;

/// Width of a slot/child reference, in bytes. The canonical target is
/// 64-bit, so this is 8.
pub const SLOT_WIDTH: usize = mem::size_of::<usize>();

/// Maximum contiguous key bytes a span node stores inline.
pub const SPAN_BYTES: usize = 28;

/// Mask over the low 3 tag bits of a slot.
const TAG_MASK: usize = 0x07;
const ADDR_MASK: usize = !TAG_MASK;

/// Node-type tag, packed into the low 3 bits of every child reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Radix = 0,
    Linear1 = 1,
    Linear2 = 2,
    Linear4 = 3,
    Linear8 = 4,
    Linear16 = 5,
    Linear32 = 6,
    Span = 7,
}

impl Tag {
    #[inline]
    pub fn from_bits(bits: usize) -> Tag {
        match bits & TAG_MASK {
            0 => Tag::Radix,
            1 => Tag::Linear1,
            2 => Tag::Linear2,
            3 => Tag::Linear4,
            4 => Tag::Linear8,
            5 => Tag::Linear16,
            6 => Tag::Linear32,
            7 => Tag::Span,
            _ => unreachable!(),
        }
    }

    /// The linear capacity this tag denotes (1, 2, 4, 8, 16 or 32),
    /// panics for Radix/Span which are not linear nodes.
    #[inline]
    pub fn linear_n(self) -> usize {
        match self {
            Tag::Linear1 => 1,
            Tag::Linear2 => 2,
            Tag::Linear4 => 4,
            Tag::Linear8 => 8,
            Tag::Linear16 => 16,
            Tag::Linear32 => 32,
            _ => panic!("linear_n called on non-linear tag"),
        }
    }

    /// The next larger linear tag, used by promote (spec §4.4).
    #[inline]
    pub fn promoted(self) -> Tag {
        match self {
            Tag::Linear1 => Tag::Linear2,
            Tag::Linear2 => Tag::Linear4,
            Tag::Linear4 => Tag::Linear8,
            Tag::Linear8 => Tag::Linear16,
            Tag::Linear16 => Tag::Linear32,
            _ => panic!("promoted called on a node with no larger class"),
        }
    }

    #[inline]
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            Tag::Linear1 | Tag::Linear2 | Tag::Linear4 | Tag::Linear8 | Tag::Linear16 | Tag::Linear32
        )
    }
}

/// All eight size classes, in allocation order: radix, the six linear
/// capacities, then span. Index into [`CLASS_ALLOC_SIZE`].
pub const NUM_CLASSES: usize = 8;

pub const CLASS_RADIX: usize = 0;
pub const CLASS_LINEAR: [usize; 6] = [1, 2, 3, 4, 5, 6];
pub const CLASS_SPAN: usize = 7;

/// Logical (unpadded) byte size of a fully-populated node of each
/// class, used for anchor/offset arithmetic. A radix table is 16
/// slots; a linear-N node nominally reserves a full `SLOT_WIDTH`-byte
/// partial key per slot even though the *usable* capacity at a given
/// keysize can differ (see [`linear_capacity`]); a span node is its
/// byte payload plus one child slot.
pub const CLASS_LOGICAL_SIZE: [usize; NUM_CLASSES] = [
    16 * SLOT_WIDTH,
    1 * 2 * SLOT_WIDTH,
    2 * 2 * SLOT_WIDTH,
    4 * 2 * SLOT_WIDTH,
    8 * 2 * SLOT_WIDTH,
    16 * 2 * SLOT_WIDTH,
    32 * 2 * SLOT_WIDTH,
    SPAN_BYTES + SLOT_WIDTH,
];

/// Physical byte size actually carved out of the arena for each class:
/// the logical size rounded up to a multiple of 8 (spec §4.1 step 1).
pub const fn round_up_8(n: usize) -> usize {
    (n + 7) & !7
}

pub fn class_alloc_size(class: usize) -> usize {
    round_up_8(CLASS_LOGICAL_SIZE[class])
}

#[inline]
pub fn tag_to_class(tag: Tag) -> usize {
    match tag {
        Tag::Radix => CLASS_RADIX,
        Tag::Linear1 => 1,
        Tag::Linear2 => 2,
        Tag::Linear4 => 3,
        Tag::Linear8 => 4,
        Tag::Linear16 => 5,
        Tag::Linear32 => 6,
        Tag::Span => CLASS_SPAN,
    }
}

#[inline]
pub fn class_to_tag(class: usize) -> Tag {
    match class {
        CLASS_RADIX => Tag::Radix,
        1 => Tag::Linear1,
        2 => Tag::Linear2,
        3 => Tag::Linear4,
        4 => Tag::Linear8,
        5 => Tag::Linear16,
        6 => Tag::Linear32,
        CLASS_SPAN => Tag::Span,
        _ => panic!("invalid size class {}", class),
    }
}

/// A tagged child reference: either empty (zero) or an address plus a
/// [`Tag`] identifying the node it addresses.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub usize);

impl Slot {
    pub const EMPTY: Slot = Slot(0);

    #[inline]
    pub fn new(addr: usize, tag: Tag) -> Slot {
        debug_assert_eq!(addr & TAG_MASK, 0, "node addresses must be 8-byte aligned");
        Slot(addr | tag as usize)
    }

    /// A slot that is not a tagged child reference at all, just a raw
    /// value cell (used for the leaf payload words).
    #[inline]
    pub fn raw(value: usize) -> Slot {
        Slot(value)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn tag(self) -> Tag {
        Tag::from_bits(self.0)
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0 & ADDR_MASK
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.addr() as *mut u8
    }
}

/// Read a big-endian `keysize`-byte partial key out of `ptr`.
#[inline]
pub unsafe fn read_partial_key(ptr: *const u8, keysize: usize) -> u64 {
    let mut v: u64 = 0;
    for i in 0..keysize {
        v = (v << 8) | u64::from(*ptr.add(i));
    }
    v
}

/// Write a big-endian `keysize`-byte partial key into `ptr`.
#[inline]
pub unsafe fn write_partial_key(ptr: *mut u8, keysize: usize, value: u64) {
    for i in 0..keysize {
        let shift = 8 * (keysize - 1 - i);
        *ptr.add(i) = (value >> shift) as u8;
    }
}

#[inline]
unsafe fn read_usize(ptr: *const u8) -> usize {
    let mut buf = [0u8; SLOT_WIDTH];
    std::ptr::copy_nonoverlapping(ptr, buf.as_mut_ptr(), SLOT_WIDTH);
    usize::from_ne_bytes(buf)
}

#[inline]
unsafe fn write_usize(ptr: *mut u8, value: usize) {
    let buf = value.to_ne_bytes();
    std::ptr::copy_nonoverlapping(buf.as_ptr(), ptr, SLOT_WIDTH);
}

/// A 16-slot radix table. Used in pairs: an outer table indexed by a
/// key byte's high nibble whose entries address inner tables indexed
/// by the low nibble.
#[derive(Clone, Copy)]
pub struct RadixNode {
    pub base: *mut u8,
}

impl RadixNode {
    #[inline]
    pub fn at(base: *mut u8) -> RadixNode {
        RadixNode { base }
    }

    #[inline]
    pub fn get(self, i: usize) -> Slot {
        debug_assert!(i < 16);
        unsafe { Slot(read_usize(self.base.add(i * SLOT_WIDTH))) }
    }

    #[inline]
    pub fn set(self, i: usize, slot: Slot) {
        debug_assert!(i < 16);
        unsafe { write_usize(self.base.add(i * SLOT_WIDTH), slot.0) }
    }

    pub fn any_occupied(self) -> bool {
        (0..16).any(|i| !self.get(i).is_empty())
    }
}

/// A sorted, capacity-N array of partial keys with N child slots
/// growing down from the anchor at `base + byte_size`.
///
/// `keysize` is `SLOT_WIDTH - (off % SLOT_WIDTH)`: the number of key
/// bytes still owed at this digit. The usable capacity of the node
/// (`cnt`) is derived from the node's fixed byte size and the current
/// `keysize` (spec §4.3/§9): nodes allocated while deeper inside a
/// digit pack more entries into the same footprint.
#[derive(Clone, Copy)]
pub struct LinearNode {
    pub base: *mut u8,
    pub byte_size: usize,
    pub keysize: usize,
}

impl LinearNode {
    #[inline]
    pub fn at(base: *mut u8, byte_size: usize, keysize: usize) -> LinearNode {
        LinearNode { base, byte_size, keysize }
    }

    #[inline]
    pub fn capacity(self) -> usize {
        self.byte_size / (SLOT_WIDTH + self.keysize)
    }

    #[inline]
    fn anchor(self) -> *mut u8 {
        unsafe { self.base.add(self.byte_size) }
    }

    #[inline]
    pub fn key(self, i: usize) -> u64 {
        unsafe { read_partial_key(self.base.add(i * self.keysize), self.keysize) }
    }

    #[inline]
    pub fn set_key(self, i: usize, value: u64) {
        unsafe { write_partial_key(self.base.add(i * self.keysize), self.keysize, value) }
    }

    #[inline]
    pub fn child(self, i: usize) -> Slot {
        unsafe { Slot(read_usize(self.anchor().sub((i + 1) * SLOT_WIDTH))) }
    }

    #[inline]
    pub fn set_child(self, i: usize, slot: Slot) {
        unsafe { write_usize(self.anchor().sub((i + 1) * SLOT_WIDTH), slot.0) }
    }

    /// Move the key/child pair at `from` to slot `to` (used while
    /// shifting entries during insert/delete).
    pub fn move_slot(self, from: usize, to: usize) {
        let k = self.key(from);
        let c = self.child(from);
        self.set_key(to, k);
        self.set_child(to, c);
    }

    pub fn clear_slot(self, i: usize) {
        self.set_key(i, 0);
        self.set_child(i, Slot::EMPTY);
    }
}

/// Up to [`SPAN_BYTES`] contiguous key bytes followed by a single
/// trailing child slot at `anchor[-1]`.
#[derive(Clone, Copy)]
pub struct SpanNode {
    pub base: *mut u8,
}

impl SpanNode {
    #[inline]
    pub fn at(base: *mut u8) -> SpanNode {
        SpanNode { base }
    }

    #[inline]
    fn anchor(self) -> *mut u8 {
        unsafe { self.base.add(CLASS_LOGICAL_SIZE[CLASS_SPAN]) }
    }

    #[inline]
    pub fn byte(self, i: usize) -> u8 {
        debug_assert!(i < SPAN_BYTES);
        unsafe { *self.base.add(i) }
    }

    #[inline]
    pub fn set_byte(self, i: usize, b: u8) {
        debug_assert!(i < SPAN_BYTES);
        unsafe { *self.base.add(i) = b }
    }

    #[inline]
    pub fn copy_from(self, src: &[u8]) {
        debug_assert!(src.len() <= SPAN_BYTES);
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.base, src.len()) }
    }

    #[inline]
    pub fn child(self) -> Slot {
        unsafe { Slot(read_usize(self.anchor().sub(SLOT_WIDTH))) }
    }

    #[inline]
    pub fn set_child(self, slot: Slot) {
        unsafe { write_usize(self.anchor().sub(SLOT_WIDTH), slot.0) }
    }
}
