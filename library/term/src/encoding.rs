//! A reference is a single 64-bit word which is simultaneously a machine
//! address and a self-describing collector value. The low bits that would
//! be forced to zero by alignment and the high bits that sit above the
//! addressable range are spent on collector metadata, so no side table is
//! needed to interpret a reference:
//!
//! ```text
//!   63      45 44  43  40 39       21 20     12 11      3 2    0
//!  +----------+---+------+-----------+---------+---------+------+
//!  |   tag    |nmt| space |  region   | segment | offset  | type |
//!  |  19 bits | 1 | 4 bits|  19 bits  |  9 bits |  9 bits |  3   |
//!  +----------+---+------+-----------+---------+---------+------+
//! ```
//!
//! `offset` selects an 8-byte word within a 4KiB page, `segment` selects a
//! page within a 2MiB region, and `region` selects a region in the address
//! space, for 1TiB of addressable memory. Because each field sits at the
//! bit position it contributes to the address, masking the word recovers
//! the pointer with a single AND; no shifts are required.
use core::fmt;

use static_assertions::const_assert_eq;

use crate::space::Space;
use crate::tag::TypeTag;

pub const NUM_BITS: u64 = 64;
/// All heap objects are at least 8-byte aligned, freeing the type bits.
pub const MIN_ALIGNMENT: u64 = 8;
/// A page is 4KiB: 512 object slots of 8 bytes each.
pub const PAGE_SIZE: u64 = 1 << (OFFSET_BITS + 3);
/// A region is 2MiB: 512 pages.
pub const REGION_SIZE: u64 = PAGE_SIZE << SEGMENT_BITS;

const TYPE_BITS: u64 = 3;
const OFFSET_BITS: u64 = 9;
const SEGMENT_BITS: u64 = 9;
const REGION_BITS: u64 = 19;
const SPACE_BITS: u64 = 4;
const NMT_BITS: u64 = 1;
const TAG_BITS: u64 = 19;

const TYPE_SHIFT: u64 = 0;
const OFFSET_SHIFT: u64 = TYPE_SHIFT + TYPE_BITS;
const SEGMENT_SHIFT: u64 = OFFSET_SHIFT + OFFSET_BITS;
const REGION_SHIFT: u64 = SEGMENT_SHIFT + SEGMENT_BITS;
const SPACE_SHIFT: u64 = REGION_SHIFT + REGION_BITS;
const NMT_SHIFT: u64 = SPACE_SHIFT + SPACE_BITS;
const TAG_SHIFT: u64 = NMT_SHIFT + NMT_BITS;

// Every bit of the word is accounted for
const_assert_eq!(TAG_SHIFT + TAG_BITS, NUM_BITS);

const TYPE_MASK: u64 = ((1 << TYPE_BITS) - 1) << TYPE_SHIFT;
const OFFSET_MASK: u64 = ((1 << OFFSET_BITS) - 1) << OFFSET_SHIFT;
const SEGMENT_MASK: u64 = ((1 << SEGMENT_BITS) - 1) << SEGMENT_SHIFT;
const REGION_MASK: u64 = ((1 << REGION_BITS) - 1) << REGION_SHIFT;
const SPACE_MASK: u64 = ((1 << SPACE_BITS) - 1) << SPACE_SHIFT;
const NMT_MASK: u64 = ((1 << NMT_BITS) - 1) << NMT_SHIFT;
const TAG_MASK: u64 = ((1 << TAG_BITS) - 1) << TAG_SHIFT;

/// Masking a reference with this value yields the machine address of the
/// pointee; `offset`, `segment` and `region` already sit at the bit
/// positions they contribute to the address.
pub const ADDRESS_MASK: u64 = OFFSET_MASK | SEGMENT_MASK | REGION_MASK;

const_assert_eq!(ADDRESS_MASK, 0xFF_FFFF_FFF8);

/// A tagged heap reference.
///
/// References are plain values: they are copied freely by mutators and by
/// the barrier, and never own memory. Constructing, decoding and masking
/// one is branch-free and never touches the pointee. Malformed field values
/// are a caller contract violation, checked only in debug builds.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaggedRef(u64);

impl TaggedRef {
    /// The null reference: an external-space constructor with no address.
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn new(
        ty: TypeTag,
        offset: u16,
        segment: u16,
        region: u32,
        space: Space,
        nmt: bool,
        tag: u32,
    ) -> Self {
        debug_assert!((offset as u64) < (1 << OFFSET_BITS));
        debug_assert!((segment as u64) < (1 << SEGMENT_BITS));
        debug_assert!((region as u64) < (1 << REGION_BITS));
        debug_assert!((tag as u64) < (1 << TAG_BITS));
        Self(
            ((ty as u64) << TYPE_SHIFT)
                | ((offset as u64) << OFFSET_SHIFT)
                | ((segment as u64) << SEGMENT_SHIFT)
                | ((region as u64) << REGION_SHIFT)
                | ((space.raw() as u64) << SPACE_SHIFT)
                | ((nmt as u64) << NMT_SHIFT)
                | ((tag as u64) << TAG_SHIFT),
        )
    }

    /// Reconstitutes a reference from its raw 64-bit representation.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn type_tag(self) -> TypeTag {
        let raw = ((self.0 & TYPE_MASK) >> TYPE_SHIFT) as u8;
        match TypeTag::from_raw(raw) {
            Some(ty) => ty,
            None => unreachable!("invalid type bits in reference"),
        }
    }

    #[inline]
    pub const fn offset(self) -> u16 {
        ((self.0 & OFFSET_MASK) >> OFFSET_SHIFT) as u16
    }

    #[inline]
    pub const fn segment(self) -> u16 {
        ((self.0 & SEGMENT_MASK) >> SEGMENT_SHIFT) as u16
    }

    #[inline]
    pub const fn region(self) -> u32 {
        ((self.0 & REGION_MASK) >> REGION_SHIFT) as u32
    }

    #[inline]
    pub fn space(self) -> Space {
        Space::new(((self.0 & SPACE_MASK) >> SPACE_SHIFT) as u8)
    }

    #[inline]
    pub const fn nmt(self) -> bool {
        self.0 & NMT_MASK != 0
    }

    /// The data-constructor number of the pointee.
    #[inline]
    pub const fn tag(self) -> u32 {
        ((self.0 & TAG_MASK) >> TAG_SHIFT) as u32
    }

    /// True when this reference carries no heap address and is exempt from
    /// the load barrier.
    #[inline]
    pub const fn is_external(self) -> bool {
        self.0 & SPACE_MASK == 0
    }

    /// The machine address of the pointee, recovered with a single mask.
    #[inline]
    pub const fn address(self) -> u64 {
        self.0 & ADDRESS_MASK
    }

    #[inline]
    pub const fn flip_nmt(self) -> Self {
        Self(self.0 ^ NMT_MASK)
    }

    #[inline]
    pub fn with_nmt(self, nmt: bool) -> Self {
        Self((self.0 & !NMT_MASK) | ((nmt as u64) << NMT_SHIFT))
    }

    #[inline]
    pub fn with_type(self, ty: TypeTag) -> Self {
        Self((self.0 & !TYPE_MASK) | ((ty as u64) << TYPE_SHIFT))
    }

    /// Rewrites the address fields to point at `address`, leaving the type,
    /// space, nmt and tag fields untouched. Used when adopting the
    /// forwarded location of a relocated object.
    #[inline]
    pub fn with_address(self, address: u64) -> Self {
        debug_assert_eq!(address & !ADDRESS_MASK, 0, "address out of range");
        debug_assert_eq!(address % MIN_ALIGNMENT, 0, "misaligned address");
        Self((self.0 & !ADDRESS_MASK) | address)
    }

    /// Clears the uniqueness marker, demoting a `UniqueConstructor` to a
    /// plain `Constructor`. The demotion is monotonic; contracting an
    /// already-shared reference is the identity.
    ///
    /// A `UniqueClosure` is deliberately left untouched here: sharing one
    /// requires allocating an indirection cell to wrap it, which the
    /// barrier cannot do. That half of contraction lives with the thunk
    /// update protocol.
    #[inline]
    pub fn contract(self) -> Self {
        if self.type_tag() == TypeTag::UniqueConstructor {
            self.with_type(TypeTag::Constructor)
        } else {
            self
        }
    }
}

impl fmt::Debug for TaggedRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaggedRef")
            .field("type", &self.type_tag())
            .field("address", &format_args!("{:#x}", self.address()))
            .field("space", &self.space().raw())
            .field("nmt", &self.nmt())
            .field("tag", &self.tag())
            .finish()
    }
}
