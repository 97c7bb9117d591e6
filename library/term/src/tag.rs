/// The object type carried in the low bits of every [`TaggedRef`].
///
/// The uniqueness of an object is encoded in the lowest bit of the type:
/// `UniqueConstructor` and `UniqueClosure` are the odd values, and clearing
/// that bit produces the type the object is demoted to when it escapes its
/// owning thread. A `UniqueConstructor` becomes a plain `Constructor`; a
/// `UniqueClosure` becomes an `Indirection`, because sharing a unique
/// closure requires wrapping it in a freshly allocated indirection cell.
///
/// The field is 3 bits wide, so three values remain unassigned. A
/// non-concurrent collector could spend them on hash-consing.
///
/// [`TaggedRef`]: crate::TaggedRef
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Constructor = 0,
    UniqueConstructor = 1,
    Indirection = 2,
    UniqueClosure = 3,
    /// A thunk currently under evaluation. Observing one of these from a
    /// second forcing thread is a cyclic-force condition.
    Blackhole = 4,
}

impl TypeTag {
    pub const MAX: u8 = 7;

    /// Decodes a raw 3-bit field value.
    #[inline]
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Constructor),
            1 => Some(Self::UniqueConstructor),
            2 => Some(Self::Indirection),
            3 => Some(Self::UniqueClosure),
            4 => Some(Self::Blackhole),
            _ => None,
        }
    }

    /// True for the types whose objects are still private to the thread
    /// that allocated them.
    #[inline]
    pub fn is_unique(&self) -> bool {
        (*self as u8) & 1 == 1
    }

    /// The type this object takes on once it has escaped single-thread
    /// ownership. Non-unique types are unaffected.
    #[inline]
    pub fn contracted(&self) -> Self {
        match self {
            Self::UniqueConstructor => Self::Constructor,
            Self::UniqueClosure => Self::Indirection,
            other => *other,
        }
    }
}
