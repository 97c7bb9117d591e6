/// The number of generation/locality classes addressable by a reference.
pub const NUM_SPACES: usize = 16;
/// Spaces 1 through 7 are private to a single mutator thread.
pub const LOCAL_SPACES: usize = 7;
/// Spaces 8 through 15 are shared between threads.
pub const GLOBAL_SPACES: usize = 8;

const LOCAL_MIN: u8 = 1;
const LOCAL_MAX: u8 = 7;
const GLOBAL_MIN: u8 = 8;
const GLOBAL_MAX: u8 = 15;

/// A generation/locality class.
///
/// Space 0 is reserved for external encodings (null, small integers, inline
/// floats); references into it carry no heap address and are never subject
/// to the load barrier. Local spaces belong to exactly one mutator thread,
/// global spaces are shared.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Space(u8);

impl Space {
    pub const EXTERNAL: Self = Self(0);

    #[inline]
    pub fn new(raw: u8) -> Self {
        debug_assert!((raw as usize) < NUM_SPACES);
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        (LOCAL_MIN..=LOCAL_MAX).contains(&self.0)
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        (GLOBAL_MIN..=GLOBAL_MAX).contains(&self.0)
    }

    /// The index of this space's queue within the per-context local queues.
    ///
    /// Only meaningful for local spaces.
    #[inline]
    pub fn local_index(&self) -> usize {
        debug_assert!(self.is_local());
        (self.0 - LOCAL_MIN) as usize
    }

    /// The index of this space's queue within the shared global queues.
    ///
    /// Only meaningful for global spaces.
    #[inline]
    pub fn global_index(&self) -> usize {
        debug_assert!(self.is_global());
        (self.0 - GLOBAL_MIN) as usize
    }
}
