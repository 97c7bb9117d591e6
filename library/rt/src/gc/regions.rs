use core::sync::atomic::{AtomicU64, Ordering};

/// Tracks which 2MiB regions are currently protected, i.e. actively being
/// relocated. One bit per region, packed.
///
/// Writers must hold the collector lock; the barrier fast path reads
/// without it and tolerates an arbitrarily stale view. A region observed
/// as unprotected may become protected immediately after the check, which
/// is why the slow path re-consults the active relocation record rather
/// than trusting the bit it raced against.
pub struct RegionTable {
    regions_begin: u32,
    regions_end: u32,
    bits: Box<[AtomicU64]>,
}

impl RegionTable {
    /// Creates a table covering `regions_begin <= region < regions_end`,
    /// with every region initially unprotected.
    pub fn new(regions_begin: u32, regions_end: u32) -> Self {
        assert!(regions_begin <= regions_end);
        let count = (regions_end - regions_begin) as usize;
        let words = (count + 63) / 64;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));
        Self {
            regions_begin,
            regions_end,
            bits: bits.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn regions_begin(&self) -> u32 {
        self.regions_begin
    }

    #[inline]
    pub fn regions_end(&self) -> u32 {
        self.regions_end
    }

    /// Lock-free check used by the barrier fast path.
    #[inline]
    pub fn is_protected(&self, region: u32) -> bool {
        let bit = self.bit_index(region);
        self.bits[bit >> 6].load(Ordering::Relaxed) & (1 << (bit & 0x3f)) != 0
    }

    /// Marks `region` as under relocation. Caller holds the collector lock.
    pub(super) fn protect(&self, region: u32) {
        let bit = self.bit_index(region);
        self.bits[bit >> 6].fetch_or(1 << (bit & 0x3f), Ordering::Release);
    }

    /// Clears the protection bit once migration out of `region` completes.
    /// Caller holds the collector lock.
    pub(super) fn unprotect(&self, region: u32) {
        let bit = self.bit_index(region);
        self.bits[bit >> 6].fetch_and(!(1 << (bit & 0x3f)), Ordering::Release);
    }

    // An out-of-range region means the configured bounds and the actual
    // heap layout have diverged; failing fast beats silently misreading
    // another region's bit.
    #[inline]
    fn bit_index(&self, region: u32) -> usize {
        assert!(
            self.regions_begin <= region && region < self.regions_end,
            "region index {} outside configured bounds [{}, {})",
            region,
            self.regions_begin,
            self.regions_end
        );
        (region - self.regions_begin) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_and_unprotect() {
        let table = RegionTable::new(0, 256);
        assert!(!table.is_protected(42));
        table.protect(42);
        assert!(table.is_protected(42));
        assert!(!table.is_protected(41));
        assert!(!table.is_protected(43));
        table.unprotect(42);
        assert!(!table.is_protected(42));
    }

    #[test]
    fn bounds_are_biased_by_regions_begin() {
        let table = RegionTable::new(100, 164);
        table.protect(100);
        table.protect(163);
        assert!(table.is_protected(100));
        assert!(table.is_protected(163));
        assert!(!table.is_protected(101));
    }

    #[test]
    #[should_panic(expected = "outside configured bounds")]
    fn out_of_range_region_is_fatal() {
        let table = RegionTable::new(100, 164);
        table.is_protected(99);
    }
}
