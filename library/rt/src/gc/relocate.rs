use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::trace;

use crate::term::{TaggedRef, ADDRESS_MASK};

// Sentinel stored in a forwarding slot between claim and copy completion.
// Not a valid masked address, so it can never collide with a real forward.
const IN_PROGRESS: u64 = u64::MAX;

/// The compaction/evacuation executor. Implemented outside this crate; the
/// core only drives the per-object claim/forward handshake against it.
pub trait Evacuator: Send + Sync {
    /// Copies the object `from` points at out of its protected region and
    /// returns the masked address of the new location. Called exactly once
    /// per object, by whichever thread wins the claim.
    fn evacuate(&self, from: TaggedRef) -> u64;
}

/// Bookkeeping for one region currently being evacuated.
///
/// Mutators that trip the relocation trigger cooperate here rather than
/// waiting for the executor: the first thread to need an object claims it,
/// copies it via the [`Evacuator`], and publishes the forwarded address.
/// Every other thread observes that forward, so once any thread has seen an
/// object as migrated, all subsequent readers resolve to the same new
/// address. Forwarding is write-once-then-stable.
pub struct Relocation {
    region: u32,
    evacuator: Arc<dyn Evacuator>,
    forwards: DashMap<u64, Arc<AtomicU64>>,
}

impl Relocation {
    pub(super) fn new(region: u32, evacuator: Arc<dyn Evacuator>) -> Self {
        Self {
            region,
            evacuator,
            forwards: DashMap::new(),
        }
    }

    #[inline]
    pub fn region(&self) -> u32 {
        self.region
    }

    /// The number of objects forwarded out of this region so far.
    pub fn forwarded(&self) -> usize {
        self.forwards.len()
    }

    /// Resolves `reference` to its post-migration location, claiming and
    /// performing the copy if no other thread has yet.
    ///
    /// A claimed-but-incomplete forward is spun on: proceeding with the
    /// stale address is never an option.
    pub fn forward(&self, reference: TaggedRef) -> TaggedRef {
        debug_assert_eq!(self.region, reference.region());
        let from = reference.address();

        let (slot, claimed) = match self.forwards.entry(from) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let slot = Arc::new(AtomicU64::new(IN_PROGRESS));
                entry.insert(Arc::clone(&slot));
                (slot, true)
            }
        };

        if claimed {
            trace!(target: "gc", "claimed evacuation of {:#x} out of region {}", from, self.region);
            let to = self.evacuator.evacuate(reference);
            debug_assert_eq!(to & !ADDRESS_MASK, 0, "evacuator returned an unmaskable address");
            slot.store(to, Ordering::Release);
            return reference.with_address(to);
        }

        loop {
            let to = slot.load(Ordering::Acquire);
            if to != IN_PROGRESS {
                return reference.with_address(to);
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::term::{Space, TypeTag, REGION_SIZE};

    use super::*;

    struct BumpEvacuator {
        copies: AtomicUsize,
    }

    impl BumpEvacuator {
        fn new() -> Self {
            Self {
                copies: AtomicUsize::new(0),
            }
        }
    }

    impl Evacuator for BumpEvacuator {
        fn evacuate(&self, from: TaggedRef) -> u64 {
            self.copies.fetch_add(1, Ordering::SeqCst);
            // Pretend everything moves one region up
            from.address() + REGION_SIZE
        }
    }

    fn protected_ref() -> TaggedRef {
        TaggedRef::new(TypeTag::Constructor, 12, 34, 42, Space::new(9), false, 7)
    }

    #[test]
    fn forward_is_write_once() {
        let evacuator = Arc::new(BumpEvacuator::new());
        let relocation = Relocation::new(42, evacuator.clone());

        let reference = protected_ref();
        let first = relocation.forward(reference);
        let second = relocation.forward(reference);

        assert_eq!(first, second);
        assert_eq!(reference.address() + REGION_SIZE, first.address());
        assert_eq!(reference.type_tag(), first.type_tag());
        assert_eq!(reference.tag(), first.tag());
        assert_eq!(1, evacuator.copies.load(Ordering::SeqCst));
        assert_eq!(1, relocation.forwarded());
    }

    #[test]
    fn racing_threads_converge_on_one_copy() {
        const THREADS: usize = 8;

        let evacuator = Arc::new(BumpEvacuator::new());
        let relocation = Arc::new(Relocation::new(42, evacuator.clone()));

        let reference = protected_ref();
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let relocation = Arc::clone(&relocation);
                thread::spawn(move || relocation.forward(reference))
            })
            .collect();

        let forwarded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(1, evacuator.copies.load(Ordering::SeqCst));
        for result in &forwarded {
            assert_eq!(forwarded[0], *result);
        }
    }
}
