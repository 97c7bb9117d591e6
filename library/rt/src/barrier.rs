//! The load/value barrier (LVB).
//!
//! Every dereference of a tagged reference runs through
//! [`ExecutionContext::load`]. In the common case the check is a handful
//! of instructions and performs zero writes; only when the reference's
//! embedded metadata disagrees with the current collector expectations
//! does the slow path run, correcting the reference (mark cooperation,
//! relocation cooperation) and publishing the correction back into the
//! memory word it was loaded from. This is how mutators and the collector
//! stay consistent without ever pausing all threads at once.
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::trace;

use crate::context::ExecutionContext;
use crate::term::{TaggedRef, TypeTag};

bitflags! {
    /// The conditions that route a load down the slow path.
    pub struct Trigger: u8 {
        /// The reference has not been marked through in the current cycle.
        const NMT = 0b01;
        /// The reference points into a region under active relocation.
        const RELOC = 0b10;
    }
}

/// A heap memory word holding a [`TaggedRef`].
///
/// Slots are where references live in memory; the barrier loads through
/// them and publishes corrections back with a single compare-and-swap.
#[repr(transparent)]
pub struct RefSlot(AtomicU64);

impl RefSlot {
    pub fn new(reference: TaggedRef) -> Self {
        Self(AtomicU64::new(reference.raw()))
    }

    #[inline]
    pub fn get(&self) -> TaggedRef {
        TaggedRef::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, reference: TaggedRef) {
        self.0.store(reference.raw(), Ordering::Release);
    }

    /// Publishes `new` if the slot still holds `old`. A failed publish
    /// means another thread already installed an equivalent-or-newer
    /// correction; the protocol never depends on winning.
    #[inline]
    pub fn publish(&self, old: TaggedRef, new: TaggedRef) -> bool {
        self.0
            .compare_exchange(old.raw(), new.raw(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for RefSlot {
    fn default() -> Self {
        Self::new(TaggedRef::NULL)
    }
}

impl ExecutionContext {
    /// Loads a reference through the barrier.
    ///
    /// External references (space 0) are exempt. For heap references, the
    /// nmt bit is checked against this context's expectations first, then
    /// the region table is consulted; if either trips, the slow path runs
    /// before the corrected reference is returned. The caller continues
    /// with the returned reference whether or not its correction won the
    /// publish race.
    pub fn load(&mut self, slot: &RefSlot) -> TaggedRef {
        let value = slot.get();
        if value.is_external() {
            return value;
        }
        let mut trigger = Trigger::empty();
        if value.nmt() != self.expected_nmt(value.space()) {
            trigger |= Trigger::NMT;
        }
        if self.collector().regions().is_protected(value.region()) {
            trigger |= Trigger::RELOC;
        }
        if trigger.is_empty() {
            return value;
        }
        self.load_slow(slot, value, trigger)
    }

    #[cold]
    fn load_slow(&mut self, slot: &RefSlot, previous: TaggedRef, trigger: Trigger) -> TaggedRef {
        let mut corrected = previous;

        // Contraction runs before the mark branch: a unique-typed reference
        // observed in a shared space has escaped its owning thread, and the
        // enqueue below must see the demoted type. Unique closures are not
        // demoted here; wrapping one in an indirection requires allocation,
        // which happens on the publish path (see `thunk::escape`).
        if corrected.space().is_global() && corrected.type_tag() == TypeTag::UniqueConstructor {
            corrected = corrected.contract();
        }

        if trigger.contains(Trigger::NMT) {
            corrected = corrected.flip_nmt();
        }

        if trigger.contains(Trigger::RELOC) {
            // The protection bit read on the fast path is racy; the
            // relocation record is the source of truth. A missing record
            // means the region finished migrating under us and there is
            // nothing to cooperate with.
            if let Some(forwarded) = self.collector().cooperate(corrected) {
                corrected = forwarded;
            }
        }

        let published = slot.publish(previous, corrected);

        // Enqueue after the publish so that two threads racing the same
        // check mark a reference at most once per flip: the loser of an
        // identical correction skips the enqueue. Losing to a *different*
        // correction still enqueues, conservatively.
        if trigger.contains(Trigger::NMT) && (published || slot.get() != corrected) {
            self.enqueue_mark(corrected);
        }

        trace!(
            target: "gc",
            "barrier slow path: trigger={:?} {:?} -> {:?} (published: {})",
            trigger,
            previous,
            corrected,
            published
        );
        corrected
    }

    /// Records a reference discovered live and not yet traced. Local spaces
    /// use this context's own queues; global spaces use the shared queues.
    fn enqueue_mark(&mut self, reference: TaggedRef) {
        let space = reference.space();
        if space.is_local() {
            self.local_queue(space).push(reference);
        } else {
            self.collector().global_queue(space).push(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    use crate::gc::{Collector, Evacuator};
    use crate::term::{Space, REGION_SIZE};

    use super::*;

    struct ShiftEvacuator {
        copies: AtomicUsize,
    }

    impl Evacuator for ShiftEvacuator {
        fn evacuate(&self, from: TaggedRef) -> u64 {
            self.copies.fetch_add(1, Ordering::SeqCst);
            from.address() + REGION_SIZE
        }
    }

    fn collector() -> Arc<Collector> {
        let _ = env_logger::builder().is_test(true).try_init();
        Collector::new(0, 256)
    }

    #[test]
    fn fast_path_is_a_no_op() {
        let mut context = ExecutionContext::new(collector());
        let three = Space::new(3);
        let reference = TaggedRef::new(TypeTag::Constructor, 5, 6, 7, three, false, 11);
        let slot = RefSlot::new(reference);

        let loaded = context.load(&slot);

        assert_eq!(reference, loaded);
        assert_eq!(reference, slot.get());
        assert!(context.local_queue(three).is_empty());
    }

    #[test]
    fn nmt_mismatch_flips_and_enqueues_locally() {
        let mut context = ExecutionContext::new(collector());
        let three = Space::new(3);
        let reference = TaggedRef::new(TypeTag::Constructor, 5, 6, 7, three, false, 11);
        let slot = RefSlot::new(reference);

        // New cycle for space 3: every reference with the old bit is white
        context.flip_expected_nmt(three);
        let loaded = context.load(&slot);

        assert!(loaded.nmt());
        assert_eq!(reference.address(), loaded.address());
        assert_eq!(loaded, slot.get());
        let queued = context.drain_local(three);
        assert_eq!(vec![loaded], queued);

        // Re-loading is a no-op: the reference now matches expectations
        let again = context.load(&slot);
        assert_eq!(loaded, again);
        assert!(context.local_queue(three).is_empty());
    }

    #[test]
    fn global_spaces_enqueue_to_the_shared_queue() {
        let mut context = ExecutionContext::new(collector());
        let nine = Space::new(9);
        let reference = TaggedRef::new(TypeTag::Constructor, 1, 2, 3, nine, false, 4);
        let slot = RefSlot::new(reference);

        context.flip_expected_nmt(nine);
        let loaded = context.load(&slot);

        assert!(loaded.nmt());
        let queue = context.collector().global_queue(nine);
        assert_eq!(Some(loaded), queue.pop());
        assert_eq!(None, queue.pop());
    }

    #[test]
    fn escaped_unique_constructor_is_contracted_before_enqueue() {
        let mut context = ExecutionContext::new(collector());
        let nine = Space::new(9);
        let reference = TaggedRef::new(TypeTag::UniqueConstructor, 1, 2, 3, nine, false, 4);
        let slot = RefSlot::new(reference);

        context.flip_expected_nmt(nine);
        let loaded = context.load(&slot);

        assert_eq!(TypeTag::Constructor, loaded.type_tag());
        assert_eq!(loaded, slot.get());
        let queued = context.collector().global_queue(nine).pop().unwrap();
        assert_eq!(TypeTag::Constructor, queued.type_tag());
    }

    #[test]
    fn protected_region_forwards_the_reference() {
        let collector = collector();
        let mut context = ExecutionContext::new(Arc::clone(&collector));
        let nine = Space::new(9);
        let reference = TaggedRef::new(TypeTag::Constructor, 12, 34, 42, nine, false, 7);
        let slot = RefSlot::new(reference);

        let evacuator = Arc::new(ShiftEvacuator {
            copies: AtomicUsize::new(0),
        });
        collector.begin_relocation(42, evacuator.clone());

        let loaded = context.load(&slot);

        assert_eq!(reference.address() + REGION_SIZE, loaded.address());
        assert_eq!(reference.type_tag(), loaded.type_tag());
        assert_eq!(reference.tag(), loaded.tag());
        assert_eq!(loaded, slot.get());
        assert_eq!(1, evacuator.copies.load(Ordering::SeqCst));

        collector.finish_relocation(42);

        // Post-migration loads resolve to the new address with no further work
        let again = context.load(&slot);
        assert_eq!(loaded, again);
        assert_eq!(1, evacuator.copies.load(Ordering::SeqCst));
    }

    #[test]
    fn marks_at_most_once_per_flip_under_contention() {
        const THREADS: usize = 8;

        let collector = collector();
        let nine = Space::new(9);
        let reference = TaggedRef::new(TypeTag::Constructor, 1, 1, 1, nine, false, 42);
        let slot = Arc::new(RefSlot::new(reference));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let collector = Arc::clone(&collector);
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let mut context = ExecutionContext::new(collector);
                    context.flip_expected_nmt(nine);
                    context.load(&slot)
                })
            })
            .collect();

        let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Everyone converged on the marked reference
        for result in &loaded {
            assert!(result.nmt());
            assert_eq!(reference.address(), result.address());
        }
        // Exactly one mark was recorded between the flips
        assert_eq!(1, collector.global_queue(nine).len());
    }
}
