//! Process-wide collector state.
//!
//! A single [`Collector`] instance owns everything the barrier and the
//! external collector workers share: the region table, the global mark
//! queues, the records of in-progress relocations, and the registry of
//! live execution contexts. One coarse lock guards the rare mutating
//! operations (context registration, region protection flips); the barrier
//! fast path never takes it.
mod queue;
mod regions;
mod relocate;

pub use self::queue::{GlobalMarkQueue, LocalMarkQueue};
pub use self::regions::RegionTable;
pub use self::relocate::{Evacuator, Relocation};

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use log::trace;
use parking_lot::Mutex;

use crate::context::{ContextId, ContextShared};
use crate::term::{Space, TaggedRef, GLOBAL_SPACES};

pub struct Collector {
    regions: RegionTable,
    global_queues: [GlobalMarkQueue; GLOBAL_SPACES],
    /// Active relocations by region. Lock-free to read from the barrier
    /// slow path; insertion/removal happens under `lock`.
    relocations: dashmap::DashMap<u32, Arc<Relocation>>,
    /// Guards the registry and region protection flips.
    lock: Mutex<HashMap<ContextId, Weak<ContextShared>>>,
}

impl Collector {
    /// Creates a collector managing regions in `[regions_begin, regions_end)`.
    pub fn new(regions_begin: u32, regions_end: u32) -> Arc<Self> {
        Arc::new(Self {
            regions: RegionTable::new(regions_begin, regions_end),
            global_queues: std::array::from_fn(|_| GlobalMarkQueue::new()),
            relocations: dashmap::DashMap::new(),
            lock: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// The shared mark queue for a global space.
    #[inline]
    pub fn global_queue(&self, space: Space) -> &GlobalMarkQueue {
        &self.global_queues[space.global_index()]
    }

    /// Marks `region` protected and installs the relocation record the
    /// barrier will cooperate with. Called by the evacuation executor
    /// before it migrates any object out of the region.
    ///
    /// The record is installed before the protection bit is raised, so any
    /// barrier that observes the bit finds the record.
    pub fn begin_relocation(&self, region: u32, evacuator: Arc<dyn Evacuator>) -> Arc<Relocation> {
        let guard = self.lock.lock();
        let relocation = Arc::new(Relocation::new(region, evacuator));
        let previous = self.relocations.insert(region, Arc::clone(&relocation));
        assert!(
            previous.is_none(),
            "region {} is already under relocation",
            region
        );
        self.regions.protect(region);
        drop(guard);
        trace!(target: "gc", "region {} is now protected", region);
        relocation
    }

    /// Clears the protection bit and retires the relocation record, once
    /// the executor has finished migrating the region.
    pub fn finish_relocation(&self, region: u32) {
        let guard = self.lock.lock();
        self.regions.unprotect(region);
        let removed = self.relocations.remove(&region);
        assert!(
            removed.is_some(),
            "region {} has no relocation in progress",
            region
        );
        drop(guard);
        trace!(target: "gc", "region {} migration complete, protection cleared", region);
    }

    /// Cooperates with the in-progress relocation of `reference`'s region,
    /// returning the forwarded reference.
    ///
    /// Returns `None` when the region has no relocation record, which means
    /// the protection bit the caller observed was stale and there is
    /// nothing left to cooperate with.
    pub(crate) fn cooperate(&self, reference: TaggedRef) -> Option<TaggedRef> {
        let relocation = self.relocations.get(&reference.region())?;
        Some(relocation.forward(reference))
    }

    /// Adds a context to the registry. Contexts register themselves on
    /// creation; the collector's workers enumerate them via [`contexts`].
    ///
    /// [`contexts`]: Self::contexts
    pub(crate) fn register(&self, shared: &Arc<ContextShared>) {
        let mut registry = self.lock.lock();
        let previous = registry.insert(shared.id(), Arc::downgrade(shared));
        assert!(previous.is_none(), "context {:?} registered twice", shared.id());
        trace!(target: "gc", "registered execution context {:?}", shared.id());
    }

    /// Removes a context from the registry. Runs on every context exit
    /// path via `ExecutionContext::drop`.
    pub(crate) fn unregister(&self, id: ContextId) {
        let mut registry = self.lock.lock();
        registry
            .remove(&id)
            .expect("execution context was not registered");
        trace!(target: "gc", "unregistered execution context {:?}", id);
    }

    /// Snapshots the live execution contexts, for collector workers that
    /// need to inspect per-context expectations.
    pub fn contexts(&self) -> Vec<Arc<ContextShared>> {
        let registry = self.lock.lock();
        registry.values().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::term::{TypeTag, REGION_SIZE};

    use super::*;

    struct NopEvacuator(AtomicUsize);

    impl Evacuator for NopEvacuator {
        fn evacuate(&self, from: TaggedRef) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst);
            from.address() + REGION_SIZE
        }
    }

    #[test]
    fn relocation_lifecycle() {
        let collector = Collector::new(0, 256);
        let evacuator = Arc::new(NopEvacuator(AtomicUsize::new(0)));

        assert!(!collector.regions().is_protected(42));
        collector.begin_relocation(42, evacuator.clone());
        assert!(collector.regions().is_protected(42));

        let reference = TaggedRef::new(TypeTag::Constructor, 1, 2, 42, Space::new(9), false, 3);
        let forwarded = collector.cooperate(reference).unwrap();
        assert_eq!(reference.address() + REGION_SIZE, forwarded.address());

        collector.finish_relocation(42);
        assert!(!collector.regions().is_protected(42));
        // Stale trigger after completion finds nothing to cooperate with
        assert_eq!(None, collector.cooperate(reference));
    }

    #[test]
    #[should_panic(expected = "already under relocation")]
    fn double_begin_is_fatal() {
        let collector = Collector::new(0, 256);
        let evacuator = Arc::new(NopEvacuator(AtomicUsize::new(0)));
        collector.begin_relocation(7, evacuator.clone());
        collector.begin_relocation(7, evacuator);
    }

    #[test]
    fn global_queues_are_per_space() {
        let collector = Collector::new(0, 16);
        let reference = TaggedRef::new(TypeTag::Constructor, 1, 1, 1, Space::new(10), true, 0);
        collector.global_queue(Space::new(10)).push(reference);
        assert_eq!(1, collector.global_queue(Space::new(10)).len());
        assert!(collector.global_queue(Space::new(8)).is_empty());
        assert!(collector.global_queue(Space::new(15)).is_empty());
    }
}
