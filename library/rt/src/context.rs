use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use crate::gc::{Collector, LocalMarkQueue};
use crate::term::{Space, LOCAL_SPACES};

/// Uniquely identifies a registered execution context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The part of a context the collector is allowed to observe from other
/// threads: its identity and its expected-NMT vector, one bit per space.
pub struct ContextShared {
    id: ContextId,
    expected_nmt: AtomicU16,
}

impl ContextShared {
    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The expected nmt bit for `space`. A reference whose nmt bit differs
    /// is conservatively unmarked relative to this context's current cycle.
    #[inline]
    pub fn expected_nmt(&self, space: Space) -> bool {
        self.expected_nmt.load(Ordering::Relaxed) & (1 << space.raw()) != 0
    }

    /// Flips the expected nmt bit for `space`, starting a new marking cycle
    /// for that space from this context's point of view. There is no global
    /// synchronous flip; each context advances independently.
    #[inline]
    pub fn flip_expected_nmt(&self, space: Space) {
        self.expected_nmt.fetch_xor(1 << space.raw(), Ordering::Relaxed);
    }
}

/// Per-mutator-thread runtime state: the thread's handle into the collector.
///
/// A context owns one mark queue per local space and the expected-NMT
/// vector the load barrier checks references against. It registers itself
/// with the collector on creation and deregisters on drop, so registry
/// membership is released on every exit path, normal return or thread
/// termination.
///
/// Exactly one live context exists per mutator thread, and a thread is
/// bound to its context for the context's whole lifetime. Collector tracer
/// threads that inspect heap objects use a context of their own; the
/// barrier contract is the same for them.
pub struct ExecutionContext {
    shared: Arc<ContextShared>,
    collector: Arc<Collector>,
    local_queues: [LocalMarkQueue; LOCAL_SPACES],
}

impl ExecutionContext {
    pub fn new(collector: Arc<Collector>) -> Self {
        let shared = Arc::new(ContextShared {
            id: ContextId::next(),
            expected_nmt: AtomicU16::new(0),
        });
        collector.register(&shared);
        Self {
            shared,
            collector,
            local_queues: Default::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    #[inline]
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    #[inline]
    pub fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    #[inline]
    pub fn expected_nmt(&self, space: Space) -> bool {
        self.shared.expected_nmt(space)
    }

    #[inline]
    pub fn flip_expected_nmt(&self, space: Space) {
        self.shared.flip_expected_nmt(space)
    }

    /// The mark queue for one of this context's local spaces.
    #[inline]
    pub fn local_queue(&mut self, space: Space) -> &mut LocalMarkQueue {
        &mut self.local_queues[space.local_index()]
    }

    /// Drains the pending mark queue for a local space, for the owning
    /// thread's trace work. Local queues have no cross-thread consumers.
    pub fn drain_local(&mut self, space: Space) -> Vec<crate::term::TaggedRef> {
        self.local_queues[space.local_index()].drain().collect()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.collector.unregister(self.shared.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_follows_context_lifetime() {
        let collector = Collector::new(0, 16);
        assert_eq!(0, collector.contexts().len());
        {
            let first = ExecutionContext::new(Arc::clone(&collector));
            let second = ExecutionContext::new(Arc::clone(&collector));
            assert_ne!(first.id(), second.id());
            assert_eq!(2, collector.contexts().len());
        }
        // Dropping a context releases its registry membership
        assert_eq!(0, collector.contexts().len());
    }

    #[test]
    fn expected_nmt_flips_per_space() {
        let collector = Collector::new(0, 16);
        let context = ExecutionContext::new(collector);
        let three = Space::new(3);
        let nine = Space::new(9);

        assert!(!context.expected_nmt(three));
        context.flip_expected_nmt(three);
        assert!(context.expected_nmt(three));
        // Other spaces are unaffected
        assert!(!context.expected_nmt(nine));
        context.flip_expected_nmt(three);
        assert!(!context.expected_nmt(three));
    }
}
