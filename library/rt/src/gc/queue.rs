use std::collections::VecDeque;

use crossbeam::queue::SegQueue;

use crate::term::TaggedRef;

/// A mark queue for one thread-local space.
///
/// Only the owning context's barrier ever pushes here, and only the owning
/// thread drains it when it runs trace work, so no synchronization is
/// needed. References in the queue have already had their nmt bit flipped;
/// they are live and awaiting trace.
#[derive(Default)]
pub struct LocalMarkQueue {
    pending: VecDeque<TaggedRef>,
}

impl LocalMarkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, reference: TaggedRef) {
        self.pending.push_back(reference);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<TaggedRef> {
        self.pending.pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = TaggedRef> + '_ {
        self.pending.drain(..)
    }
}

/// A mark queue for one shared space.
///
/// Any mutator's barrier may push concurrently, and tracer workers pop
/// concurrently; the queue is lock-free in both directions. Order is
/// unspecified, which is fine: a mark queue is a multiset, not a schedule.
pub struct GlobalMarkQueue {
    pending: SegQueue<TaggedRef>,
}

impl GlobalMarkQueue {
    pub fn new() -> Self {
        Self {
            pending: SegQueue::new(),
        }
    }

    #[inline]
    pub fn push(&self, reference: TaggedRef) {
        self.pending.push(reference);
    }

    #[inline]
    pub fn pop(&self) -> Option<TaggedRef> {
        self.pending.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for GlobalMarkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use crate::term::{Space, TaggedRef, TypeTag};

    use super::*;

    fn reference(tag: u32) -> TaggedRef {
        TaggedRef::new(TypeTag::Constructor, 1, 1, 1, Space::new(3), false, tag)
    }

    #[test]
    fn local_queue_is_fifo_for_its_owner() {
        let mut queue = LocalMarkQueue::new();
        assert!(queue.is_empty());
        queue.push(reference(1));
        queue.push(reference(2));
        assert_eq!(2, queue.len());
        assert_eq!(Some(1), queue.pop().map(|r| r.tag()));
        assert_eq!(Some(2), queue.pop().map(|r| r.tag()));
        assert_eq!(None, queue.pop());
    }

    #[test]
    fn global_queue_supports_concurrent_producers() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let queue = Arc::new(GlobalMarkQueue::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.push(reference((t * PER_THREAD + i) as u32));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut popped = 0;
        while queue.pop().is_some() {
            popped += 1;
        }
        assert_eq!(THREADS * PER_THREAD, popped);
    }
}
