//! The object life cycle of lazy values.
//!
//! A thread-private thunk starts life as a `UniqueClosure`. Forcing it
//! blackholes the cell, evaluation runs, and updating rewrites the cell
//! with the computed result: update-in-place memoization. Sharing a
//! unique object demotes it (contraction): a `UniqueConstructor` merely
//! loses its uniqueness bit, while a `UniqueClosure` (or a blackhole under
//! evaluation) is stuffed into a freshly allocated indirection cell, since
//! concurrent readers must never race the evaluator on the original word.
//!
//! All transitions here are single compare-and-swaps on the cell; the
//! write-once step from blackhole to the evaluated result is what makes
//! concurrent forcing safe. The policy for a thread that observes someone
//! else's blackhole (block, retry, reschedule) belongs to the scheduler;
//! this module only reports the condition.
use log::trace;
use thiserror::Error;

use crate::barrier::RefSlot;
use crate::term::{TaggedRef, TypeTag};

/// A thunk was forced while already under evaluation.
///
/// When the forcing thread is the one that blackholed the cell, this is a
/// genuine cyclic dependency (`<<loop>>`). When it is another thread, the
/// scheduler may instead choose to block or retry; the core cannot tell
/// the two apart and surfaces both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cyclic force: thunk is already being evaluated")]
pub struct CyclicForce;

/// Heap services the update protocol needs from the (external) allocator.
pub trait IndirectionHeap {
    /// Allocates a fresh indirection cell holding `target` and returns an
    /// `Indirection`-typed reference to it.
    fn alloc_indirection(&mut self, target: TaggedRef) -> TaggedRef;

    /// The cell an indirection reference points at.
    fn resolve(&self, indirection: TaggedRef) -> &RefSlot;
}

/// The outcome of [`force`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Force {
    /// The cell already holds a value; no evaluation is needed.
    Value(TaggedRef),
    /// The caller won the blackhole race: it must evaluate the returned
    /// closure and then call [`update`] on the same cell.
    Enter(TaggedRef),
    /// The cell is an indirection; the caller should chase it and force
    /// the target cell instead.
    Follow(TaggedRef),
}

/// The outcome of [`update`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The blackhole was overwritten with the result in place.
    InPlace(TaggedRef),
    /// The cell was contracted while evaluation ran; the result was written
    /// through the indirection the contraction installed.
    Indirected(TaggedRef),
}

/// Begins forcing the thunk held in `cell`.
///
/// Winning the race atomically rewrites the cell as a blackhole, so any
/// other forcer observes either the blackhole (and gets [`CyclicForce`])
/// or, later, the completed result. Exactly one evaluation can win.
pub fn force(cell: &RefSlot) -> Result<Force, CyclicForce> {
    loop {
        let value = cell.get();
        match value.type_tag() {
            TypeTag::Blackhole => return Err(CyclicForce),
            TypeTag::Indirection => return Ok(Force::Follow(value)),
            TypeTag::UniqueClosure => {
                let hole = value.with_type(TypeTag::Blackhole);
                if cell.publish(value, hole) {
                    trace!(target: "eval", "blackholed {:?}", value);
                    return Ok(Force::Enter(value));
                }
                // Lost the race; re-read and reclassify
            }
            TypeTag::Constructor | TypeTag::UniqueConstructor => {
                return Ok(Force::Value(value));
            }
        }
    }
}

/// Completes an evaluation begun by [`force`], memoizing `result` into the
/// cell.
///
/// The common case is a single write-once compare-and-swap from the
/// blackhole to the result. If the cell was contracted while evaluation
/// ran, the blackhole is no longer in place; the result is then written
/// through the indirection cell the contraction allocated, never in place,
/// so concurrent readers of the shared view cannot observe a torn update.
pub fn update<H>(cell: &RefSlot, result: TaggedRef, heap: &H) -> UpdateOutcome
where
    H: IndirectionHeap,
{
    loop {
        let current = cell.get();
        match current.type_tag() {
            TypeTag::Blackhole => {
                if cell.publish(current, result) {
                    trace!(target: "eval", "updated {:?} in place with {:?}", current, result);
                    return UpdateOutcome::InPlace(result);
                }
            }
            TypeTag::Indirection => {
                let target = heap.resolve(current);
                let mut inner = target.get();
                loop {
                    debug_assert_eq!(
                        TypeTag::Blackhole,
                        inner.type_tag(),
                        "contracted cell does not hold our evaluation"
                    );
                    if target.publish(inner, result) {
                        break;
                    }
                    // A reader's barrier may rewrite the blackhole word
                    // under us (nmt flip, forwarded address). Unlike the
                    // barrier's own correction, our write is not equivalent
                    // to the winner's, so a lost race must be retried or
                    // the result is gone.
                    inner = target.get();
                }
                trace!(target: "eval", "updated {:?} through indirection {:?}", inner, current);
                return UpdateOutcome::Indirected(current);
            }
            other => {
                panic!("update of a cell that is not under evaluation: {:?}", other)
            }
        }
    }
}

/// Publishes a thread-private cell, demoting whatever unique object it
/// holds. Contraction is monotonic: once the uniqueness marker is cleared
/// it is never observed set again for that object.
///
/// A `UniqueConstructor` is demoted with a bit clear. A `UniqueClosure`,
/// or a blackhole for an evaluation in flight, is wrapped in a freshly
/// allocated indirection cell; the shared world sees only the indirection,
/// and the evaluator finds it there when it comes back to update.
pub fn escape<H>(cell: &RefSlot, heap: &mut H) -> TaggedRef
where
    H: IndirectionHeap,
{
    loop {
        let value = cell.get();
        match value.type_tag() {
            TypeTag::UniqueConstructor => {
                let shared = value.contract();
                if cell.publish(value, shared) {
                    return shared;
                }
            }
            TypeTag::UniqueClosure | TypeTag::Blackhole => {
                let indirection = heap.alloc_indirection(value);
                debug_assert_eq!(TypeTag::Indirection, indirection.type_tag());
                if cell.publish(value, indirection) {
                    trace!(target: "eval", "contracted {:?} behind {:?}", value, indirection);
                    return indirection;
                }
            }
            _ => return value,
        }
    }
}
