//! The concurrent memory core of the Thistle runtime.
//!
//! Mutator threads read and write heap references while a tracing,
//! relocating collector runs alongside them; no phase ever stops all
//! mutators at once. The pieces fit together like this:
//!
//! * [`term::TaggedRef`] is the unit everything else manipulates: one word
//!   that is both a machine address and a collector record.
//! * Every dereference goes through the load barrier
//!   ([`context::ExecutionContext::load`]), which in the common case is a
//!   single compare against the current thread's expectations and, on
//!   mismatch, silently performs collector work (mark cooperation,
//!   relocation cooperation) before the load proceeds.
//! * [`gc::Collector`] owns the process-wide bookkeeping: which regions are
//!   under relocation, the shared mark queues, and the registry of live
//!   execution contexts.
//! * [`thunk`] implements the update-in-place life cycle of lazy values:
//!   closure, blackhole while under evaluation, indirection once evaluated,
//!   and the contraction of thread-unique objects that escape.
//!
//! The heap allocator, the tracer workers that drain the mark queues, and
//! the evacuation executor that copies object bytes live elsewhere; this
//! crate defines only the contracts they plug into.

pub mod barrier;
pub mod context;
pub mod gc;
pub mod thunk;

pub use thistle_term as term;
