#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

//! Tagrun is a runtime for a dynamic, deterministic dataflow programming
//! model. A program is a graph of three kinds of collections: *step
//! collections* (pure computation kernels), *item collections* (write-once,
//! read-many associative stores) and *tag collections* (sets of control
//! tags that prescribe step executions). Putting a tag creates one step
//! instance per wired step collection; step bodies read and write items and
//! may put further tags, and the runtime executes everything prescribed in
//! any order consistent with data availability, on a work-stealing thread
//! pool.
//!
//! A step that reads an item which has not been put yet suspends: the
//! [`ItemCollection::get`] call returns [`NotReady`], the body propagates it
//! with `?`, and the scheduler replays the step once the item arrives.
//! [`Context::wait`] blocks until the graph has quiesced.
//!
//! ```
//! use tagrun::{Context, Outcome, StepResult};
//!
//! let ctx = Context::new();
//! let fib = ctx.item_collection::<u32, u64>("fib");
//! let tags = ctx.tag_collection::<u32>("tags");
//! let steps = ctx.step_collection("fib_step", {
//!     let fib = fib.clone();
//!     move |tag: &u32| -> StepResult {
//!         if *tag < 2 {
//!             fib.put(*tag, u64::from(*tag));
//!         } else {
//!             let a = fib.get(&(tag - 1))?;
//!             let b = fib.get(&(tag - 2))?;
//!             fib.put(*tag, a + b);
//!         }
//!         Ok(Outcome::Success)
//!     }
//! });
//! tags.prescribes(&steps);
//! for t in 0..=20 {
//!     tags.put(t);
//! }
//! ctx.wait();
//! assert_eq!(fib.get(&20).unwrap(), 6765);
//! ```

mod cancel;
mod context;
mod get_list;
mod item;
mod range;
mod runtime;
mod schedulable;
mod step;
mod tag;
mod tuner;

pub use crate::cancel::CancelTuner;
pub use crate::context::Context;
pub use crate::item::{DenseKey, ItemCollection};
pub use crate::range::{Bisection, Partitioner, RangeIndex, RangeIter, StridedRange};
pub use crate::step::StepCollection;
pub use crate::tag::TagCollection;
pub use crate::tuner::{
    DefaultItemTuner, DefaultStepTuner, DependencyScope, GetCount, ItemTuner, StepTuner,
};

use std::fmt::{self, Debug};
use std::hash::Hash;

/// Keys of item collections: cloneable, hashable, printable, shareable.
/// Implemented automatically for every qualifying type.
pub trait Key: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> Key for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Tags of tag collections: keys with a total order, which sequentialized
/// execution relies on. Implemented automatically for every qualifying type.
pub trait Tag: Key + Ord {}

impl<T> Tag for T where T: Key + Ord {}

/// Values of item collections. Items are returned by clone so that no
/// borrow can outlive a get-count-driven release; values are typically
/// cheap to clone or wrapped in `Arc`.
pub trait Value: Clone + Send + Sync + 'static {}

impl<V> Value for V where V: Clone + Send + Sync + 'static {}

/// The transient control signal raised by [`ItemCollection::get`] when the
/// requested item has not been put yet.
///
/// Step bodies propagate it with `?`; the scheduler consumes it, parks the
/// step in the item's suspend group and replays it later. It never carries
/// information and is never surfaced to the environment as an error.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct NotReady;

impl Debug for NotReady {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "NotReady")
    }
}

impl fmt::Display for NotReady {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "item not ready")
    }
}

/// What a completed step body reports back to the scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The step is done; its recorded gets are committed.
    Success,
    /// The step wants to be re-executed under the one-at-a-time, tag-ordered
    /// regime of its collection.
    NeedsSequentialize,
}

/// The two-layer result of a step body: the outer layer is the suspension
/// signal consumed by the scheduler, the inner layer the step's own report.
pub type StepResult = Result<Outcome, NotReady>;

/// A step body: a pure function of the prescribing tag.
///
/// Bodies hold clones of the collection handles they read and write.
/// Closures of the right shape implement this trait, as does any hand-rolled
/// struct. Bodies must be deterministic (a suspended step re-executes from
/// the top) and should issue puts only after all gets succeeded; re-putting
/// a key the same instance already put is tolerated on replay, anything else
/// is a single-assignment violation.
pub trait Step<T>: Send + Sync + 'static {
    /// Execute the step for `tag`.
    fn execute(&self, tag: &T) -> StepResult;
}

impl<T, F> Step<T> for F
where
    F: Fn(&T) -> StepResult + Send + Sync + 'static,
{
    fn execute(&self, tag: &T) -> StepResult {
        self(tag)
    }
}

/// Commit the calling step's get-list so far: if any polled get
/// ([`ItemCollection::unsafe_get`]) missed since the last flush, returns
/// [`NotReady`] for the body to propagate with `?`; the step replays once
/// the missing items arrive. Outside a step this is a no-op.
///
/// Equivalent to [`Context::flush_gets`], but callable from inside a step
/// body, which holds collection handles rather than the context itself.
pub fn flush_gets() -> Result<(), NotReady> {
    if let Some(step) = runtime::current_step() {
        if let Some(logs) = step.logs() {
            if logs.gets.lock().has_misses() {
                return Err(NotReady);
            }
        }
    }
    Ok(())
}
