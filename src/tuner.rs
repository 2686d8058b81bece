//! Tuner hooks: per-collection knobs that shape how the runtime treats
//! individual tags and items without touching the step bodies themselves.

use crate::item::ItemCollection;
use crate::runtime::Job;
use crate::{Key, Value};

/// How many times an item will be read before it may be released.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GetCount {
    /// The item lives until the context is destroyed or reset.
    Unlimited,
    /// The item is destroyed once it has been read this many times by
    /// committed steps.
    Limited(u32),
}

/// Per-item-collection knobs.
pub trait ItemTuner<K>: Send + Sync + 'static {
    /// The number of reads after which the item keyed `key` may be
    /// released. Consulted once, when the item is put.
    fn get_count(&self, _key: &K) -> GetCount {
        GetCount::Unlimited
    }
}

/// The tuner item collections use when none is given: every item lives
/// until the context goes away.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultItemTuner;

impl<K> ItemTuner<K> for DefaultItemTuner {}

/// Records the dependencies a tuner pre-declares for a step instance before
/// its first dispatch. Items that are already present are left alone; absent
/// ones register the instance in their suspend groups so the first execution
/// attempt is not wasted on a replay.
pub struct DependencyScope<'a> {
    step: &'a Job,
    missing: usize,
}

impl<'a> DependencyScope<'a> {
    pub(crate) fn new(step: &'a Job) -> Self {
        DependencyScope { step, missing: 0 }
    }

    /// Declare that the step will read `key` from `items`.
    pub fn depends_on<K, V, Tun>(&mut self, items: &ItemCollection<K, V, Tun>, key: &K)
    where
        K: Key,
        V: Value,
        Tun: ItemTuner<K>,
    {
        if !items.probe_or_delay(key, self.step) {
            self.missing += 1;
        }
    }

    pub(crate) fn missing(&self) -> usize {
        self.missing
    }
}

/// Per-step-collection knobs.
///
/// All hooks have neutral defaults; a tuner overrides only what it cares
/// about. `is_canceled` is checked at dispatch time and again when a
/// suspended instance resumes; running bodies are never preempted.
pub trait StepTuner<T>: Send + Sync + 'static {
    /// Scheduling priority for the instance prescribed by `tag`. Non-zero
    /// priorities route through a global priority queue consulted before the
    /// regular deques; higher runs earlier.
    fn priority(&self, _tag: &T) -> i32 {
        0
    }

    /// Steps whose tags answer true execute one at a time, lowest
    /// outstanding tag first.
    fn sequentialize(&self, _tag: &T) -> bool {
        false
    }

    /// Whether the instance prescribed by `tag` should be skipped.
    fn is_canceled(&self, _tag: &T) -> bool {
        false
    }

    /// Pre-declare the items the step for `tag` will read.
    fn depends(&self, _tag: &T, _scope: &mut DependencyScope<'_>) {}
}

/// The tuner step collections use when none is given: no priorities, no
/// sequentialization, no cancellation, no pre-declared dependencies.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultStepTuner;

impl<T> StepTuner<T> for DefaultStepTuner {}
