//! Tag collections: memoizing sets of control tags, and the prescription
//! wiring that turns a tag put into step instances.

use crate::context::Collection;
use crate::range::{Bisection, Partitioner, RangeIndex, RangeTask, StridedRange};
use crate::runtime::Scheduler;
use crate::step::{StepCollection, StepLauncher};
use crate::tuner::StepTuner;
use crate::{Step, Tag};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;

pub(crate) struct TagStore<T> {
    name: String,
    sched: Arc<Scheduler>,
    /// Memoization table: per tag, the bitmask of prescribed step
    /// collections that already instantiated a step for it. Insertion order
    /// is kept so late wiring replays tags in put order.
    table: Mutex<FxIndexMap<T, u32>>,
    launchers: RwLock<Vec<Arc<dyn StepLauncher<T>>>>,
}

/// A multiset of control tags. Putting a tag prescribes one step instance in
/// every wired step collection; duplicate puts are memoized away, and step
/// collections wired after the fact replay the tags already present.
pub struct TagCollection<T: Tag> {
    inner: Arc<TagStore<T>>,
}

impl<T: Tag> Clone for TagCollection<T> {
    fn clone(&self) -> Self {
        TagCollection {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Tag> fmt::Debug for TagCollection<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "TagCollection({})", self.inner.name)
    }
}

impl<T: Tag> TagCollection<T> {
    pub(crate) fn new(name: &str, sched: Arc<Scheduler>) -> Self {
        TagCollection {
            inner: Arc::new(TagStore {
                name: name.to_string(),
                sched,
                table: Mutex::new(FxIndexMap::default()),
                launchers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn store(&self) -> &Arc<TagStore<T>> {
        &self.inner
    }

    /// Put one tag. Idempotent: only the first put of a tag instantiates
    /// steps in the wired step collections.
    pub fn put(&self, tag: T) {
        let inner = &self.inner;
        let (to_launch, launchers) = {
            let mut table = inner.table.lock();
            let launchers = inner.launchers.read().clone();
            let full = mask_for(launchers.len());
            let bits = table.entry(tag.clone()).or_insert(0);
            let prior = *bits;
            *bits |= full;
            (full & !prior, launchers)
        };
        if to_launch == 0 {
            debug!("{}: tag {:?} memoized, nothing new to prescribe", inner.name, tag);
            return;
        }
        for (index, launcher) in launchers.iter().enumerate() {
            if to_launch & (1 << index) != 0 {
                launcher.clone().launch(&tag);
            }
        }
    }

    /// Split a range into sub-ranges on worker threads and put every element
    /// of the leaves. Observationally equivalent to putting each element
    /// directly, up to scheduling order.
    pub fn put_range(&self, range: StridedRange<T>)
    where
        T: RangeIndex,
    {
        self.put_range_with(range, Bisection::default());
    }

    /// Like [`put_range`](TagCollection::put_range) with an explicit
    /// partitioner deciding when to stop splitting.
    pub fn put_range_with<P>(&self, range: StridedRange<T>, partitioner: P)
    where
        T: RangeIndex,
        P: Partitioner<T>,
    {
        debug!("{}: put_range {:?}", self.inner.name, range);
        let sched = self.inner.sched.clone();
        sched.submit(RangeTask::new(range, Arc::new(partitioner), self.clone()));
    }

    /// Wire `steps` to this tag collection: every tag put here, including
    /// tags put before this call, prescribes one step instance in `steps`.
    pub fn prescribes<S, Tun>(&self, steps: &StepCollection<T, S, Tun>)
    where
        S: Step<T>,
        Tun: StepTuner<T>,
    {
        self.inner.wire(steps.launcher());
    }

    /// Number of distinct tags put so far.
    pub fn size(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Whether no tag has been put.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot of the tags put so far, in put order.
    pub fn iter(&self) -> impl Iterator<Item = T> {
        self.inner
            .table
            .lock()
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<T: Tag> TagStore<T> {
    /// Register a launcher and replay every tag it has not yet seen.
    pub(crate) fn wire(&self, launcher: Arc<dyn StepLauncher<T>>) {
        let mut table = self.table.lock();
        let bit = {
            let mut launchers = self.launchers.write();
            assert!(
                launchers.len() < 32,
                "{}: at most 32 step collections can be prescribed by one tag collection",
                self.name
            );
            let bit = 1u32 << launchers.len();
            launchers.push(launcher.clone());
            bit
        };
        info!("{}: prescribes {}", self.name, launcher.name());
        let mut replay = Vec::new();
        for (tag, bits) in table.iter_mut() {
            if *bits & bit == 0 {
                *bits |= bit;
                replay.push(tag.clone());
            }
        }
        drop(table);
        for tag in replay {
            launcher.clone().launch(&tag);
        }
    }
}

fn mask_for(launchers: usize) -> u32 {
    debug_assert!(launchers <= 32);
    if launchers == 32 {
        u32::MAX
    } else {
        (1u32 << launchers) - 1
    }
}

impl<T: Tag> Collection for TagStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn unsafe_reset(&self) {
        self.table.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingLauncher {
        name: String,
        launched: Mutex<Vec<i32>>,
    }

    impl StepLauncher<i32> for RecordingLauncher {
        fn launch(self: Arc<Self>, tag: &i32) {
            self.launched.lock().push(*tag);
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn recording(name: &str) -> Arc<RecordingLauncher> {
        Arc::new(RecordingLauncher {
            name: name.to_string(),
            launched: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn duplicate_puts_are_memoized() {
        let sched = Scheduler::new(1);
        let tags: TagCollection<i32> = TagCollection::new("tags", sched.clone());
        let launcher = recording("steps");
        tags.store().wire(launcher.clone());
        tags.put(4);
        tags.put(4);
        tags.put(5);
        assert_eq!(*launcher.launched.lock(), vec![4, 5]);
        assert_eq!(tags.size(), 2);
        sched.shutdown();
    }

    #[test]
    fn late_wiring_replays_existing_tags() {
        let sched = Scheduler::new(1);
        let tags: TagCollection<i32> = TagCollection::new("tags", sched.clone());
        let first = recording("first");
        tags.store().wire(first.clone());
        tags.put(1);
        tags.put(2);
        let second = recording("second");
        tags.store().wire(second.clone());
        assert_eq!(*second.launched.lock(), vec![1, 2]);
        // the first launcher saw each tag exactly once
        assert_eq!(*first.launched.lock(), vec![1, 2]);
        tags.put(3);
        assert_eq!(*first.launched.lock(), vec![1, 2, 3]);
        assert_eq!(*second.launched.lock(), vec![1, 2, 3]);
        sched.shutdown();
    }

    #[test]
    fn reset_clears_tags_but_keeps_wiring() {
        let sched = Scheduler::new(1);
        let tags: TagCollection<i32> = TagCollection::new("tags", sched.clone());
        let launcher = recording("steps");
        tags.store().wire(launcher.clone());
        tags.put(1);
        tags.store().unsafe_reset();
        assert_eq!(tags.size(), 0);
        tags.put(1);
        assert_eq!(*launcher.launched.lock(), vec![1, 1]);
        sched.shutdown();
    }
}
