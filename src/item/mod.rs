//! Item collections: write-once, read-many associative stores with per-item
//! suspend groups and get-count driven release.

pub(crate) mod properties;
pub(crate) mod table;

use crate::context::Collection;
use crate::get_list::GetEntry;
use crate::item::properties::NO_GET_COUNT;
use crate::item::table::{ItemSlot, SlotState, Table};
use crate::runtime::{self, Job, Scheduler};
use crate::tuner::{GetCount, ItemTuner};
use crate::{Key, NotReady, Value};
use log::debug;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use crate::item::table::DenseKey;

pub(crate) struct ItemStore<K, V, Tun> {
    name: String,
    id: u32,
    sched: Arc<Scheduler>,
    tuner: Tun,
    table: Table<K, V>,
    occupied: AtomicUsize,
}

/// A write-once, read-many associative store of items.
///
/// Handles are cheap clones sharing one store; step bodies capture the
/// handles they read and write. Inside a step, [`get`](ItemCollection::get)
/// on an absent key suspends the step until the item is put; outside a step
/// it simply reports absence.
pub struct ItemCollection<K, V, Tun = crate::tuner::DefaultItemTuner> {
    inner: Arc<ItemStore<K, V, Tun>>,
}

impl<K, V, Tun> Clone for ItemCollection<K, V, Tun> {
    fn clone(&self) -> Self {
        ItemCollection {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, Tun> fmt::Debug for ItemCollection<K, V, Tun> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "ItemCollection({})", self.inner.name)
    }
}

impl<K, V, Tun> ItemCollection<K, V, Tun> {
    pub(crate) fn collection_name(&self) -> &str {
        &self.inner.name
    }
}

struct GetRecord<K, V, Tun> {
    store: Arc<ItemStore<K, V, Tun>>,
    key: K,
}

impl<K, V, Tun> GetEntry for GetRecord<K, V, Tun>
where
    K: Key,
    V: Value,
    Tun: ItemTuner<K>,
{
    fn decrement(&self) {
        self.store.decrement_ref_count(&self.key);
    }
}

impl<K, V, Tun> ItemCollection<K, V, Tun>
where
    K: Key,
    V: Value,
    Tun: ItemTuner<K>,
{
    pub(crate) fn new(
        name: &str,
        id: u32,
        sched: Arc<Scheduler>,
        tuner: Tun,
        table: Table<K, V>,
    ) -> Self {
        ItemCollection {
            inner: Arc::new(ItemStore {
                name: name.to_string(),
                id,
                sched,
                tuner,
                table,
                occupied: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn store(&self) -> &Arc<ItemStore<K, V, Tun>> {
        &self.inner
    }

    /// Single-assignment insert. Wakes every step suspended on `key` and
    /// installs the tuner's get-count for it.
    ///
    /// A second put of the same key is fatal, with one exception: a replayed
    /// step re-issuing a put it already performed before suspending (those
    /// puts are final, and the replay is expected to repeat them).
    pub fn put(&self, key: K, value: V) {
        let inner = &self.inner;
        let slot = inner.table.slot(&key);
        let mut state = slot.state.lock();
        match &mut *state {
            SlotState::Occupied { .. } | SlotState::Released => {
                drop(state);
                if let Some(step) = runtime::current_step() {
                    if let Some(logs) = step.logs() {
                        if logs.puts.lock().contains(inner.id, &key) {
                            debug!("{}: replayed put of {:?} ignored", inner.name, key);
                            return;
                        }
                    }
                }
                panic!(
                    "{}: single-assignment violation, key {:?} was already put",
                    inner.name, key
                );
            }
            SlotState::Vacant { waiting } => {
                let woken = mem::take(waiting);
                *state = SlotState::Occupied { value };
                let count = match inner.tuner.get_count(&key) {
                    GetCount::Unlimited => {
                        slot.props.set(NO_GET_COUNT);
                        NO_GET_COUNT
                    }
                    GetCount::Limited(n) => {
                        use std::convert::TryFrom;
                        let n = i32::try_from(n).expect("get-count out of range");
                        slot.props.set_or_increment(n)
                    }
                };
                drop(state);
                inner.occupied.fetch_add(1, Ordering::SeqCst);
                if !woken.is_empty() {
                    debug!(
                        "{}: put {:?} wakes {} steps",
                        inner.name,
                        key,
                        woken.len()
                    );
                }
                if let Some(step) = runtime::current_step() {
                    if let Some(logs) = step.logs() {
                        logs.puts.lock().record(inner.id, key.clone());
                    }
                }
                for step in woken {
                    inner.sched.resume(step);
                }
                if count == 0 {
                    // A declared count of zero: nothing will ever read it.
                    inner.release_slot(&slot, &key);
                }
            }
        }
    }

    /// Read the item for `key`.
    ///
    /// Inside a step, an absent key registers the step in the key's suspend
    /// group and returns [`NotReady`], which the body propagates with `?`;
    /// the scheduler replays the step when the item arrives. Outside a step
    /// there is nothing to suspend and absence is reported directly.
    pub fn get(&self, key: &K) -> Result<V, NotReady> {
        let inner = &self.inner;
        let step = runtime::current_step();
        let slot = match &step {
            Some(_) => inner.table.slot(key),
            None => match inner.table.existing(key) {
                Some(slot) => slot,
                None => return Err(NotReady),
            },
        };
        let mut state = slot.state.lock();
        match &mut *state {
            SlotState::Occupied { value } => {
                let value = value.clone();
                drop(state);
                if let Some(step) = &step {
                    self.record_get(&slot, key, step);
                }
                Ok(value)
            }
            SlotState::Vacant { waiting } => {
                if let Some(step) = step {
                    waiting.push(step.clone());
                    step.state().register();
                    drop(state);
                    debug!(
                        "{}: {} suspends on key {:?}",
                        inner.name,
                        step.describe(),
                        key
                    );
                }
                Err(NotReady)
            }
            SlotState::Released => panic!(
                "{}: get of released item {:?} (its get-count was exhausted)",
                inner.name, key
            ),
        }
    }

    /// Polling read: reports absence instead of unwinding.
    ///
    /// A miss from inside a step still registers the step for a wake-up and
    /// is remembered; [`Context::flush_gets`](crate::Context::flush_gets)
    /// surfaces pending misses, and an attempt that completes with unflushed
    /// misses is replayed once the items arrive.
    pub fn unsafe_get(&self, key: &K) -> Option<V> {
        let inner = &self.inner;
        let step = runtime::current_step();
        let slot = match &step {
            Some(_) => inner.table.slot(key),
            None => inner.table.existing(key)?,
        };
        let mut state = slot.state.lock();
        match &mut *state {
            SlotState::Occupied { value } => {
                let value = value.clone();
                drop(state);
                if let Some(step) = &step {
                    self.record_get(&slot, key, step);
                }
                Some(value)
            }
            SlotState::Vacant { waiting } => {
                if let Some(step) = step {
                    waiting.push(step.clone());
                    step.state().register();
                    if let Some(logs) = step.logs() {
                        logs.gets.lock().note_miss();
                    }
                }
                None
            }
            SlotState::Released => None,
        }
    }

    /// Pre-declaration probe: absent keys register `step` for a wake-up
    /// without touching its get-list. Returns whether the item is present.
    pub(crate) fn probe_or_delay(&self, key: &K, step: &Job) -> bool {
        let slot = self.inner.table.slot(key);
        let mut state = slot.state.lock();
        match &mut *state {
            SlotState::Occupied { .. } | SlotState::Released => true,
            SlotState::Vacant { waiting } => {
                waiting.push(step.clone());
                step.state().register();
                false
            }
        }
    }

    fn record_get(&self, slot: &Arc<ItemSlot<V>>, key: &K, step: &Job) {
        if slot.props.get_count() == NO_GET_COUNT {
            return;
        }
        if let Some(logs) = step.logs() {
            logs.gets.lock().record(Box::new(GetRecord {
                store: self.inner.clone(),
                key: key.clone(),
            }));
        }
    }

    /// Reserve capacity for `n` keys; for dense stores this pre-sizes the
    /// slot array so access is O(1).
    pub fn set_max(&self, n: usize) {
        self.inner.table.reserve(n);
    }

    /// Number of items currently present (put and not yet released).
    pub fn size(&self) -> usize {
        self.inner.occupied.load(Ordering::SeqCst)
    }

    /// Whether no item is currently present.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot of the present items.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> {
        self.inner
            .table
            .snapshot()
            .into_iter()
            .filter_map(|(key, slot)| {
                let state = slot.state.lock();
                match &*state {
                    SlotState::Occupied { value } => Some((key, value.clone())),
                    _ => None,
                }
            })
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<K, V, Tun> ItemStore<K, V, Tun>
where
    K: Key,
    V: Value,
    Tun: ItemTuner<K>,
{
    /// One committed read of `key`. Releases the value when the count hits
    /// zero; decrementing past zero is a contract violation.
    pub(crate) fn decrement_ref_count(&self, key: &K) {
        let slot = self.table.existing(key).unwrap_or_else(|| {
            panic!(
                "{}: get-count decrement for unknown item {:?}",
                self.name, key
            )
        });
        if slot.props.decrement() == 0 {
            self.release_slot(&slot, key);
        }
    }

    fn release_slot(&self, slot: &Arc<ItemSlot<V>>, key: &K) {
        let mut state = slot.state.lock();
        if let SlotState::Occupied { .. } = &*state {
            *state = SlotState::Released;
            drop(state);
            self.occupied.fetch_sub(1, Ordering::SeqCst);
            debug!("{}: released item {:?}", self.name, key);
        }
    }
}

impl<K, V, Tun> Collection for ItemStore<K, V, Tun>
where
    K: Key,
    V: Value,
    Tun: ItemTuner<K>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn unsafe_reset(&self) {
        self.table.clear();
        self.occupied.store(0, Ordering::SeqCst);
    }
}
