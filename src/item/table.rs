use crate::item::properties::ItemProperties;
use crate::runtime::Job;
use crate::Key;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// One key's slot: the write-once value (or its absence) plus the suspend
/// group of steps waiting for it, guarded by the slot lock; the get-count
/// lives beside it as an atomic.
pub(crate) struct ItemSlot<V> {
    pub(crate) state: Mutex<SlotState<V>>,
    pub(crate) props: ItemProperties,
}

impl<V> ItemSlot<V> {
    pub(crate) fn new() -> Arc<ItemSlot<V>> {
        Arc::new(ItemSlot {
            state: Mutex::new(SlotState::Vacant {
                waiting: SmallVec::new(),
            }),
            props: ItemProperties::new(),
        })
    }
}

/// Invariant: value present implies the suspend group is empty (a put drains
/// it under the slot lock); `Released` means the value was destroyed after
/// its last counted read.
pub(crate) enum SlotState<V> {
    Vacant { waiting: SmallVec<[Job; 2]> },
    Occupied { value: V },
    Released,
}

/// Keys that index a dense, vector-backed store: a bijection with a prefix
/// of the non-negative integers.
pub trait DenseKey: Key {
    /// Position of this key in `[0, n)`.
    fn index(&self) -> usize;
    /// The key at `index`; inverse of [`DenseKey::index`].
    fn from_index(index: usize) -> Self;
}

macro_rules! dense_key_int {
    ($($t:ty),*) => {
        $(
            impl DenseKey for $t {
                fn index(&self) -> usize {
                    use std::convert::TryFrom;
                    usize::try_from(*self).expect("negative key in dense item collection")
                }

                fn from_index(index: usize) -> Self {
                    use std::convert::TryFrom;
                    <$t>::try_from(index).expect("dense index out of key range")
                }
            }
        )*
    };
}

dense_key_int!(usize, u16, u32, u64, i16, i32, i64, isize);

pub(crate) struct DenseOps<K> {
    index: fn(&K) -> usize,
    key: fn(usize) -> K,
}

/// Backing representation of an item collection: a hash map keyed by any
/// hashable key, or a dense vector indexed by integers in `[0, n)` where
/// `set_max` pre-sizes the slot array.
pub(crate) enum Table<K, V> {
    Hash(RwLock<FxHashMap<K, Arc<ItemSlot<V>>>>),
    Dense {
        slots: RwLock<Vec<Arc<ItemSlot<V>>>>,
        ops: DenseOps<K>,
    },
}

impl<K: Key, V> Table<K, V> {
    pub(crate) fn hash() -> Table<K, V> {
        Table::Hash(RwLock::new(FxHashMap::default()))
    }

    pub(crate) fn dense() -> Table<K, V>
    where
        K: DenseKey,
    {
        Table::Dense {
            slots: RwLock::new(Vec::new()),
            ops: DenseOps {
                index: |key: &K| key.index(),
                key: K::from_index,
            },
        }
    }

    /// The slot for `key`, creating a vacant one if the key was never seen.
    pub(crate) fn slot(&self, key: &K) -> Arc<ItemSlot<V>> {
        match self {
            Table::Hash(map) => {
                if let Some(slot) = map.read().get(key) {
                    return slot.clone();
                }
                map.write()
                    .entry(key.clone())
                    .or_insert_with(ItemSlot::new)
                    .clone()
            }
            Table::Dense { slots, ops } => {
                let index = (ops.index)(key);
                {
                    let slots = slots.read();
                    if index < slots.len() {
                        return slots[index].clone();
                    }
                }
                let mut slots = slots.write();
                while slots.len() <= index {
                    slots.push(ItemSlot::new());
                }
                slots[index].clone()
            }
        }
    }

    pub(crate) fn existing(&self, key: &K) -> Option<Arc<ItemSlot<V>>> {
        match self {
            Table::Hash(map) => map.read().get(key).cloned(),
            Table::Dense { slots, ops } => {
                let index = (ops.index)(key);
                slots.read().get(index).cloned()
            }
        }
    }

    /// Pre-size the store for `n` keys; O(1) slot access afterwards in the
    /// dense variant.
    pub(crate) fn reserve(&self, n: usize) {
        match self {
            Table::Hash(map) => map.write().reserve(n),
            Table::Dense { slots, .. } => {
                let mut slots = slots.write();
                while slots.len() < n {
                    slots.push(ItemSlot::new());
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<(K, Arc<ItemSlot<V>>)> {
        match self {
            Table::Hash(map) => map
                .read()
                .iter()
                .map(|(k, slot)| (k.clone(), slot.clone()))
                .collect(),
            Table::Dense { slots, ops } => slots
                .read()
                .iter()
                .enumerate()
                .map(|(i, slot)| ((ops.key)(i), slot.clone()))
                .collect(),
        }
    }

    pub(crate) fn clear(&self) {
        match self {
            Table::Hash(map) => map.write().clear(),
            Table::Dense { slots, .. } => slots.write().clear(),
        }
    }
}
