use std::sync::atomic::{AtomicI32, Ordering};

/// Sentinel: the item is never released by counting.
pub(crate) const NO_GET_COUNT: i32 = i32::MIN;
/// Sentinel: no count has been installed for the item yet.
pub(crate) const UNSET_GET_COUNT: i32 = i32::MIN + 1;

/// Per-item metadata: the atomic get-count, encoded with the two sentinels
/// above so it needs no extra protection beyond the slot lock that guards
/// the value and the suspend group.
pub(crate) struct ItemProperties {
    count: AtomicI32,
}

impl ItemProperties {
    pub(crate) fn new() -> Self {
        ItemProperties {
            count: AtomicI32::new(UNSET_GET_COUNT),
        }
    }

    pub(crate) fn get_count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, count: i32) {
        self.count.store(count, Ordering::Release);
    }

    /// Install `cnt` if no count was set yet, otherwise add to the existing
    /// count. Returns the resulting count.
    pub(crate) fn set_or_increment(&self, cnt: i32) -> i32 {
        match self.count.compare_exchange(
            UNSET_GET_COUNT,
            cnt,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => cnt,
            Err(prev) => {
                assert!(
                    prev != NO_GET_COUNT,
                    "get-count update on an uncounted item"
                );
                self.count.fetch_add(cnt, Ordering::AcqRel) + cnt
            }
        }
    }

    /// Take one read off the count; returns what is left. Exactly one caller
    /// observes zero, and that caller releases the value.
    pub(crate) fn decrement(&self) -> i32 {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev != NO_GET_COUNT && prev != UNSET_GET_COUNT,
            "get-count decrement on an item without a count"
        );
        assert!(prev > 0, "item get-count decremented below zero");
        prev - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_or_increment_installs_then_accumulates() {
        let props = ItemProperties::new();
        assert_eq!(props.get_count(), UNSET_GET_COUNT);
        assert_eq!(props.set_or_increment(2), 2);
        assert_eq!(props.set_or_increment(3), 5);
        assert_eq!(props.get_count(), 5);
    }

    #[test]
    fn decrement_counts_down_to_zero() {
        let props = ItemProperties::new();
        props.set(2);
        assert_eq!(props.decrement(), 1);
        assert_eq!(props.decrement(), 0);
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn decrement_past_zero_is_fatal() {
        let props = ItemProperties::new();
        props.set(1);
        props.decrement();
        props.decrement();
    }

    #[test]
    #[should_panic(expected = "without a count")]
    fn decrement_of_uncounted_item_is_fatal() {
        let props = ItemProperties::new();
        props.set(NO_GET_COUNT);
        props.decrement();
    }
}
