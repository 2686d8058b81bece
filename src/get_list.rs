use parking_lot::Mutex;
use std::any::Any;
use std::fmt;

/// One counted read, recorded so the get-count can be decremented when the
/// owning step instance commits. Entries are type-erased because a single
/// step may read from item collections of different key/value types.
pub(crate) trait GetEntry: Send {
    fn decrement(&self);
}

/// The per-instance record of items successfully read during the current
/// execution attempt.
///
/// Get-counts must not be decremented until the instance has committed and
/// will not replay. The list is therefore cleared whenever an attempt ends
/// in suspension, and flushed (one decrement per entry) exactly once when
/// the instance completes. `misses` counts `unsafe_get` probes that came up
/// empty since the last clear; a non-zero count at commit time demotes the
/// attempt to a suspension.
pub(crate) struct GetList {
    entries: Vec<Box<dyn GetEntry>>,
    misses: usize,
}

impl GetList {
    pub(crate) fn new() -> Self {
        GetList {
            entries: Vec::new(),
            misses: 0,
        }
    }

    pub(crate) fn record(&mut self, entry: Box<dyn GetEntry>) {
        self.entries.push(entry);
    }

    pub(crate) fn note_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn has_misses(&self) -> bool {
        self.misses > 0
    }

    /// Forget the attempt: the instance will replay from the top.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.misses = 0;
    }

    /// Commit the attempt: decrement every recorded item once.
    pub(crate) fn commit(&mut self) {
        for entry in self.entries.drain(..) {
            entry.decrement();
        }
        self.misses = 0;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for GetList {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("GetList")
            .field("entries", &self.entries.len())
            .field("misses", &self.misses)
            .finish()
    }
}

/// Keys already put by this step instance, kept across replays.
///
/// A step that suspends may already have issued puts; those are final. On
/// replay the body re-executes from the top and will issue the same puts
/// again, so the item store consults this log before treating a put as a
/// single-assignment violation: a re-put of a key this instance already put
/// is a no-op, any other re-put is fatal.
pub(crate) struct PutLog {
    entries: Vec<(u32, Box<dyn Any + Send>)>,
}

impl PutLog {
    pub(crate) fn new() -> Self {
        PutLog {
            entries: Vec::new(),
        }
    }

    pub(crate) fn record<K: Eq + Send + 'static>(&mut self, collection: u32, key: K) {
        self.entries.push((collection, Box::new(key)));
    }

    pub(crate) fn contains<K: Eq + Send + 'static>(&self, collection: u32, key: &K) -> bool {
        self.entries.iter().any(|(coll, recorded)| {
            *coll == collection && recorded.downcast_ref::<K>() == Some(key)
        })
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The bookkeeping a step instance exposes to item collections while it is
/// the thread-local current step.
pub(crate) struct StepLogs {
    pub(crate) gets: Mutex<GetList>,
    pub(crate) puts: Mutex<PutLog>,
}

impl StepLogs {
    pub(crate) fn new() -> Self {
        StepLogs {
            gets: Mutex::new(GetList::new()),
            puts: Mutex::new(PutLog::new()),
        }
    }
}
