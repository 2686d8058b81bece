//! The context façade: owns the scheduler and the collection registry,
//! exposes the `wait()` barrier and graph-level controls.

use crate::item::table::{DenseKey, Table};
use crate::item::ItemCollection;
use crate::runtime::Scheduler;
use crate::step::StepCollection;
use crate::tag::TagCollection;
use crate::tuner::{DefaultItemTuner, DefaultStepTuner, ItemTuner, StepTuner};
use crate::{Key, NotReady, Step, Tag, Value};
use log::{debug, info};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Anything the context registers and can reset: item and tag stores.
pub(crate) trait Collection: Send + Sync {
    fn name(&self) -> &str;
    fn unsafe_reset(&self);
}

/// The root owner of a dataflow graph: all collections are created through
/// it, and it drives the scheduler that executes prescribed steps.
///
/// Dropping the context joins the worker pool. Collection handles may
/// outlive it, but no steps run once it is gone.
pub struct Context {
    sched: Arc<Scheduler>,
    collections: Mutex<Vec<Arc<dyn Collection>>>,
    next_id: AtomicU32,
}

impl Context {
    /// A context with one worker per available CPU.
    pub fn new() -> Context {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Context::with_threads(threads)
    }

    /// A context with a fixed worker-pool size (at least one).
    pub fn with_threads(threads: usize) -> Context {
        Context {
            sched: Scheduler::new(threads),
            collections: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(0),
        }
    }

    fn register(&self, collection: Arc<dyn Collection>) {
        self.collections.lock().push(collection);
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A hash-backed item collection with the default (uncounted) tuner.
    pub fn item_collection<K: Key, V: Value>(&self, name: &str) -> ItemCollection<K, V> {
        self.item_collection_with_tuner(name, DefaultItemTuner)
    }

    /// A hash-backed item collection with an explicit tuner.
    pub fn item_collection_with_tuner<K: Key, V: Value, Tun: ItemTuner<K>>(
        &self,
        name: &str,
        tuner: Tun,
    ) -> ItemCollection<K, V, Tun> {
        let collection =
            ItemCollection::new(name, self.next_id(), self.sched.clone(), tuner, Table::hash());
        self.register(collection.store().clone());
        collection
    }

    /// A dense, vector-backed item collection indexed by integer keys in
    /// `[0, n)`; size it with [`ItemCollection::set_max`].
    pub fn dense_item_collection<K: DenseKey, V: Value>(&self, name: &str) -> ItemCollection<K, V> {
        self.dense_item_collection_with_tuner(name, DefaultItemTuner)
    }

    /// A dense item collection with an explicit tuner.
    pub fn dense_item_collection_with_tuner<K: DenseKey, V: Value, Tun: ItemTuner<K>>(
        &self,
        name: &str,
        tuner: Tun,
    ) -> ItemCollection<K, V, Tun> {
        let collection = ItemCollection::new(
            name,
            self.next_id(),
            self.sched.clone(),
            tuner,
            Table::dense(),
        );
        self.register(collection.store().clone());
        collection
    }

    /// A tag collection.
    pub fn tag_collection<T: Tag>(&self, name: &str) -> TagCollection<T> {
        let collection = TagCollection::new(name, self.sched.clone());
        self.register(collection.store().clone());
        collection
    }

    /// A step collection with the default tuner.
    pub fn step_collection<T: Tag, S: Step<T>>(
        &self,
        name: &str,
        body: S,
    ) -> StepCollection<T, S> {
        self.step_collection_with_tuner(name, body, DefaultStepTuner)
    }

    /// A step collection with an explicit tuner.
    pub fn step_collection_with_tuner<T: Tag, S: Step<T>, Tun: StepTuner<T>>(
        &self,
        name: &str,
        body: S,
        tuner: Tun,
    ) -> StepCollection<T, S, Tun> {
        StepCollection::new(name, self.sched.clone(), body, tuner)
    }

    /// Block until the graph is quiescent: no step instance queued or
    /// running, and no graph holding the context active through
    /// [`leave_quiescence`](Context::leave_quiescence).
    ///
    /// Steps suspended on items that only the environment can put do not
    /// hold off quiescence; putting those items afterwards re-activates the
    /// graph, and `wait` may be called again.
    pub fn wait(&self) {
        debug!("waiting for quiescence");
        self.sched.wait_quiescent();
        debug!("graph is quiescent");
    }

    /// Commit the calling step's get-list so far: if any polled get
    /// ([`ItemCollection::unsafe_get`]) missed since the last flush, returns
    /// [`NotReady`] for the body to propagate; the step replays once the
    /// missing items arrive. Outside a step this is a no-op.
    pub fn flush_gets(&self) -> Result<(), NotReady> {
        crate::flush_gets()
    }

    /// Clear every registered collection (tags and items) while keeping the
    /// prescription wiring intact. Panics unless the graph is quiescent.
    pub fn unsafe_reset(&self) {
        assert!(
            self.sched.is_quiescent(),
            "unsafe_reset while the graph is active"
        );
        for collection in self.collections.lock().iter() {
            info!("resetting collection {}", collection.name());
            collection.unsafe_reset();
        }
    }

    /// Announce external work: the next [`wait`](Context::wait) will not
    /// return until a matching [`enter_quiescence`](Context::enter_quiescence).
    /// Used by sub-graphs that produce work the scheduler cannot see.
    pub fn leave_quiescence(&self) {
        self.sched.leave_quiescence();
    }

    /// Announce that a previously active sub-graph is quiescent again.
    pub fn enter_quiescence(&self) {
        self.sched.enter_quiescence();
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Context")
            .field("collections", &self.collections.lock().len())
            .field("quiescent", &self.sched.is_quiescent())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.sched.shutdown();
    }
}
