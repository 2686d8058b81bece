//! The cancel tuner: a concurrent set of canceled tags plus a cancel-all
//! flag, consulted by step collections at dispatch and resume time.

use crate::tuner::{DefaultStepTuner, DependencyScope, StepTuner};
use crate::Tag;
use log::debug;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct CancelSet<T> {
    all: AtomicBool,
    tags: RwLock<FxHashSet<T>>,
}

/// A step tuner that lets steps (and the environment) cancel prescribed
/// instances.
///
/// Cancellation is cooperative: a canceled tag is skipped when its instance
/// is dispatched or resumed; a body that is already running is never
/// preempted. Handles are cheap clones sharing one canceled set, so the same
/// tuner can be given to the step collection and captured by step bodies.
pub struct CancelTuner<T, Inner = DefaultStepTuner> {
    shared: Arc<CancelSet<T>>,
    inner: Inner,
}

impl<T, Inner: Clone> Clone for CancelTuner<T, Inner> {
    fn clone(&self) -> Self {
        CancelTuner {
            shared: self.shared.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T, Inner> fmt::Debug for CancelTuner<T, Inner> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("CancelTuner")
            .field("cancel_all", &self.shared.all.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Tag> CancelTuner<T> {
    /// A cancel tuner with otherwise default step tuning.
    pub fn new() -> Self {
        CancelTuner::with_tuner(DefaultStepTuner)
    }
}

impl<T: Tag> Default for CancelTuner<T> {
    fn default() -> Self {
        CancelTuner::new()
    }
}

impl<T: Tag, Inner> CancelTuner<T, Inner> {
    /// Wrap `inner`, adding cancellation on top of its other knobs.
    pub fn with_tuner(inner: Inner) -> Self {
        CancelTuner {
            shared: Arc::new(CancelSet {
                all: AtomicBool::new(false),
                tags: RwLock::new(FxHashSet::default()),
            }),
            inner,
        }
    }

    /// Mark `tag` canceled; its step instance is skipped at the next
    /// dispatch or resume.
    pub fn cancel(&self, tag: T) {
        debug!("canceling tag {:?}", tag);
        self.shared.tags.write().insert(tag);
    }

    /// Cancel every instance, present and future, until the tuner is reset.
    pub fn cancel_all(&self) {
        debug!("canceling all tags");
        self.shared.all.store(true, Ordering::Release);
    }

    /// Whether `tag` is currently canceled.
    pub fn is_canceled(&self, tag: &T) -> bool {
        self.shared.all.load(Ordering::Acquire) || self.shared.tags.read().contains(tag)
    }

    /// Forget all cancellations. Only meaningful while the graph is
    /// quiescent; racing this against live dispatches gives unspecified
    /// results.
    pub fn unsafe_reset(&self) {
        self.shared.all.store(false, Ordering::Release);
        self.shared.tags.write().clear();
    }
}

impl<T: Tag, Inner: StepTuner<T>> StepTuner<T> for CancelTuner<T, Inner> {
    fn priority(&self, tag: &T) -> i32 {
        self.inner.priority(tag)
    }

    fn sequentialize(&self, tag: &T) -> bool {
        self.inner.sequentialize(tag)
    }

    fn is_canceled(&self, tag: &T) -> bool {
        CancelTuner::is_canceled(self, tag) || self.inner.is_canceled(tag)
    }

    fn depends(&self, tag: &T, scope: &mut DependencyScope<'_>) {
        self.inner.depends(tag, scope);
    }
}
