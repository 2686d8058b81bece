use crate::get_list::StepLogs;
use crate::runtime::Scheduler;
use crossbeam_utils::atomic::AtomicCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Where a schedulable currently stands in its lifecycle.
///
/// `Queued` covers both the freshly prescribed ("prepared") instance and an
/// instance re-queued after a wake-up; the distinction is not observable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StepStatus {
    Queued,
    Running,
    Suspended,
    Done,
    Canceled,
}

/// The status word plus the pending-registration counter that together drive
/// the suspend/resume protocol.
///
/// A schedulable registers itself in one suspend group per missing item
/// (`register`). Each arriving item resolves one registration (`resolve`);
/// whoever brings the counter to zero *and* wins the `Suspended -> Queued`
/// exchange re-submits the instance. The worker that parks an instance
/// re-checks the counter afterwards (`park`), which closes the window where
/// every registration resolved while the body was still unwinding.
pub(crate) struct ScheduleState {
    status: AtomicCell<StepStatus>,
    pending: AtomicUsize,
}

impl ScheduleState {
    pub(crate) fn new() -> Self {
        ScheduleState {
            status: AtomicCell::new(StepStatus::Queued),
            pending: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> StepStatus {
        self.status.load()
    }

    /// `Queued -> Running`; false when the instance was canceled (or a stale
    /// duplicate submission raced us).
    pub(crate) fn begin_run(&self) -> bool {
        self.status
            .compare_exchange(StepStatus::Queued, StepStatus::Running)
            .is_ok()
    }

    /// Account for one suspend-group membership. Called under the lock of the
    /// slot whose group the instance just joined.
    pub(crate) fn register(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether any registration is still unresolved.
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// One awaited item arrived. Returns true when the caller must re-submit
    /// the instance to the scheduler.
    pub(crate) fn resolve(&self) -> bool {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "resolve without a matching register");
        prev == 1
            && self
                .status
                .compare_exchange(StepStatus::Suspended, StepStatus::Queued)
                .is_ok()
    }

    /// Park the instance after an attempt that did not complete (or before
    /// the first attempt, when dependencies were pre-declared absent).
    /// Returns true when every registration already resolved, in which case
    /// the caller must re-submit the instance itself.
    pub(crate) fn park(&self) -> bool {
        self.status.store(StepStatus::Suspended);
        self.pending.load(Ordering::Acquire) == 0
            && self
                .status
                .compare_exchange(StepStatus::Suspended, StepStatus::Queued)
                .is_ok()
    }

    /// Park with no pending registrations; the holder (a sequentialize gate)
    /// wakes the instance explicitly. Must be ordered against the matching
    /// `reclaim` by an external lock.
    pub(crate) fn force_suspend(&self) {
        self.status.store(StepStatus::Suspended);
    }

    /// `Suspended -> Queued` on behalf of an external holder.
    pub(crate) fn reclaim(&self) -> bool {
        self.status
            .compare_exchange(StepStatus::Suspended, StepStatus::Queued)
            .is_ok()
    }

    /// `Running -> Queued`, for a body that asked to be re-run.
    pub(crate) fn requeue(&self) {
        self.status.store(StepStatus::Queued);
    }

    pub(crate) fn complete(&self) {
        self.status.store(StepStatus::Done);
    }

    pub(crate) fn cancel(&self) {
        self.status.store(StepStatus::Canceled);
    }
}

/// Anything the scheduler can run: a step instance or a range-splitting task.
///
/// `run` performs one attempt on a worker thread; the instance takes care of
/// its own status transitions and re-submission. `logs` exposes the get-list
/// and put-log of step instances so that item collections can reach them
/// through the thread-local current-step pointer; range tasks have none.
pub(crate) trait Schedulable: Send + Sync {
    fn state(&self) -> &ScheduleState;

    fn logs(&self) -> Option<&StepLogs>;

    fn priority(&self) -> i32 {
        0
    }

    fn run(self: Arc<Self>, sched: &Arc<Scheduler>);

    /// Short human-readable identity for log lines.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_requeues_only_the_last_registration() {
        let state = ScheduleState::new();
        state.register();
        state.register();
        assert!(!state.park());
        assert!(!state.resolve());
        assert!(state.resolve());
        assert_eq!(state.status(), StepStatus::Queued);
    }

    #[test]
    fn park_catches_registrations_resolved_during_unwind() {
        let state = ScheduleState::new();
        state.register();
        // The wake arrives while the status is still Running: the waker must
        // not requeue, the parking worker must.
        assert!(state.begin_run());
        assert!(!state.resolve());
        assert!(state.park());
        assert_eq!(state.status(), StepStatus::Queued);
    }

    #[test]
    fn canceled_instances_refuse_to_run() {
        let state = ScheduleState::new();
        state.cancel();
        assert!(!state.begin_run());
        assert_eq!(state.status(), StepStatus::Canceled);
    }
}
