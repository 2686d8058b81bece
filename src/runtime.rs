//! The work-stealing scheduler: a fixed pool of workers, per-worker deques,
//! a global injector for cross-thread submissions, and the quiescence
//! counters that `Context::wait` blocks on.

use crate::schedulable::Schedulable;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) type Job = Arc<dyn Schedulable>;

/// Which end of a victim's deque workers steal from. Selected once per pool
/// from the `CNC_SCHEDULER` environment variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StealOrder {
    Lifo,
    Fifo,
}

impl StealOrder {
    fn from_env() -> StealOrder {
        parse_steal_order(std::env::var("CNC_SCHEDULER").ok().as_deref())
    }
}

fn parse_steal_order(var: Option<&str>) -> StealOrder {
    match var {
        None => StealOrder::Lifo,
        Some("LIFO_STEAL") => StealOrder::Lifo,
        Some("FIFO_STEAL") => StealOrder::Fifo,
        Some(other) => {
            warn!("unknown CNC_SCHEDULER value {:?}, using LIFO_STEAL", other);
            StealOrder::Lifo
        }
    }
}

struct LocalWorker {
    sched: usize,
    queue: Worker<Job>,
}

thread_local! {
    static WORKER: RefCell<Option<LocalWorker>> = RefCell::new(None);
    static CURRENT_STEP: RefCell<Option<Job>> = RefCell::new(None);
}

/// Entry in the global priority queue; higher priority first, submission
/// order among equals.
struct PrioEntry {
    priority: i32,
    seq: u64,
    job: Job,
}

impl PartialEq for PrioEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PrioEntry {}

impl PartialOrd for PrioEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared state of one worker pool. Collections hold this through an `Arc`;
/// the owning `Context` shuts it down on drop.
pub(crate) struct Scheduler {
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    priority: Mutex<BinaryHeap<PrioEntry>>,
    priority_len: AtomicUsize,
    prio_seq: AtomicU64,

    /// Workers park here when they find no task; every submission notifies.
    sleep: Mutex<()>,
    work_available: Condvar,

    /// Schedulables submitted but not yet retired. A step parked in a
    /// suspend group is not inflight; its wake-up re-submits it.
    inflight: AtomicUsize,
    /// Graphs that explicitly left quiescence (`Context::leave_quiescence`).
    active_graphs: AtomicUsize,
    idle: Mutex<()>,
    quiescent: Condvar,

    shutting_down: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn new(threads: usize) -> Arc<Scheduler> {
        let threads = threads.max(1);
        let order = StealOrder::from_env();
        let locals: Vec<Worker<Job>> = (0..threads)
            .map(|_| match order {
                StealOrder::Lifo => Worker::new_lifo(),
                StealOrder::Fifo => Worker::new_fifo(),
            })
            .collect();
        let stealers = locals.iter().map(Worker::stealer).collect();

        let sched = Arc::new(Scheduler {
            injector: Injector::new(),
            stealers,
            priority: Mutex::new(BinaryHeap::new()),
            priority_len: AtomicUsize::new(0),
            prio_seq: AtomicU64::new(0),
            sleep: Mutex::new(()),
            work_available: Condvar::new(),
            inflight: AtomicUsize::new(0),
            active_graphs: AtomicUsize::new(0),
            idle: Mutex::new(()),
            quiescent: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        });

        debug!("starting {} workers ({:?} stealing)", threads, order);
        let mut handles = Vec::with_capacity(threads);
        for (index, local) in locals.into_iter().enumerate() {
            let sched = sched.clone();
            let handle = thread::Builder::new()
                .name(format!("tagrun-worker-{}", index))
                .spawn(move || worker_loop(sched, local))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        *sched.workers.lock() = handles;
        sched
    }

    fn id(&self) -> usize {
        self as *const Scheduler as usize
    }

    /// Hand a schedulable to the pool. Worker threads push onto their own
    /// deque; everyone else goes through the injector (or the priority heap
    /// when the tuner assigned a non-zero priority).
    pub(crate) fn submit(&self, job: Job) {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let priority = job.priority();
        if priority != 0 {
            let seq = self.prio_seq.fetch_add(1, Ordering::Relaxed);
            self.priority.lock().push(PrioEntry { priority, seq, job });
            self.priority_len.fetch_add(1, Ordering::SeqCst);
        } else {
            let mut job = Some(job);
            WORKER.with(|w| {
                if let Some(local) = w.borrow().as_ref() {
                    if local.sched == self.id() {
                        local.queue.push(job.take().expect("job already taken"));
                    }
                }
            });
            if let Some(job) = job {
                self.injector.push(job);
            }
        }
        let _guard = self.sleep.lock();
        self.work_available.notify_one();
    }

    /// Called by item stores when a put resolves one of `job`'s
    /// registrations; re-submits the job once its last registration resolves.
    pub(crate) fn resume(&self, job: Job) {
        if job.state().resolve() {
            debug!("waking {}", job.describe());
            self.submit(job);
        }
    }

    fn find_task(&self) -> Option<Job> {
        if let Some(job) = self.pop_local() {
            return Some(job);
        }
        if let Some(job) = self.pop_priority() {
            return Some(job);
        }
        self.steal()
    }

    fn pop_local(&self) -> Option<Job> {
        WORKER.with(|w| match w.borrow().as_ref() {
            Some(local) if local.sched == self.id() => local.queue.pop(),
            _ => None,
        })
    }

    fn pop_priority(&self) -> Option<Job> {
        if self.priority_len.load(Ordering::SeqCst) == 0 {
            return None;
        }
        let entry = self.priority.lock().pop();
        if entry.is_some() {
            self.priority_len.fetch_sub(1, Ordering::SeqCst);
        }
        entry.map(|e| e.job)
    }

    fn steal(&self) -> Option<Job> {
        WORKER.with(|w| {
            let borrow = w.borrow();
            let local = match borrow.as_ref() {
                Some(local) if local.sched == self.id() => Some(&local.queue),
                _ => None,
            };
            std::iter::repeat_with(|| {
                let global = match local {
                    Some(queue) => self.injector.steal_batch_and_pop(queue),
                    None => self.injector.steal(),
                };
                global.or_else(|| self.stealers.iter().map(Stealer::steal).collect())
            })
            .find(|s: &Steal<Job>| !s.is_retry())
            .and_then(Steal::success)
        })
    }

    fn retire(&self) {
        if self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.announce_quiescence();
        }
    }

    fn announce_quiescence(&self) {
        let _guard = self.idle.lock();
        self.quiescent.notify_all();
    }

    pub(crate) fn is_quiescent(&self) -> bool {
        self.inflight.load(Ordering::SeqCst) == 0
            && self.active_graphs.load(Ordering::SeqCst) == 0
    }

    /// Block until no schedulable is queued or running and no graph holds
    /// the pool active. Spurious wake-ups re-check both counters.
    pub(crate) fn wait_quiescent(&self) {
        let mut guard = self.idle.lock();
        while !self.is_quiescent() {
            self.quiescent.wait(&mut guard);
        }
    }

    pub(crate) fn leave_quiescence(&self) {
        self.active_graphs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn enter_quiescence(&self) {
        let prev = self.active_graphs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "enter_quiescence without matching leave_quiescence");
        if prev == 1 {
            self.announce_quiescence();
        }
    }

    #[cfg(test)]
    pub(crate) fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        {
            let _guard = self.sleep.lock();
        }
        self.work_available.notify_all();
        let handles = mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(sched: Arc<Scheduler>, queue: Worker<Job>) {
    WORKER.with(|w| {
        *w.borrow_mut() = Some(LocalWorker {
            sched: sched.id(),
            queue,
        });
    });
    loop {
        match sched.find_task() {
            Some(job) => {
                job.run(&sched);
                sched.retire();
            }
            None => {
                let mut guard = sched.sleep.lock();
                if sched.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                // Re-check every source under the sleep lock; a submission
                // that raced our scan is either visible now or will notify.
                match sched.find_task() {
                    Some(job) => {
                        drop(guard);
                        job.run(&sched);
                        sched.retire();
                    }
                    None => sched.work_available.wait(&mut guard),
                }
            }
        }
    }
    WORKER.with(|w| *w.borrow_mut() = None);
}

/// Publish `job` as the thread's current step for the duration of a body
/// invocation, so item collections can find the caller's get-list.
pub(crate) fn enter_step(job: Job) -> CurrentStepGuard {
    CURRENT_STEP.with(|c| *c.borrow_mut() = Some(job));
    CurrentStepGuard
}

pub(crate) struct CurrentStepGuard;

impl Drop for CurrentStepGuard {
    fn drop(&mut self) {
        CURRENT_STEP.with(|c| *c.borrow_mut() = None);
    }
}

/// The step instance executing on this thread, if any.
pub(crate) fn current_step() -> Option<Job> {
    CURRENT_STEP.with(|c| c.borrow().clone())
}
