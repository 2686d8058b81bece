//! Step collections: the bodies, the launcher used by prescription wiring,
//! the per-tag step instances, and the admission gate that serializes
//! sequentialized steps in tag order.

use crate::get_list::StepLogs;
use crate::item::ItemCollection;
use crate::runtime::{self, Job, Scheduler};
use crate::schedulable::{Schedulable, ScheduleState};
use crate::tuner::{DependencyScope, StepTuner};
use crate::{NotReady, Outcome, Step, StepResult, Tag};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The tag-collection-facing half of a step collection: create one step
/// instance for a tag and hand it to the scheduler.
pub(crate) trait StepLauncher<T>: Send + Sync {
    fn launch(self: Arc<Self>, tag: &T);
    fn name(&self) -> &str;
}

/// Admission gate for sequentialized steps. Outstanding sequentialized tags
/// are admitted lowest first, one at a time; an admitted instance holds the
/// gate across suspensions until it completes or is canceled.
struct SeqGate<T> {
    inner: Mutex<GateInner<T>>,
}

struct GateInner<T> {
    outstanding: BTreeSet<T>,
    running: Option<T>,
    parked: BTreeMap<T, Job>,
}

impl<T: Tag> SeqGate<T> {
    fn new() -> Self {
        SeqGate {
            inner: Mutex::new(GateInner {
                outstanding: BTreeSet::new(),
                running: None,
                parked: BTreeMap::new(),
            }),
        }
    }

    /// Record `tag` as an outstanding sequentialized tag. Called at
    /// prescription time so admission order covers everything prescribed so
    /// far, not just what happens to be parked.
    fn enroll(&self, tag: &T) {
        self.inner.lock().outstanding.insert(tag.clone());
    }

    /// Try to admit the dispatched instance, enrolling its tag if it was not
    /// enrolled yet. The instance is `Running`; parking it is ordered
    /// against the wake-up by the gate lock.
    fn admit(&self, tag: &T, inst: &Job) -> bool {
        let mut gate = self.inner.lock();
        gate.outstanding.insert(tag.clone());
        if gate.running.as_ref() == Some(tag) {
            return true;
        }
        if gate.running.is_none() && gate.outstanding.iter().next() == Some(tag) {
            gate.running = Some(tag.clone());
            true
        } else {
            inst.state().force_suspend();
            gate.parked.insert(tag.clone(), inst.clone());
            false
        }
    }

    /// Route an instance whose body asked for sequentialization back through
    /// the gate.
    fn requeue_through(&self, tag: &T, inst: &Job, sched: &Arc<Scheduler>) {
        let mut gate = self.inner.lock();
        gate.outstanding.insert(tag.clone());
        let holds_gate = gate.running.as_ref() == Some(tag);
        if holds_gate
            || (gate.running.is_none() && gate.outstanding.iter().next() == Some(tag))
        {
            if !holds_gate {
                gate.running = Some(tag.clone());
            }
            inst.state().requeue();
            drop(gate);
            sched.submit(inst.clone());
        } else {
            inst.state().force_suspend();
            gate.parked.insert(tag.clone(), inst.clone());
        }
    }

    /// The instance for `tag` is finished with the gate; admit the next
    /// lowest outstanding tag if it is already waiting.
    fn retire(&self, tag: &T, sched: &Arc<Scheduler>) {
        let mut gate = self.inner.lock();
        gate.outstanding.remove(tag);
        if gate.running.as_ref() == Some(tag) {
            gate.running = None;
        }
        if gate.running.is_none() {
            let next = gate.outstanding.iter().next().cloned();
            if let Some(next) = next {
                if let Some(inst) = gate.parked.remove(&next) {
                    gate.running = Some(next);
                    let woken = inst.state().reclaim();
                    debug_assert!(woken, "gate-parked instance was not suspended");
                    drop(gate);
                    sched.submit(inst);
                }
            }
        }
    }
}

struct GraphEdges {
    consumes: Vec<String>,
    produces: Vec<String>,
}

pub(crate) struct StepCollectionInner<T, S, Tun> {
    name: String,
    sched: Arc<Scheduler>,
    body: S,
    tuner: Tun,
    gate: SeqGate<T>,
    edges: Mutex<GraphEdges>,
}

/// A collection of step instances sharing one pure body and one tuner.
///
/// Step collections do nothing by themselves; wiring one to a tag collection
/// with [`TagCollection::prescribes`](crate::TagCollection::prescribes)
/// makes every tag put there materialize one instance.
pub struct StepCollection<T, S, Tun = crate::tuner::DefaultStepTuner> {
    inner: Arc<StepCollectionInner<T, S, Tun>>,
}

impl<T, S, Tun> Clone for StepCollection<T, S, Tun> {
    fn clone(&self) -> Self {
        StepCollection {
            inner: self.inner.clone(),
        }
    }
}

impl<T, S, Tun> fmt::Debug for StepCollection<T, S, Tun> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges = self.inner.edges.lock();
        fmt.debug_struct("StepCollection")
            .field("name", &self.inner.name)
            .field("consumes", &edges.consumes)
            .field("produces", &edges.produces)
            .finish()
    }
}

pub(crate) struct StepInstance<T, S, Tun> {
    tag: T,
    home: Arc<StepCollectionInner<T, S, Tun>>,
    state: ScheduleState,
    logs: StepLogs,
    needs_seq: AtomicBool,
}

impl<T, S, Tun> StepCollection<T, S, Tun>
where
    T: Tag,
    S: Step<T>,
    Tun: StepTuner<T>,
{
    pub(crate) fn new(name: &str, sched: Arc<Scheduler>, body: S, tuner: Tun) -> Self {
        StepCollection {
            inner: Arc::new(StepCollectionInner {
                name: name.to_string(),
                sched,
                body,
                tuner,
                gate: SeqGate::new(),
                edges: Mutex::new(GraphEdges {
                    consumes: Vec::new(),
                    produces: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn launcher(&self) -> Arc<dyn StepLauncher<T>> {
        self.inner.clone()
    }

    /// Declare that this collection's steps read from `items`. Declarative
    /// only; recorded for tracing.
    pub fn consumes<K, V, ITun>(&self, items: &ItemCollection<K, V, ITun>) {
        let name = items.collection_name().to_string();
        info!("{}: consumes {}", self.inner.name, name);
        self.inner.edges.lock().consumes.push(name);
    }

    /// Declare that this collection's steps write to `items`. Declarative
    /// only; recorded for tracing.
    pub fn produces<K, V, ITun>(&self, items: &ItemCollection<K, V, ITun>) {
        let name = items.collection_name().to_string();
        info!("{}: produces {}", self.inner.name, name);
        self.inner.edges.lock().produces.push(name);
    }
}

impl<T, S, Tun> StepCollectionInner<T, S, Tun>
where
    T: Tag,
    S: Step<T>,
    Tun: StepTuner<T>,
{
    fn dispatch(&self, inst: Arc<StepInstance<T, S, Tun>>, sched: &Arc<Scheduler>) {
        let sequential =
            self.tuner.sequentialize(&inst.tag) || inst.needs_seq.load(Ordering::Acquire);
        // Checked at first dispatch and again after every resume.
        if self.tuner.is_canceled(&inst.tag) {
            inst.state.cancel();
            debug!("{}: {:?} canceled at dispatch", self.name, inst.tag);
            if sequential {
                self.gate.retire(&inst.tag, sched);
            }
            return;
        }
        if !inst.state.begin_run() {
            return;
        }
        let job: Job = inst.clone();
        if sequential && !self.gate.admit(&inst.tag, &job) {
            debug!(
                "{}: {:?} waits for sequentialized predecessors",
                self.name, inst.tag
            );
            return;
        }
        let guard = runtime::enter_step(job.clone());
        let result = self.body.execute(&inst.tag);
        drop(guard);
        self.conclude(inst, job, sequential, result, sched);
    }

    fn conclude(
        &self,
        inst: Arc<StepInstance<T, S, Tun>>,
        job: Job,
        sequential: bool,
        result: StepResult,
        sched: &Arc<Scheduler>,
    ) {
        match result {
            Ok(Outcome::Success) => {
                let mut gets = inst.logs.gets.lock();
                if gets.has_misses() {
                    // Polled gets missed: the attempt is provisional and the
                    // instance replays once the items arrive.
                    gets.clear();
                    drop(gets);
                    debug!("{}: {:?} suspended on polled gets", self.name, inst.tag);
                    if inst.state.park() {
                        sched.submit(job);
                    }
                } else {
                    gets.commit();
                    drop(gets);
                    inst.logs.puts.lock().clear();
                    inst.state.complete();
                    debug!("{}: {:?} done", self.name, inst.tag);
                    if sequential {
                        self.gate.retire(&inst.tag, sched);
                    }
                }
            }
            Ok(Outcome::NeedsSequentialize) => {
                inst.logs.gets.lock().clear();
                inst.needs_seq.store(true, Ordering::Release);
                debug!(
                    "{}: {:?} re-queued for sequential execution",
                    self.name, inst.tag
                );
                if inst.state.has_pending() {
                    // Polled gets armed wake-ups; let those drive the
                    // replay, which re-enters through the gate.
                    if inst.state.park() {
                        sched.submit(job);
                    }
                } else {
                    self.gate.requeue_through(&inst.tag, &job, sched);
                }
            }
            Err(NotReady) => {
                inst.logs.gets.lock().clear();
                debug!("{}: {:?} suspended", self.name, inst.tag);
                if inst.state.park() {
                    sched.submit(job);
                }
            }
        }
    }
}

impl<T, S, Tun> StepLauncher<T> for StepCollectionInner<T, S, Tun>
where
    T: Tag,
    S: Step<T>,
    Tun: StepTuner<T>,
{
    fn launch(self: Arc<Self>, tag: &T) {
        let inst = Arc::new(StepInstance {
            tag: tag.clone(),
            home: self.clone(),
            state: ScheduleState::new(),
            logs: StepLogs::new(),
            needs_seq: AtomicBool::new(false),
        });
        debug!("{}: step prescribed for tag {:?}", self.name, tag);
        if self.tuner.sequentialize(tag) {
            self.gate.enroll(tag);
        }
        let job: Job = inst;
        let mut scope = DependencyScope::new(&job);
        self.tuner.depends(tag, &mut scope);
        if scope.missing() == 0 || job.state().park() {
            self.sched.submit(job);
        } else {
            debug!(
                "{}: {:?} pre-suspended on {} declared dependencies",
                self.name,
                tag,
                scope.missing()
            );
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, S, Tun> Schedulable for StepInstance<T, S, Tun>
where
    T: Tag,
    S: Step<T>,
    Tun: StepTuner<T>,
{
    fn state(&self) -> &ScheduleState {
        &self.state
    }

    fn logs(&self) -> Option<&StepLogs> {
        Some(&self.logs)
    }

    fn priority(&self) -> i32 {
        self.home.tuner.priority(&self.tag)
    }

    fn run(self: Arc<Self>, sched: &Arc<Scheduler>) {
        let home = self.home.clone();
        home.dispatch(self, sched);
    }

    fn describe(&self) -> String {
        format!("{}({:?})", self.home.name, self.tag)
    }
}
