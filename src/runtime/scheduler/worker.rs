//! Pool workers.
//!
//! Each worker is one OS thread with a private inbox. The pool assigns it
//! one task at a time through that inbox; nothing else is shared with it
//! beyond the task record and the envelopes the task carries.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use tracing::{debug, trace};

use super::task::{JobKind, TaskContext, TaskRecord, TaskState};
use super::{PoolId, PoolShared};
use crate::runtime::lifecycle::{LifecycleCell, LifecycleState};

/// Unique worker identifier within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub u64);

impl WorkerId {
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Worker({})", self.0)
    }
}

/// Start time of the synchronous stretch a worker is currently in.
///
/// Stored as microseconds since the pool epoch plus one; zero means the
/// worker is idle or suspended in async code.
#[derive(Debug)]
pub(crate) struct BusyClock {
    epoch: Instant,
    since: AtomicU64,
}

impl BusyClock {
    pub(crate) fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            since: AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 + 1
    }

    pub(crate) fn arm(&self) {
        self.since.store(self.now(), Ordering::SeqCst);
    }

    /// Arm unless an enclosing synchronous stretch already did.
    pub(crate) fn arm_if_idle(&self) -> bool {
        self.since
            .compare_exchange(0, self.now(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn disarm(&self) {
        self.since.store(0, Ordering::SeqCst);
    }

    /// How long the current synchronous stretch has lasted.
    pub(crate) fn elapsed(&self) -> Option<Duration> {
        match self.since.load(Ordering::SeqCst) {
            0 => None,
            since => Some(Duration::from_micros(self.now().saturating_sub(since))),
        }
    }
}

/// State the pool and supervisor can observe about one worker.
#[derive(Debug)]
pub(crate) struct WorkerCell {
    id: WorkerId,
    lifecycle: LifecycleCell,
    clock: Arc<BusyClock>,
    // Innermost last. More than one entry only while a nested join runs a
    // child task inline.
    current: Mutex<Vec<Arc<TaskRecord>>>,
    load: AtomicU64,
    retired: AtomicBool,
}

impl WorkerCell {
    pub(crate) fn new(
        id: WorkerId,
        epoch: Instant,
    ) -> Self {
        Self {
            id,
            lifecycle: LifecycleCell::new(),
            clock: Arc::new(BusyClock::new(epoch)),
            current: Mutex::new(Vec::new()),
            load: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    #[inline]
    pub(crate) fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    #[inline]
    pub(crate) fn advance(
        &self,
        next: LifecycleState,
    ) -> bool {
        self.lifecycle.advance(next)
    }

    #[inline]
    pub(crate) fn clock(&self) -> &Arc<BusyClock> {
        &self.clock
    }

    #[inline]
    pub(crate) fn load(&self) -> u64 {
        self.load.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.lifecycle.advance(LifecycleState::Terminating);
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.is_retired() && self.state() == LifecycleState::Idle
    }

    /// Mark busy with `record`. Called by the dispatcher under the pool lock.
    pub(crate) fn begin(
        &self,
        record: Arc<TaskRecord>,
    ) {
        self.current.lock().push(record);
        self.advance(LifecycleState::Busy);
    }

    /// Mark idle again after the outermost task finished.
    pub(crate) fn end(&self) {
        self.current.lock().clear();
        self.load.fetch_add(1, Ordering::SeqCst);
        self.advance(LifecycleState::Idle);
    }

    /// Records in flight on this worker, outermost first.
    pub(crate) fn in_flight(&self) -> Vec<Arc<TaskRecord>> {
        self.current.lock().clone()
    }

    pub(crate) fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            state: self.state().to_string(),
            current: self.current.lock().last().map(|record| record.id().inner()),
            load: self.load(),
        }
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub state: String,
    /// Innermost task currently running, if any.
    pub current: Option<u64>,
    /// Tasks executed so far.
    pub load: u64,
}

/// Per-execution resources handed to a job.
pub(crate) struct ExecEnv {
    clock: Arc<BusyClock>,
    runtime: Option<Runtime>,
}

impl ExecEnv {
    pub(crate) fn new(clock: Arc<BusyClock>) -> Self {
        Self {
            clock,
            runtime: None,
        }
    }

    #[inline]
    pub(crate) fn clock(&self) -> &Arc<BusyClock> {
        &self.clock
    }

    /// Current-thread runtime for async bodies, built on first use.
    pub(crate) fn runtime(&mut self) -> io::Result<&Runtime> {
        if self.runtime.is_none() {
            self.runtime = Some(RuntimeBuilder::new_current_thread().enable_all().build()?);
        }
        match self.runtime.as_ref() {
            Some(runtime) => Ok(runtime),
            None => Err(io::Error::other("async runtime unavailable")),
        }
    }

    /// Throw away a runtime that saw a panic.
    pub(crate) fn reset_runtime(&mut self) {
        self.runtime = None;
    }
}

/// Message to a worker's inbox.
pub(crate) enum WorkerCommand {
    Run(Arc<TaskRecord>),
    Terminate,
}

struct WorkerLocal {
    pool: PoolId,
    shared: Weak<PoolShared>,
    cell: Arc<WorkerCell>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerLocal>> = const { RefCell::new(None) };
}

/// Worker id of the calling thread, if it is a worker of `pool`.
pub(crate) fn current_worker(pool: PoolId) -> Option<WorkerId> {
    CURRENT_WORKER.with(|local| {
        local
            .borrow()
            .as_ref()
            .filter(|local| local.pool == pool)
            .map(|local| local.cell.id())
    })
}

/// Run `record` inline if the caller is a worker of the same pool and the
/// task has not been picked up yet. Prevents a pool full of waiting parents
/// from starving their children.
pub(crate) fn help_if_nested(record: &Arc<TaskRecord>) {
    let local = CURRENT_WORKER.with(|local| {
        local
            .borrow()
            .as_ref()
            .filter(|local| local.pool == record.pool())
            .map(|local| (local.shared.clone(), local.cell.clone()))
    });
    let Some((shared, cell)) = local else {
        return;
    };
    if !record.transition(TaskState::Pending, TaskState::Running) {
        return;
    }
    debug!(task = %record.id(), worker = %cell.id(), "running nested task inline");
    cell.current.lock().push(record.clone());
    let mut env = ExecEnv::new(cell.clock().clone());
    execute(record, &mut env);
    cell.current.lock().pop();
    if let Some(shared) = shared.upgrade() {
        shared.notify_settled();
    }
}

/// Run one record's job on this thread.
pub(crate) fn execute(
    record: &Arc<TaskRecord>,
    env: &mut ExecEnv,
) {
    let Some(job) = record.take_job() else {
        return;
    };
    let ctx = TaskContext::new(record.clone());
    let start = Instant::now();
    trace!(task = %record.id(), name = record.name(), "executing");
    match record.kind() {
        JobKind::Sync => {
            let armed_here = env.clock().arm_if_idle();
            job(&ctx, env);
            if armed_here {
                env.clock().disarm();
            }
        },
        JobKind::Async => job(&ctx, env),
    }
    trace!(task = %record.id(), elapsed_us = start.elapsed().as_micros() as u64, "executed");
}

/// Worker thread main loop.
pub(crate) fn run_loop(
    shared: Arc<PoolShared>,
    cell: Arc<WorkerCell>,
    inbox: Receiver<WorkerCommand>,
) {
    CURRENT_WORKER.with(|local| {
        *local.borrow_mut() = Some(WorkerLocal {
            pool: shared.id(),
            shared: Arc::downgrade(&shared),
            cell: cell.clone(),
        });
    });
    cell.advance(LifecycleState::Running);
    debug!(worker = %cell.id(), "worker started");

    let mut env = ExecEnv::new(cell.clock().clone());
    shared.worker_ready(&cell);

    while let Ok(command) = inbox.recv() {
        match command {
            WorkerCommand::Terminate => break,
            WorkerCommand::Run(record) => {
                let start = Instant::now();
                execute(&record, &mut env);
                if !shared.worker_finished(&cell, &record, start.elapsed()) {
                    // Retired while running; the replacement owns the slot now.
                    break;
                }
            },
        }
    }

    cell.advance(LifecycleState::Terminating);
    cell.advance(LifecycleState::Terminated);
    CURRENT_WORKER.with(|local| local.borrow_mut().take());
    debug!(worker = %cell.id(), retired = cell.is_retired(), "worker stopped");
}
