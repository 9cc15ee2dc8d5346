//! Bounded priority task pool
//!
//! This module provides the [`TaskPool`], a fixed-size set of worker threads
//! fed from one priority queue. Tasks are dispatched by (priority, enqueue
//! order) to the least-loaded idle worker. A supervisor thread enforces the
//! synchronous execution limit and replaces workers that time out or die.

pub mod group;
pub mod handle;
pub mod queue;
mod supervisor;
pub mod task;
pub mod worker;

pub use group::{GroupHandle, GroupId, TaskGroup};
pub use handle::{CancelOutcome, TaskHandle};
pub use queue::PriorityTaskQueue;
pub use task::{Task, TaskContext, TaskId, TaskIdGenerator, TaskPriority, TaskState};
pub use worker::{WorkerId, WorkerSnapshot};

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::runtime::error::PoolError;
use crate::runtime::lifecycle::LifecycleState;
use task::TaskRecord;
use worker::{WorkerCell, WorkerCommand};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Pool({})", self.0)
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Never exceeded.
    pub pool_size: usize,
    /// Synchronous execution ceiling in milliseconds.
    pub max_sync_ms: u64,
    /// How often the supervisor checks workers, in milliseconds.
    pub watchdog_interval_ms: u64,
    /// Prefix for worker and supervisor thread names.
    pub thread_name_prefix: String,
    /// Worker thread stack size in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl PoolConfig {
    /// Config with `pool_size` workers and defaults elsewhere.
    pub fn with_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    #[inline]
    pub fn max_sync_duration(&self) -> Duration {
        Duration::from_millis(self.max_sync_ms)
    }

    #[inline]
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            pool_size: num_cpus,
            max_sync_ms: 3 * 60 * 1000,
            watchdog_interval_ms: 50,
            thread_name_prefix: "taskpool".to_string(),
            stack_size: None,
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    tasks_submitted: AtomicUsize,
    tasks_completed: AtomicUsize,
    tasks_failed: AtomicUsize,
    tasks_cancelled: AtomicUsize,
    tasks_timed_out: AtomicUsize,
    workers_lost: AtomicUsize,
    workers_replaced: AtomicUsize,
    total_exec_time_us: AtomicUsize,
    peak_parallelism: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub(crate) fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a task reaching a terminal state.
    pub(crate) fn record_settled(
        &self,
        state: TaskState,
    ) {
        let counter = match state {
            TaskState::Completed => &self.tasks_completed,
            TaskState::Failed => &self.tasks_failed,
            TaskState::Cancelled => &self.tasks_cancelled,
            TaskState::Pending | TaskState::Running => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_exec_time(
        &self,
        elapsed: Duration,
    ) {
        self.total_exec_time_us
            .fetch_add(elapsed.as_micros() as usize, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_timeout(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_worker_lost(&self) {
        self.workers_lost.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_worker_replaced(&self) {
        self.workers_replaced.fetch_add(1, Ordering::SeqCst);
    }

    /// Update parallelism.
    #[inline]
    pub(crate) fn update_parallelism(
        &self,
        current: usize,
    ) {
        loop {
            let peak = self.peak_parallelism.load(Ordering::SeqCst);
            if current <= peak {
                break;
            }
            if self
                .peak_parallelism
                .compare_exchange(peak, current, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.tasks_submitted.load(Ordering::SeqCst),
            completed: self.tasks_completed.load(Ordering::SeqCst),
            failed: self.tasks_failed.load(Ordering::SeqCst),
            cancelled: self.tasks_cancelled.load(Ordering::SeqCst),
            timed_out: self.tasks_timed_out.load(Ordering::SeqCst),
            workers_lost: self.workers_lost.load(Ordering::SeqCst),
            workers_replaced: self.workers_replaced.load(Ordering::SeqCst),
            total_exec_time_us: self.total_exec_time_us.load(Ordering::SeqCst),
            peak_running: self.peak_parallelism.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub workers_lost: usize,
    pub workers_replaced: usize,
    pub total_exec_time_us: usize,
    /// Highest number of workers simultaneously busy. Children run inline
    /// by a waiting parent share the parent's worker and are not counted.
    pub peak_running: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolPhase {
    Running,
    ShuttingDown,
    Stopped,
}

struct WorkerSlot {
    cell: Arc<WorkerCell>,
    inbox: Sender<WorkerCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

struct PoolState {
    phase: PoolPhase,
    queue: PriorityTaskQueue<Arc<TaskRecord>>,
    workers: IndexMap<WorkerId, WorkerSlot>,
    next_worker: u64,
}

impl PoolState {
    /// Tear down a pool that failed to start. Workers already spawned are
    /// told to exit so their threads drop the shared state.
    fn abort_startup(&mut self) {
        self.phase = PoolPhase::Stopped;
        for slot in self.workers.values() {
            let _ = slot.inbox.send(WorkerCommand::Terminate);
        }
    }

    fn prune(&mut self) {
        self.queue
            .discard_front_while(|record| record.state() != TaskState::Pending);
    }

    fn least_loaded_idle(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|slot| slot.cell.is_idle())
            .min_by_key(|slot| (slot.cell.load(), slot.cell.id()))
            .map(|slot| slot.cell.id())
    }

    fn busy_count(&self) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.cell.state() == LifecycleState::Busy)
            .count()
    }
}

/// State shared by the pool handle, its workers and its supervisor.
pub(crate) struct PoolShared {
    id: PoolId,
    config: PoolConfig,
    epoch: Instant,
    state: Mutex<PoolState>,
    settled: Condvar,
    stats: Arc<SchedulerStats>,
    task_ids: TaskIdGenerator,
}

impl PoolShared {
    #[inline]
    pub(crate) fn id(&self) -> PoolId {
        self.id
    }

    pub(crate) fn notify_settled(&self) {
        self.settled.notify_all();
    }

    /// Spawn one worker thread into `state`.
    fn spawn_worker(
        self: &Arc<Self>,
        state: &mut PoolState,
    ) -> io::Result<WorkerId> {
        let id = WorkerId(state.next_worker);
        state.next_worker += 1;

        let cell = Arc::new(WorkerCell::new(id, self.epoch));
        let (inbox, receiver) = channel::unbounded();

        let mut builder =
            thread::Builder::new().name(format!("{}-worker-{}", self.config.thread_name_prefix, id.0));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let shared = self.clone();
        let worker_cell = cell.clone();
        let thread = builder.spawn(move || worker::run_loop(shared, worker_cell, receiver))?;

        state.workers.insert(
            id,
            WorkerSlot {
                cell,
                inbox,
                thread: Some(thread),
            },
        );
        Ok(id)
    }

    /// Hand pending tasks to idle workers until one side runs out.
    fn dispatch(
        &self,
        state: &mut PoolState,
    ) {
        if state.phase == PoolPhase::Stopped {
            return;
        }
        loop {
            state.prune();
            if state.queue.is_empty() {
                break;
            }
            let Some(worker) = state.least_loaded_idle() else {
                break;
            };
            let Some(record) = state.queue.pop() else {
                break;
            };
            if !record.transition(TaskState::Pending, TaskState::Running) {
                continue;
            }
            let Some(slot) = state.workers.get(&worker) else {
                break;
            };
            debug!(task = %record.id(), %worker, priority = %record.priority(), "dispatch");
            slot.cell.begin(record.clone());
            if slot.inbox.send(WorkerCommand::Run(record.clone())).is_err() {
                // Inbox closed: the thread is gone. The supervisor replaces it.
                record.abort(
                    TaskState::Running,
                    PoolError::WorkerLost {
                        task: record.id(),
                        worker,
                    },
                );
            }
            self.stats.update_parallelism(state.busy_count());
        }
    }

    /// A worker thread finished starting up.
    pub(crate) fn worker_ready(
        &self,
        cell: &WorkerCell,
    ) {
        let mut state = self.state.lock();
        cell.advance(LifecycleState::Idle);
        self.dispatch(&mut state);
    }

    /// A worker finished its assignment. Returns false if the worker was
    /// retired meanwhile and must exit.
    pub(crate) fn worker_finished(
        &self,
        cell: &WorkerCell,
        record: &TaskRecord,
        elapsed: Duration,
    ) -> bool {
        let mut state = self.state.lock();
        if cell.is_retired() {
            return false;
        }
        debug!(task = %record.id(), worker = %cell.id(), state = ?record.state(), "task finished");
        cell.end();
        self.stats.record_exec_time(elapsed);
        self.dispatch(&mut state);
        drop(state);
        self.notify_settled();
        true
    }
}

/// Bounded priority task pool.
///
/// Create one explicitly and share it by reference or `Arc`; there is no
/// global instance. Dropping the pool shuts it down without draining.
///
/// `pool_size` bounds occupied workers, not tasks in the `Running` state. A
/// worker that joins or awaits a not-yet-started child of the same pool runs
/// the child inline, so parent and child are both `Running` on one worker.
pub struct TaskPool {
    shared: Arc<PoolShared>,
    supervisor: Mutex<Option<(Sender<()>, thread::JoinHandle<()>)>>,
}

impl TaskPool {
    /// Create a pool with the default configuration.
    #[inline]
    pub fn new() -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with `pool_size` workers.
    #[inline]
    pub fn with_size(pool_size: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::with_size(pool_size))
    }

    /// Create a pool with custom configuration.
    pub fn with_config(mut config: PoolConfig) -> Result<Self, PoolError> {
        config.pool_size = config.pool_size.max(1);
        let shared = Arc::new(PoolShared {
            id: PoolId::next(),
            epoch: Instant::now(),
            state: Mutex::new(PoolState {
                phase: PoolPhase::Running,
                queue: PriorityTaskQueue::new(),
                workers: IndexMap::with_capacity(config.pool_size),
                next_worker: 0,
            }),
            settled: Condvar::new(),
            stats: Arc::new(SchedulerStats::default()),
            task_ids: TaskIdGenerator::new(),
            config,
        });

        {
            let mut state = shared.state.lock();
            for _ in 0..shared.config.pool_size {
                if let Err(err) = shared.spawn_worker(&mut state) {
                    state.abort_startup();
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        let (stop, stop_rx) = channel::bounded(0);
        let supervisor = match supervisor::spawn(shared.clone(), stop_rx) {
            Ok(supervisor) => supervisor,
            Err(err) => {
                shared.state.lock().abort_startup();
                return Err(PoolError::Spawn(err));
            },
        };

        info!(
            pool = %shared.id,
            size = shared.config.pool_size,
            max_sync_ms = shared.config.max_sync_ms,
            "task pool started"
        );
        Ok(Self {
            shared,
            supervisor: Mutex::new(Some((stop, supervisor))),
        })
    }

    /// Submit a task. Never blocks on execution.
    pub fn submit<T: Send + 'static>(
        &self,
        task: Task<T>,
    ) -> Result<TaskHandle<T>, PoolError> {
        let mut state = self.shared.state.lock();
        if state.phase != PoolPhase::Running {
            return Err(PoolError::PoolShutdown);
        }
        let handle = self.enqueue(&mut state, task);
        self.shared.dispatch(&mut state);
        Ok(handle)
    }

    /// Submit every member of `group` at once. No member can start before
    /// all of them are queued.
    pub fn submit_group<T: Send + 'static>(
        &self,
        group: &mut TaskGroup<T>,
    ) -> Result<GroupHandle<T>, PoolError> {
        let mut state = self.shared.state.lock();
        if state.phase != PoolPhase::Running {
            return Err(PoolError::PoolShutdown);
        }
        let tasks = group.take_for_submission()?;
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| self.enqueue(&mut state, task))
            .collect();
        debug!(group = %group.id(), members = handles.len(), "group submitted");
        self.shared.dispatch(&mut state);
        Ok(GroupHandle::new(group.id(), handles))
    }

    fn enqueue<T: Send + 'static>(
        &self,
        state: &mut PoolState,
        task: Task<T>,
    ) -> TaskHandle<T> {
        let priority = task.priority();
        let (record, handle) = task.into_record(
            self.shared.task_ids.next(),
            self.shared.id,
            self.shared.stats.clone(),
        );
        debug!(task = %record.id(), name = record.name(), %priority, "task submitted");
        self.shared.stats.record_submitted();
        state.queue.push(record, priority);
        handle
    }

    /// Cancel a pending task. True only if it will never run.
    pub fn cancel<T: Send + 'static>(
        &self,
        handle: &TaskHandle<T>,
    ) -> bool {
        handle.cancel().is_cancelled()
    }

    /// Stop the pool.
    ///
    /// With `drain`, waits for every pending and running task to settle.
    /// Without it, pending tasks are cancelled at once and running ones are
    /// allowed to finish. Returns once the workers have exited. Calling it
    /// again is a no-op.
    pub fn shutdown(
        &self,
        drain: bool,
    ) {
        let own = worker::current_worker(self.shared.id);
        let threads = {
            let mut state = self.shared.state.lock();
            if state.phase != PoolPhase::Running {
                return;
            }
            state.phase = PoolPhase::ShuttingDown;
            info!(pool = %self.shared.id, drain, "task pool shutting down");

            if !drain {
                cancel_pending(&mut state);
            }

            loop {
                state.prune();
                let others = state
                    .workers
                    .keys()
                    .filter(|id| Some(**id) != own)
                    .count();
                if others == 0 && !state.queue.is_empty() {
                    // Nobody left to run what is queued.
                    cancel_pending(&mut state);
                }
                let busy = state.workers.values().any(|slot| {
                    Some(slot.cell.id()) != own && slot.cell.state() == LifecycleState::Busy
                });
                if state.queue.is_empty() && !busy {
                    break;
                }
                self.shared
                    .settled
                    .wait_for(&mut state, self.shared.config.watchdog_interval());
            }

            state.phase = PoolPhase::Stopped;
            let mut threads = Vec::with_capacity(state.workers.len());
            for (id, slot) in state.workers.iter_mut() {
                let _ = slot.inbox.send(WorkerCommand::Terminate);
                if Some(*id) != own {
                    threads.extend(slot.thread.take());
                }
            }
            threads
        };

        for thread in threads {
            if thread.join().is_err() {
                error!(pool = %self.shared.id, "worker thread panicked during shutdown");
            }
        }

        if let Some((stop, supervisor)) = self.supervisor.lock().take() {
            drop(stop);
            let _ = supervisor.join();
        }
        info!(pool = %self.shared.id, stats = ?self.stats(), "task pool stopped");
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.snapshot()
    }

    /// Number of tasks still waiting for a worker.
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .queue
            .iter()
            .filter(|record| record.state() == TaskState::Pending)
            .count()
    }

    /// Configured upper bound on workers.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether the pool still accepts submissions.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().phase == PoolPhase::Running
    }

    /// Current workers, in spawn order.
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        let state = self.shared.state.lock();
        state
            .workers
            .values()
            .map(|slot| slot.cell.snapshot())
            .collect()
    }
}

fn cancel_pending(state: &mut PoolState) {
    for record in state.queue.drain_ordered() {
        let task = record.id();
        if record.abort(TaskState::Pending, PoolError::Cancelled { task }) {
            debug!(%task, "pending task cancelled by shutdown");
        }
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("id", &self.shared.id)
            .field("pool_size", &self.shared.config.pool_size)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

#[cfg(test)]
mod tests;
