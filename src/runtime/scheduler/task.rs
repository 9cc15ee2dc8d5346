//! Task definitions for the pool.
//!
//! A [`Task`] is what callers build and submit. Once submitted it becomes a
//! type-erased `TaskRecord` owned jointly by the queue, the executing worker
//! and the caller's [`TaskHandle`](super::handle::TaskHandle).

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use parking_lot::Mutex;
use tokio::runtime::Builder as RuntimeBuilder;
use tracing::trace;

use super::handle::{Completion, Settle, TaskHandle};
use super::worker::{BusyClock, ExecEnv};
use super::{PoolId, SchedulerStats};
use crate::runtime::envelope::{Envelope, Payload};
use crate::runtime::error::{panic_message, PoolError};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error, a panic, a timeout or a lost worker.
    Failed,
    /// Cancelled before it started.
    Cancelled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Failed,
            _ => TaskState::Cancelled,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed => 2,
            TaskState::Failed => 3,
            TaskState::Cancelled => 4,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self -> next` respects monotonic progress.
    pub fn can_transition_to(
        &self,
        next: TaskState,
    ) -> bool {
        matches!(
            (*self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Pending, TaskState::Failed)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

/// Task priority levels. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub enum TaskPriority {
    /// Background work.
    Low = 0,
    /// Default priority.
    #[default]
    Medium = 1,
    /// Dispatched ahead of everything else.
    High = 2,
}

impl fmt::Display for TaskPriority {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        };
        f.write_str(name)
    }
}

/// Thread-safe task id source, one per pool.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    #[inline]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the body burns CPU for its whole run or suspends on I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Sync,
    Async,
}

pub(crate) type Job = Box<dyn FnOnce(&TaskContext, &mut ExecEnv) + Send>;

type SyncBody<T> = Box<dyn FnOnce(&TaskContext) -> anyhow::Result<T> + Send>;
type LocalFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>>>>;
type AsyncBody<T> = Box<dyn FnOnce(TaskContext) -> LocalFuture<T> + Send>;

enum Body<T> {
    Sync(SyncBody<T>),
    Async(AsyncBody<T>),
}

/// A unit of work waiting to be submitted.
///
/// ```no_run
/// use taskpool::{Task, TaskPool, TaskPriority};
///
/// let pool = TaskPool::new()?;
/// let handle = pool.submit(Task::new(TaskPriority::High, |_ctx| Ok(6 * 7)))?;
/// assert_eq!(handle.join()?, 42);
/// # Ok::<(), taskpool::PoolError>(())
/// ```
pub struct Task<T> {
    name: Option<String>,
    priority: TaskPriority,
    body: Body<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Synchronous task with no input.
    pub fn new<F>(
        priority: TaskPriority,
        body: F,
    ) -> Self
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            name: None,
            priority,
            body: Body::Sync(Box::new(body)),
        }
    }

    /// Synchronous task whose argument crosses into the worker in `input`.
    pub fn with_input<P, F>(
        priority: TaskPriority,
        input: Envelope<P>,
        body: F,
    ) -> Self
    where
        P: Payload,
        F: FnOnce(&TaskContext, P::Output) -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(priority, move |ctx| body(ctx, input.open()))
    }

    /// Asynchronous task. Only time spent inside `poll` counts against the
    /// synchronous execution limit.
    pub fn from_future<F, Fut>(
        priority: TaskPriority,
        body: F,
    ) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        Self {
            name: None,
            priority,
            body: Body::Async(Box::new(move |ctx| -> LocalFuture<T> { Box::pin(body(ctx)) })),
        }
    }

    /// Set a name used in logs.
    pub fn named(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Turn into a queued record plus the caller's handle.
    pub(crate) fn into_record(
        self,
        id: TaskId,
        pool: PoolId,
        stats: Arc<SchedulerStats>,
    ) -> (Arc<TaskRecord>, TaskHandle<T>) {
        let completion = Arc::new(Completion::<T>::new());
        let (kind, job) = match self.body {
            Body::Sync(body) => (JobKind::Sync, sync_job(body, completion.clone())),
            Body::Async(body) => (JobKind::Async, async_job(body, completion.clone())),
        };
        let settle: Arc<dyn Settle> = completion.clone();
        let record = Arc::new(TaskRecord {
            id,
            name: self.name.unwrap_or_else(|| id.to_string()),
            priority: self.priority,
            kind,
            pool,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            cancel_requested: AtomicBool::new(false),
            job: Mutex::new(Some(job)),
            settle,
            stats,
        });
        let handle = TaskHandle::new(record.clone(), completion);
        (record, handle)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let kind = match self.body {
            Body::Sync(_) => "sync",
            Body::Async(_) => "async",
        };
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("kind", &kind)
            .finish()
    }
}

fn capture<T>(
    task: TaskId,
    result: std::thread::Result<anyhow::Result<T>>,
) -> Result<T, PoolError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(PoolError::Failed { task, source }),
        Err(payload) => Err(PoolError::Panicked {
            task,
            message: panic_message(payload),
        }),
    }
}

fn sync_job<T: Send + 'static>(
    body: SyncBody<T>,
    completion: Arc<Completion<T>>,
) -> Job {
    Box::new(move |ctx: &TaskContext, _env: &mut ExecEnv| {
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(ctx)));
        ctx.finish(capture(ctx.id(), result), &completion);
    })
}

fn async_job<T: Send + 'static>(
    body: AsyncBody<T>,
    completion: Arc<Completion<T>>,
) -> Job {
    Box::new(move |ctx: &TaskContext, env: &mut ExecEnv| {
        let clock = env.clock().clone();
        if tokio::runtime::Handle::try_current().is_ok() {
            ctx.finish(run_beside(body, ctx, clock), &completion);
            return;
        }
        let outcome = match env.runtime() {
            Ok(runtime) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(TimedPoll {
                        inner: body(ctx.clone()),
                        clock,
                    })
                }));
                let panicked = result.is_err();
                let outcome = capture(ctx.id(), result);
                if panicked {
                    env.reset_runtime();
                }
                outcome
            },
            Err(err) => Err(PoolError::AsyncRuntime {
                task: ctx.id(),
                message: err.to_string(),
            }),
        };
        ctx.finish(outcome, &completion);
    })
}

/// Run an async body that was claimed inline by a worker already inside its
/// own runtime. A scoped helper thread drives the body while the worker
/// blocks on it, so the helper stands in for the worker's slot.
fn run_beside<T: Send + 'static>(
    body: AsyncBody<T>,
    ctx: &TaskContext,
    clock: Arc<BusyClock>,
) -> Result<T, PoolError> {
    let task = ctx.id();
    let ctx = ctx.clone();
    thread::scope(|scope| {
        let helper = thread::Builder::new()
            .name(format!("{}-inline", task))
            .spawn_scoped(scope, move || -> Result<T, PoolError> {
                let runtime = RuntimeBuilder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| PoolError::AsyncRuntime {
                        task,
                        message: err.to_string(),
                    })?;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(TimedPoll {
                        inner: body(ctx),
                        clock,
                    })
                }));
                capture(task, result)
            });
        match helper {
            Ok(helper) => helper.join().unwrap_or_else(|payload| {
                Err(PoolError::Panicked {
                    task,
                    message: panic_message(payload),
                })
            }),
            Err(err) => Err(PoolError::AsyncRuntime {
                task,
                message: err.to_string(),
            }),
        }
    })
}

/// Arms the worker's busy clock only while the inner future is being polled.
struct TimedPoll<T> {
    inner: LocalFuture<T>,
    clock: Arc<BusyClock>,
}

impl<T> Future for TimedPoll<T> {
    type Output = anyhow::Result<T>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let armed_here = self.clock.arm_if_idle();
        let poll = self.inner.as_mut().poll(cx);
        if armed_here {
            self.clock.disarm();
        }
        poll
    }
}

/// Type-erased submitted task.
pub(crate) struct TaskRecord {
    id: TaskId,
    name: String,
    priority: TaskPriority,
    kind: JobKind,
    pool: PoolId,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    job: Mutex<Option<Job>>,
    settle: Arc<dyn Settle>,
    stats: Arc<SchedulerStats>,
}

impl TaskRecord {
    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn priority(&self) -> TaskPriority {
        self.priority
    }

    #[inline]
    pub(crate) fn kind(&self) -> JobKind {
        self.kind
    }

    #[inline]
    pub(crate) fn pool(&self) -> PoolId {
        self.pool
    }

    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Compare-and-swap `from -> to`. Only one caller can win a given edge.
    pub(crate) fn transition(
        &self,
        from: TaskState,
        to: TaskState,
    ) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        let won = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            trace!(task = %self.id, ?from, ?to, "task transition");
            if to.is_terminal() {
                self.stats.record_settled(to);
            }
        }
        won
    }

    pub(crate) fn take_job(&self) -> Option<Job> {
        self.job.lock().take()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Settle from outside the body: cancellation, timeout, lost worker or
    /// shutdown. Returns whether this call won the transition.
    pub(crate) fn abort(
        &self,
        from: TaskState,
        error: PoolError,
    ) -> bool {
        let to = match &error {
            PoolError::Cancelled { .. } => TaskState::Cancelled,
            _ => TaskState::Failed,
        };
        if !self.transition(from, to) {
            return false;
        }
        drop(self.take_job());
        self.settle.fail(error);
        true
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("priority", &self.priority)
            .finish()
    }
}

/// View of the running task handed to its body.
#[derive(Clone)]
pub struct TaskContext {
    record: Arc<TaskRecord>,
}

impl TaskContext {
    pub(crate) fn new(record: Arc<TaskRecord>) -> Self {
        Self { record }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.record.name()
    }

    #[inline]
    pub fn priority(&self) -> TaskPriority {
        self.record.priority()
    }

    /// Cooperative cancellation flag. Long-running bodies should poll it.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.record.is_cancel_requested()
    }

    /// Write the body's outcome, unless the supervisor settled first.
    fn finish<T: Send + 'static>(
        &self,
        outcome: Result<T, PoolError>,
        completion: &Completion<T>,
    ) {
        let to = if outcome.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if self.record.transition(TaskState::Running, to) {
            completion.settle(outcome);
        } else {
            trace!(task = %self.id(), "outcome discarded, task already settled");
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
