//! Completion handles for submitted tasks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::task::{TaskId, TaskPriority, TaskRecord, TaskState};
use super::worker;
use crate::runtime::envelope::{Envelope, Transferred};
use crate::runtime::error::PoolError;

/// Failure path into a typed completion, used where `T` is erased.
pub(crate) trait Settle: Send + Sync {
    fn fail(
        &self,
        error: PoolError,
    );
}

struct Slot<T> {
    outcome: Option<Result<T, PoolError>>,
    settled: bool,
    waker: Option<Waker>,
}

/// One-shot result cell shared by the executing side and the handle.
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                outcome: None,
                settled: false,
                waker: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store the outcome. Values leave the worker in a move-mode envelope.
    pub(crate) fn settle(
        &self,
        outcome: Result<T, PoolError>,
    ) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.settled {
                return;
            }
            let outcome = outcome.map(|value| Envelope::<Transferred<T>>::moved(value).open());
            slot.outcome = Some(outcome);
            slot.settled = true;
            slot.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_settled(&self) -> bool {
        self.slot.lock().settled
    }

    fn take_if_settled(&self) -> Option<Result<T, PoolError>> {
        let mut slot = self.slot.lock();
        if !slot.settled {
            return None;
        }
        slot.outcome.take()
    }

    /// Block until settled or `deadline` passes.
    fn wait_until(
        &self,
        deadline: Option<Instant>,
    ) -> Option<Result<T, PoolError>> {
        let mut slot = self.slot.lock();
        while !slot.settled {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                },
                None => self.ready.wait(&mut slot),
            }
        }
        if !slot.settled {
            return None;
        }
        slot.outcome.take()
    }
}

impl<T: Send + 'static> Settle for Completion<T> {
    fn fail(
        &self,
        error: PoolError,
    ) {
        self.settle(Err(error));
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was still pending and will never run.
    Cancelled,
    /// The task had already started. Its cooperative flag is now set, but
    /// it keeps running until it notices or finishes.
    CancellationRace,
    /// The task had already reached a terminal state.
    AlreadySettled,
}

impl CancelOutcome {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self == CancelOutcome::Cancelled
    }
}

/// Caller's handle to a submitted task.
///
/// Wait with [`TaskHandle::join`] from synchronous code or `.await` it from
/// async code. Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    completion: Arc<Completion<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(
        record: Arc<TaskRecord>,
        completion: Arc<Completion<T>>,
    ) -> Self {
        Self { record, completion }
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

    #[inline]
    pub fn status(&self) -> TaskState {
        self.record.state()
    }

    /// Whether the outcome is available.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.is_settled()
    }

    /// Request cancellation.
    pub fn cancel(&self) -> CancelOutcome {
        let task = self.record.id();
        if self
            .record
            .abort(TaskState::Pending, PoolError::Cancelled { task })
        {
            tracing::debug!(%task, "cancelled pending task");
            return CancelOutcome::Cancelled;
        }
        match self.record.state() {
            TaskState::Running => {
                self.record.request_cancel();
                tracing::debug!(%task, "cancellation requested on running task");
                CancelOutcome::CancellationRace
            },
            _ => CancelOutcome::AlreadySettled,
        }
    }

    /// Block the calling thread until the task settles.
    ///
    /// Called from a worker of the same pool on a task that has not started,
    /// the worker runs that task itself instead of waiting for a free slot.
    /// Fails with [`PoolError::OutcomeTaken`] if the handle was already
    /// polled to completion.
    pub fn join(self) -> Result<T, PoolError> {
        worker::help_if_nested(&self.record);
        match self.completion.wait_until(None) {
            Some(outcome) => outcome,
            None => Err(PoolError::OutcomeTaken {
                task: self.record.id(),
            }),
        }
    }

    /// Like [`join`](Self::join) with an upper bound. Gives the handle back
    /// if the task has not settled in time.
    pub fn join_timeout(
        self,
        timeout: Duration,
    ) -> Result<Result<T, PoolError>, Self> {
        worker::help_if_nested(&self.record);
        match self.completion.wait_until(Some(Instant::now() + timeout)) {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }

    /// Take the outcome without blocking, or get the handle back.
    pub fn try_take(self) -> Result<Result<T, PoolError>, Self> {
        match self.completion.take_if_settled() {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }
}

impl<T: Send + 'static> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    /// Awaited from a worker of the same pool, a child that has not started
    /// runs inline here, as with [`join`](Self::join).
    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        worker::help_if_nested(&self.record);
        let mut slot = self.completion.slot.lock();
        if slot.settled {
            match slot.outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Ready(Err(PoolError::OutcomeTaken {
                    task: self.record.id(),
                })),
            }
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.record.id())
            .field("state", &self.record.state())
            .finish()
    }
}
