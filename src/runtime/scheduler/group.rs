//! Task groups: all-settled barriers over several tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::handle::TaskHandle;
use super::task::{Task, TaskId, TaskState};
use crate::runtime::error::PoolError;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        Self(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Group({})", self.0)
    }
}

/// Tasks collected for joint submission with
/// [`TaskPool::submit_group`](super::TaskPool::submit_group).
///
/// Results come back in the order tasks were added, whatever order they
/// finish in. One member failing does not affect the others.
pub struct TaskGroup<T> {
    id: GroupId,
    tasks: Vec<Task<T>>,
    submitted: bool,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            id: GroupId::next(),
            tasks: Vec::new(),
            submitted: false,
        }
    }

    /// Append a member. Fails once the group has been submitted.
    pub fn add_task(
        &mut self,
        task: Task<T>,
    ) -> Result<(), PoolError> {
        if self.submitted {
            return Err(PoolError::GroupAlreadySubmitted { group: self.id });
        }
        self.tasks.push(task);
        Ok(())
    }

    #[inline]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[inline]
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub(crate) fn take_for_submission(&mut self) -> Result<Vec<Task<T>>, PoolError> {
        if self.submitted {
            return Err(PoolError::GroupAlreadySubmitted { group: self.id });
        }
        self.submitted = true;
        Ok(std::mem::take(&mut self.tasks))
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> FromIterator<Task<T>> for TaskGroup<T> {
    fn from_iter<I: IntoIterator<Item = Task<T>>>(iter: I) -> Self {
        Self {
            id: GroupId::next(),
            tasks: iter.into_iter().collect(),
            submitted: false,
        }
    }
}

impl<T> fmt::Debug for TaskGroup<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id)
            .field("members", &self.tasks.len())
            .field("submitted", &self.submitted)
            .finish()
    }
}

/// Handle to a submitted group.
pub struct GroupHandle<T> {
    id: GroupId,
    handles: Vec<TaskHandle<T>>,
}

impl<T: Send + 'static> GroupHandle<T> {
    pub(crate) fn new(
        id: GroupId,
        handles: Vec<TaskHandle<T>>,
    ) -> Self {
        Self { id, handles }
    }

    #[inline]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Member task ids in submission order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.handles.iter().map(TaskHandle::id).collect()
    }

    /// Member states in submission order.
    pub fn statuses(&self) -> Vec<TaskState> {
        self.handles.iter().map(TaskHandle::status).collect()
    }

    /// Cancel every member that has not started. Returns how many were
    /// cancelled.
    pub fn cancel_all(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| handle.cancel().is_cancelled())
            .count()
    }

    /// Block until every member settles. Position `i` holds member `i`'s
    /// outcome.
    pub fn await_all(self) -> Vec<Result<T, PoolError>> {
        self.handles.into_iter().map(TaskHandle::join).collect()
    }

    /// Async form of [`await_all`](Self::await_all).
    pub async fn settled(self) -> Vec<Result<T, PoolError>> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            outcomes.push(handle.await);
        }
        outcomes
    }
}

impl<T> fmt::Debug for GroupHandle<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.id)
            .field("members", &self.handles.len())
            .finish()
    }
}
