//! Error taxonomy for the pool, envelopes and dedicated channels.

use std::time::Duration;

use thiserror::Error;

use crate::runtime::channel::ChannelId;
use crate::runtime::envelope::EnvelopeId;
use crate::runtime::scheduler::{GroupId, TaskId, WorkerId};

/// Errors delivered through a task's completion handle or returned by pool
/// operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A synchronous body ran past the configured ceiling.
    #[error("{task} exceeded the synchronous execution limit of {}ms", limit.as_millis())]
    TaskTimeout { task: TaskId, limit: Duration },

    /// The worker executing the task died or stopped responding.
    #[error("{task} was lost together with {worker}")]
    WorkerLost { task: TaskId, worker: WorkerId },

    /// Submission after `shutdown` has started.
    #[error("the pool has been shut down")]
    PoolShutdown,

    /// Mutation or resubmission of a group that was already submitted.
    #[error("{group} has already been submitted")]
    GroupAlreadySubmitted { group: GroupId },

    /// The task was cancelled before it started.
    #[error("{task} was cancelled")]
    Cancelled { task: TaskId },

    /// The body returned an error.
    #[error("{task} failed: {source}")]
    Failed {
        task: TaskId,
        #[source]
        source: anyhow::Error,
    },

    /// The body panicked.
    #[error("{task} panicked: {message}")]
    Panicked { task: TaskId, message: String },

    /// The handle's outcome was already taken by an earlier poll.
    #[error("the outcome of {task} was already taken")]
    OutcomeTaken { task: TaskId },

    /// The worker could not build the runtime for an async body.
    #[error("{task} could not start its async runtime: {message}")]
    AsyncRuntime { task: TaskId, message: String },

    /// A pool thread could not be spawned.
    #[error("failed to spawn pool thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl PoolError {
    /// Whether this error means the task never ran its body to completion
    /// because of pool machinery rather than its own code.
    pub fn is_machinery(&self) -> bool {
        matches!(
            self,
            PoolError::TaskTimeout { .. }
                | PoolError::WorkerLost { .. }
                | PoolError::PoolShutdown
                | PoolError::AsyncRuntime { .. }
                | PoolError::Spawn(_)
        )
    }
}

/// Errors raised by envelope handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The value behind a move handle was already transferred away.
    #[error("{envelope} was already transferred")]
    TransferAfterMove { envelope: EnvelopeId },
}

/// Errors raised by dedicated channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel no longer accepts messages.
    #[error("{channel} has been terminated")]
    Terminated { channel: ChannelId },

    /// The channel body panicked.
    #[error("{channel} body panicked: {message}")]
    Panicked { channel: ChannelId, message: String },

    /// The channel thread could not be spawned.
    #[error("failed to spawn channel thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// No message arrived within the requested time.
    #[error("timed out waiting for a channel message")]
    Timeout,
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
