//! taskpool
//!
//! A bounded, prioritized task pool for CPU-bound work, with barrier-style
//! task groups, cooperative cancellation, dedicated long-lived channels and
//! ownership envelopes that fix how data crosses between execution contexts.
//!
//! # Example
//!
//! ```no_run
//! use taskpool::{Task, TaskGroup, TaskPool, TaskPriority};
//!
//! fn main() -> anyhow::Result<()> {
//!     let pool = TaskPool::with_size(4)?;
//!
//!     let answer = pool.submit(Task::new(TaskPriority::High, |_ctx| Ok(6 * 7)))?;
//!     assert_eq!(answer.join()?, 42);
//!
//!     let mut group: TaskGroup<u64> = (1..=3)
//!         .map(|n| Task::new(TaskPriority::Medium, move |_ctx| Ok(n * n)))
//!         .collect();
//!     let squares = pool.submit_group(&mut group)?.await_all();
//!     assert_eq!(squares.len(), 3);
//!
//!     pool.shutdown(true);
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/taskpool")]
#![warn(rust_2018_idioms)]

pub mod demo;
pub mod runtime;
pub mod util;

// Re-exports
pub use runtime::channel::{ChannelId, ChannelScope, DedicatedChannel};
pub use runtime::envelope::{
    AtomicShared, Copied, Envelope, EnvelopeId, MoveHandle, Payload, Shared, SharedAtomics,
    SharedRef, TransferMode, Transferred,
};
pub use runtime::error::{ChannelError, EnvelopeError, PoolError};
pub use runtime::lifecycle::LifecycleState;
pub use runtime::scheduler::{
    CancelOutcome, GroupHandle, GroupId, PoolConfig, PoolStats, Task, TaskContext, TaskGroup,
    TaskHandle, TaskId, TaskPool, TaskPriority, TaskState, WorkerId, WorkerSnapshot,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "taskpool";
