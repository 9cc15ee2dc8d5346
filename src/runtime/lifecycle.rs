//! Lifecycle state machine shared by pool workers and dedicated channels.
//!
//! ```text
//! Created -> Running -> (Idle <-> Busy)* -> Terminating -> Terminated
//! ```
//!
//! `Terminated` is absorbing. Any state may move to `Terminating`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Execution-context lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, thread not yet started.
    Created,
    /// Thread started, not yet waiting for work.
    Running,
    /// Waiting for work.
    Idle,
    /// Executing a task or handling a message.
    Busy,
    /// Asked to stop; finishing current work.
    Terminating,
    /// Stopped.
    Terminated,
}

impl LifecycleState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::Idle,
            3 => LifecycleState::Busy,
            4 => LifecycleState::Terminating,
            _ => LifecycleState::Terminated,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            LifecycleState::Created => 0,
            LifecycleState::Running => 1,
            LifecycleState::Idle => 2,
            LifecycleState::Busy => 3,
            LifecycleState::Terminating => 4,
            LifecycleState::Terminated => 5,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(
        &self,
        next: LifecycleState,
    ) -> bool {
        use LifecycleState::*;
        match (*self, next) {
            (Terminated, _) => false,
            (Terminating, Terminated) => true,
            (Terminating, _) => false,
            (_, Terminating) => true,
            (Created, Running) => true,
            (Running, Idle) | (Running, Busy) => true,
            (Idle, Busy) | (Busy, Idle) => true,
            _ => false,
        }
    }

    /// Whether the context is between `Running` and `Terminating`.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            LifecycleState::Running | LifecycleState::Idle | LifecycleState::Busy
        )
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        *self == LifecycleState::Terminated
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Idle => "idle",
            LifecycleState::Busy => "busy",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding a [`LifecycleState`] and rejecting illegal moves.
#[derive(Debug)]
pub struct LifecycleCell {
    state: AtomicU8,
}

impl LifecycleCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Created.as_u8()),
        }
    }

    #[inline]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(
        &self,
        next: LifecycleState,
    ) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if !LifecycleState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}
