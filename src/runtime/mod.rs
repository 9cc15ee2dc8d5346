//! Runtime system
//!
//! This module contains the task pool, dedicated channels and the envelope
//! types that carry data between them.

pub mod channel;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
