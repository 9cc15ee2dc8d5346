//! Watchdog that retires stuck or dead workers.
//!
//! Every tick the supervisor looks at each worker:
//! - a synchronous stretch longer than the configured ceiling fails the
//!   in-flight tasks with `TaskTimeout`;
//! - a thread that exited on its own fails them with `WorkerLost`.
//!
//! Either way the worker is retired (never reused) and a fresh one takes its
//! place, so the pool keeps its size.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{error, warn};

use super::{PoolPhase, PoolShared, PoolState, TaskState, WorkerId};
use crate::runtime::error::PoolError;

#[derive(Debug, Clone, Copy)]
enum Casualty {
    Timeout(Duration),
    Lost,
}

pub(super) fn spawn(
    shared: Arc<PoolShared>,
    stop: Receiver<()>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-supervisor", shared.config.thread_name_prefix))
        .spawn(move || watch(shared, stop))
}

fn watch(
    shared: Arc<PoolShared>,
    stop: Receiver<()>,
) {
    let interval = shared.config.watchdog_interval();
    let limit = shared.config.max_sync_duration();

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {},
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut state = shared.state.lock();
        if state.phase == PoolPhase::Stopped {
            break;
        }

        let casualties: Vec<(WorkerId, Casualty)> = state
            .workers
            .iter()
            .filter_map(|(id, slot)| {
                if let Some(elapsed) = slot.cell.clock().elapsed() {
                    if elapsed > limit {
                        return Some((*id, Casualty::Timeout(limit)));
                    }
                }
                let exited = slot
                    .thread
                    .as_ref()
                    .is_some_and(|thread| thread.is_finished());
                exited.then_some((*id, Casualty::Lost))
            })
            .collect();

        if casualties.is_empty() {
            continue;
        }
        for (worker, casualty) in casualties {
            replace(&shared, &mut state, worker, casualty);
        }
        shared.dispatch(&mut state);
        drop(state);
        shared.notify_settled();
    }
}

fn replace(
    shared: &Arc<PoolShared>,
    state: &mut PoolState,
    worker: WorkerId,
    casualty: Casualty,
) {
    let Some(slot) = state.workers.shift_remove(&worker) else {
        return;
    };
    slot.cell.retire();
    if let Casualty::Lost = casualty {
        shared.stats.record_worker_lost();
    }

    for record in slot.cell.in_flight() {
        let task = record.id();
        let error = match casualty {
            Casualty::Timeout(limit) => PoolError::TaskTimeout { task, limit },
            Casualty::Lost => PoolError::WorkerLost { task, worker },
        };
        if record.abort(TaskState::Running, error) {
            warn!(%task, %worker, ?casualty, "in-flight task failed by supervisor");
            if let Casualty::Timeout(_) = casualty {
                shared.stats.record_timeout();
            }
        }
    }

    // Dropping the slot detaches a stuck thread; it exits on its own once
    // its body returns and it sees it was retired.
    drop(slot);

    match shared.spawn_worker(state) {
        Ok(replacement) => {
            shared.stats.record_worker_replaced();
            warn!(retired = %worker, %replacement, ?casualty, "worker replaced");
        },
        Err(err) => {
            error!(retired = %worker, error = %err, "failed to spawn replacement worker");
        },
    }
}
