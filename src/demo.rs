//! Small end-to-end scenarios driven by the `taskpool demo` command.
//!
//! Each scenario builds its own pool (or channel), runs to completion and
//! returns a [`DemoReport`] the CLI prints as text or JSON.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::runtime::channel::DedicatedChannel;
use crate::runtime::envelope::{Copied, Envelope};
use crate::runtime::scheduler::{PoolConfig, PoolStats, Task, TaskGroup, TaskPool, TaskPriority};

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub name: &'static str,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<PoolStats>,
}

impl DemoReport {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            lines: Vec::new(),
            stats: None,
        }
    }

    fn line(
        &mut self,
        line: impl Into<String>,
    ) {
        self.lines.push(line.into());
    }
}

/// One High task submitted behind nine Low ones on a single busy worker
/// still runs first.
pub fn priority(mut config: PoolConfig) -> Result<DemoReport> {
    config.pool_size = 1;
    let pool = TaskPool::with_config(config)?;
    let mut report = DemoReport::new("priority");

    let (started_tx, started_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let gate = pool.submit(
        Task::new(TaskPriority::Low, move |_| {
            started_tx.send(())?;
            release_rx.recv()?;
            Ok(String::from("gate"))
        })
        .named("gate"),
    )?;
    started_rx.recv().context("gate task never started")?;

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..9 {
        let order = order.clone();
        let label = format!("low-{}", i);
        handles.push(pool.submit(
            Task::new(TaskPriority::Low, move |ctx| {
                order.lock().push(ctx.name().to_string());
                Ok(())
            })
            .named(label),
        )?);
    }
    {
        let order = order.clone();
        handles.push(pool.submit(
            Task::new(TaskPriority::High, move |ctx| {
                order.lock().push(ctx.name().to_string());
                Ok(())
            })
            .named("high"),
        )?);
    }
    report.line(format!("queued behind gate: {}", pool.pending()));

    release_tx.send(())?;
    gate.join()?;
    for handle in handles {
        handle.join()?;
    }

    for (position, name) in order.lock().iter().enumerate() {
        report.line(format!("{:>2}: {}", position + 1, name));
    }
    pool.shutdown(true);
    report.stats = Some(pool.stats());
    Ok(report)
}

/// A group of three where the middle member fails. Results stay in
/// submission order and the failure does not affect its siblings.
pub fn group(config: PoolConfig) -> Result<DemoReport> {
    let pool = TaskPool::with_config(config)?;
    let mut report = DemoReport::new("group");

    let mut group = TaskGroup::new();
    group.add_task(Task::new(TaskPriority::Medium, |_| {
        std::thread::sleep(Duration::from_millis(20));
        Ok(1)
    }))?;
    group.add_task(Task::new(TaskPriority::Medium, |_| Err(anyhow!("member two failed"))))?;
    group.add_task(Task::new(TaskPriority::Medium, |_| Ok(3)))?;

    let handle = pool.submit_group(&mut group)?;
    report.line(format!("{} submitted with {} members", handle.id(), handle.len()));
    for (position, result) in handle.await_all().into_iter().enumerate() {
        match result {
            Ok(value) => report.line(format!("[{}] ok: {}", position, value)),
            Err(err) => {
                let origin = if err.is_machinery() { "pool" } else { "task" };
                report.line(format!("[{}] err ({}): {}", position, origin, err))
            },
        }
    }

    pool.shutdown(true);
    report.stats = Some(pool.stats());
    Ok(report)
}

/// Send `{a: 10, b: 20}` to a dedicated adder channel and read back 30.
pub fn channel() -> Result<DemoReport> {
    let mut report = DemoReport::new("channel");
    let mut adder =
        DedicatedChannel::<Copied<BTreeMap<String, i64>>, Copied<i64>>::create("adder", |scope| {
            for message in scope.receive() {
                let operands = message.open();
                let sum: i64 = operands.values().sum();
                if scope.post(Envelope::copy(&sum)).is_err() {
                    break;
                }
            }
        })?;

    let operands = BTreeMap::from([("a".to_string(), 10), ("b".to_string(), 20)]);
    adder.send(Envelope::copy(&operands))?;
    let sum = adder.receive_timeout(Duration::from_secs(5))?.open();
    report.line(format!("{} replied {}", adder.name(), sum));
    adder.terminate()?;
    report.line(format!("{} is {}", adder.id(), adder.state()));
    Ok(report)
}

/// Cancel one task before it starts and one while it runs.
pub fn cancel(mut config: PoolConfig) -> Result<DemoReport> {
    config.pool_size = 1;
    let pool = TaskPool::with_config(config)?;
    let mut report = DemoReport::new("cancel");

    let (started_tx, started_rx) = channel::bounded(1);
    let running = pool.submit(
        Task::new(TaskPriority::Medium, move |ctx| {
            started_tx.send(())?;
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut spins = 0u64;
            while !ctx.is_cancelled() {
                if Instant::now() > deadline {
                    bail!("cancellation never observed");
                }
                spins += 1;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(spins)
        })
        .named("spinner"),
    )?;
    started_rx.recv().context("spinner never started")?;

    let pending = pool.submit(Task::new(TaskPriority::Medium, |_| Ok(0u64)).named("never-runs"))?;
    report.line(format!("{}: {:?}", pending.name(), pending.cancel()));
    report.line(format!("{}: {:?}", running.name(), running.cancel()));

    match pending.join() {
        Ok(_) => report.line("never-runs: completed"),
        Err(err) => report.line(format!("never-runs: {}", err)),
    }
    let spins = running.join()?;
    report.line(format!("spinner stopped after {} checks", spins));

    pool.shutdown(true);
    report.stats = Some(pool.stats());
    info!(stats = ?report.stats, "cancel demo finished");
    Ok(report)
}
