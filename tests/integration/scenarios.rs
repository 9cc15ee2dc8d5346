//! End-to-end pool scenarios through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use crossbeam::channel;
use parking_lot::Mutex;
use taskpool::{
    CancelOutcome, PoolConfig, PoolError, Task, TaskGroup, TaskPool, TaskPriority, TaskState,
};

#[test]
fn test_high_priority_overtakes_queued_low() {
    let pool = TaskPool::with_size(1).unwrap();
    let (started_tx, started_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let gate = pool
        .submit(Task::new(TaskPriority::Low, move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(())
        }))
        .unwrap();
    started_rx.recv().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let submit = |priority: TaskPriority, label: String| {
        let order = order.clone();
        pool.submit(
            Task::new(priority, move |ctx| {
                order.lock().push(ctx.name().to_string());
                Ok(())
            })
            .named(label),
        )
        .unwrap()
    };
    let mut handles: Vec<_> = (0..9)
        .map(|i| submit(TaskPriority::Low, format!("low-{}", i)))
        .collect();
    handles.push(submit(TaskPriority::High, "high".to_string()));

    release_tx.send(()).unwrap();
    gate.join().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    let order = order.lock();
    assert_eq!(order.len(), 10);
    assert_eq!(order[0], "high");
    let lows: Vec<String> = (0..9).map(|i| format!("low-{}", i)).collect();
    assert_eq!(order[1..], lows[..]);
}

#[test]
fn test_group_ok_err_ok() {
    let pool = TaskPool::with_size(2).unwrap();
    let mut group = TaskGroup::new();
    group
        .add_task(Task::new(TaskPriority::Medium, |_| {
            thread::sleep(Duration::from_millis(30));
            Ok("first")
        }))
        .unwrap();
    group
        .add_task(Task::new(TaskPriority::Medium, |_| Err(anyhow!("second"))))
        .unwrap();
    group
        .add_task(Task::new(TaskPriority::Medium, |_| Ok("third")))
        .unwrap();

    let results = pool.submit_group(&mut group).unwrap().await_all();
    assert!(matches!(results[0], Ok("first")));
    match &results[1] {
        Err(PoolError::Failed { source, .. }) => assert_eq!(source.to_string(), "second"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(results[2], Ok("third")));
}

#[test]
fn test_concurrent_submitters_respect_bound() {
    let pool = Arc::new(TaskPool::with_size(4).unwrap());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let handles: Vec<_> = (0..10)
                    .map(|_| {
                        let running = running.clone();
                        let peak = peak.clone();
                        pool.submit(Task::new(TaskPriority::Medium, move |_| {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(2));
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }))
                        .unwrap()
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    let stats = pool.stats();
    assert_eq!(stats.submitted, 40);
    assert_eq!(stats.completed, 40);
}

#[test]
fn test_cancel_pending_never_runs() {
    let pool = TaskPool::with_size(1).unwrap();
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (started_tx, started_rx) = channel::bounded(1);
    let gate = pool
        .submit(Task::new(TaskPriority::High, move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(())
        }))
        .unwrap();
    started_rx.recv().unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let victim = pool
        .submit(Task::new(TaskPriority::High, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
    assert!(pool.cancel(&victim));
    release_tx.send(()).unwrap();
    gate.join().unwrap();
    pool.shutdown(true);

    assert_eq!(victim.status(), TaskState::Cancelled);
    assert!(matches!(victim.join(), Err(PoolError::Cancelled { .. })));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_running_is_a_race() {
    let pool = TaskPool::with_size(1).unwrap();
    let (started_tx, started_rx) = channel::bounded(1);
    let handle = pool
        .submit(Task::new(TaskPriority::Medium, move |ctx| {
            started_tx.send(()).unwrap();
            while !ctx.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            Err(anyhow!("stopped on request"))
        }))
        .unwrap();
    started_rx.recv().unwrap();

    assert_eq!(handle.cancel(), CancelOutcome::CancellationRace);
    let outcome: Result<(), PoolError> = handle.join();
    assert!(matches!(outcome, Err(PoolError::Failed { .. })));
}

#[test]
fn test_timeout_is_reported_per_task() {
    let pool = TaskPool::with_config(PoolConfig {
        pool_size: 2,
        max_sync_ms: 60,
        watchdog_interval_ms: 5,
        ..PoolConfig::default()
    })
    .unwrap();

    let slow = pool
        .submit(Task::new(TaskPriority::Medium, |_| {
            thread::sleep(Duration::from_millis(500));
            Ok("slow")
        }))
        .unwrap();
    let fast = pool
        .submit(Task::new(TaskPriority::Medium, |_| Ok("fast")))
        .unwrap();

    assert_eq!(fast.join().unwrap(), "fast");
    assert!(matches!(slow.join(), Err(PoolError::TaskTimeout { .. })));
    assert_eq!(pool.pool_size(), 2);
}

#[test]
fn test_shutdown_rejects_new_work() {
    let pool = TaskPool::with_size(2).unwrap();
    let handle = pool
        .submit(Task::new(TaskPriority::Low, |_| Ok(1)))
        .unwrap();
    pool.shutdown(true);
    assert_eq!(handle.join().unwrap(), 1);
    assert!(!pool.is_running());

    let mut group: TaskGroup<()> = TaskGroup::new();
    assert!(matches!(
        pool.submit_group(&mut group),
        Err(PoolError::PoolShutdown)
    ));
    assert!(!group.is_submitted());
}

#[tokio::test]
async fn test_async_task_awaited_from_async_caller() {
    let pool = TaskPool::with_size(2).unwrap();
    let handle = pool
        .submit(Task::from_future(TaskPriority::High, |ctx| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("{} done", ctx.name()))
        }))
        .unwrap();
    let id = handle.id();
    assert_eq!(handle.await.unwrap(), format!("{} done", id));
}
