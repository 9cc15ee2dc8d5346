//! Envelopes crossing into pool workers.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use taskpool::{
    Envelope, EnvelopeError, MoveHandle, Shared, SharedAtomics, Task, TaskPool, TaskPriority,
    TransferMode,
};

#[derive(Debug, Clone, PartialEq)]
struct Config {
    name: String,
    weights: Vec<f64>,
}

#[test]
fn test_copy_is_independent_of_sender() {
    let pool = TaskPool::with_size(1).unwrap();
    let original = Config {
        name: "base".to_string(),
        weights: vec![1.0, 2.0],
    };
    let envelope = Envelope::copy(&original);
    assert_eq!(envelope.mode(), TransferMode::Copy);

    let handle = pool
        .submit(Task::with_input(
            TaskPriority::Medium,
            envelope,
            |_, mut config: Config| {
                config.name.push_str("-modified");
                config.weights.clear();
                Ok(config)
            },
        ))
        .unwrap();
    let returned = handle.join().unwrap();

    assert_eq!(returned.name, "base-modified");
    assert!(returned.weights.is_empty());
    assert_eq!(original.name, "base");
    assert_eq!(original.weights, vec![1.0, 2.0]);
}

#[test]
fn test_move_invalidates_sender() {
    let pool = TaskPool::with_size(1).unwrap();
    let mut handle = MoveHandle::new(vec![1u8; 1024]);
    let envelope = handle.transfer().unwrap();
    assert_eq!(envelope.mode(), TransferMode::Move);
    assert_eq!(envelope.id(), handle.id());

    let task = pool
        .submit(Task::with_input(
            TaskPriority::Medium,
            envelope,
            |_, bytes: Vec<u8>| Ok(bytes.len()),
        ))
        .unwrap();
    assert_eq!(task.join().unwrap(), 1024);

    let expected = EnvelopeError::TransferAfterMove {
        envelope: handle.id(),
    };
    assert_eq!(handle.get().unwrap_err(), expected);
    assert_eq!(handle.transfer().unwrap_err(), expected);
}

#[test]
fn test_shared_atomics_visible_across_workers() {
    let pool = TaskPool::with_size(4).unwrap();
    let counters = SharedAtomics::new(2);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            pool.submit(Task::with_input(
                TaskPriority::Medium,
                Envelope::atomics(&counters),
                |_, counters: SharedAtomics| {
                    for _ in 0..100 {
                        counters.fetch_add(0, 1, Ordering::SeqCst);
                    }
                    counters.fetch_add(1, 1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counters.load(0, Ordering::SeqCst), 800);
    assert_eq!(counters.load(1, Ordering::SeqCst), 8);
}

#[test]
fn test_shared_reference_keeps_identity() {
    let pool = TaskPool::with_size(2).unwrap();
    let log = Shared::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let sender_side = log.clone();
            pool.submit(Task::with_input(
                TaskPriority::Medium,
                Envelope::shared(&log),
                move |_, received: Shared<Mutex<Vec<i32>>>| {
                    received.lock().unwrap().push(i);
                    Ok(received.ptr_eq(&sender_side))
                },
            ))
            .unwrap()
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let mut entries = log.lock().unwrap().clone();
    entries.sort();
    assert_eq!(entries, vec![0, 1, 2, 3]);
}
