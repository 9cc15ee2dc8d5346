//! DedicatedChannel unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel as cb;

use crate::runtime::channel::DedicatedChannel;
use crate::runtime::envelope::{Copied, Envelope, MoveHandle, Transferred};
use crate::runtime::error::ChannelError;
use crate::runtime::lifecycle::LifecycleState;

type Adder = DedicatedChannel<Copied<HashMap<String, i64>>, Copied<i64>>;

fn adder() -> Adder {
    Adder::create("adder", |scope| {
        for message in scope.receive() {
            let operands = message.open();
            let sum = operands.get("a").copied().unwrap_or(0) + operands.get("b").copied().unwrap_or(0);
            scope.post(Envelope::copy(&sum)).unwrap();
        }
    })
    .unwrap()
}

fn operands(
    a: i64,
    b: i64,
) -> HashMap<String, i64> {
    HashMap::from([("a".to_string(), a), ("b".to_string(), b)])
}

#[test]
fn test_channel_sum_scenario() {
    let mut channel = adder();
    channel.send(Envelope::copy(&operands(10, 20))).unwrap();
    let reply = channel.receive_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reply.open(), 30);
    channel.terminate().unwrap();
}

#[test]
fn test_channel_fifo() {
    let mut channel = adder();
    for i in 0..20 {
        channel.send(Envelope::copy(&operands(i, 0))).unwrap();
    }
    let replies: Vec<i64> = (0..20)
        .map(|_| {
            channel
                .receive_timeout(Duration::from_secs(5))
                .unwrap()
                .open()
        })
        .collect();
    assert_eq!(replies, (0..20).collect::<Vec<_>>());
    channel.terminate().unwrap();
}

#[test]
fn test_terminate_drains_queued_messages() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let mut channel = DedicatedChannel::<Copied<u32>, Copied<u32>>::create("drain", move |scope| {
        for message in scope.receive() {
            std::thread::sleep(Duration::from_millis(2));
            counter.fetch_add(message.open() as usize, Ordering::SeqCst);
        }
    })
    .unwrap();
    for _ in 0..10 {
        channel.send(Envelope::copy(&1)).unwrap();
    }
    channel.terminate().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert_eq!(channel.state(), LifecycleState::Terminated);
}

#[test]
fn test_send_after_terminate_fails() {
    let mut channel = adder();
    let id = channel.id();
    channel.terminate().unwrap();
    assert!(channel.is_terminated());
    match channel.send(Envelope::copy(&operands(1, 2))) {
        Err(ChannelError::Terminated { channel }) => assert_eq!(channel, id),
        other => panic!("unexpected outcome: {:?}", other),
    }
    // Second terminate is a no-op.
    channel.terminate().unwrap();
}

#[test]
fn test_receive_ends_after_body_returns() {
    let mut channel = DedicatedChannel::<Copied<()>, Copied<u8>>::create("burst", |scope| {
        for i in 0..3 {
            scope.post(Envelope::copy(&i)).unwrap();
        }
    })
    .unwrap();
    let values: Vec<u8> = channel.receive().map(Envelope::open).collect();
    assert_eq!(values, vec![0, 1, 2]);
    assert!(matches!(
        channel.receive_timeout(Duration::from_millis(10)),
        Err(ChannelError::Terminated { .. })
    ));
    channel.terminate().unwrap();
}

#[test]
fn test_try_receive_and_timeout() {
    let mut channel = adder();
    assert!(channel.try_receive().is_none());
    assert!(matches!(
        channel.receive_timeout(Duration::from_millis(10)),
        Err(ChannelError::Timeout)
    ));
    channel.send(Envelope::copy(&operands(2, 3))).unwrap();
    let reply = channel.receive_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reply.open(), 5);
    channel.terminate().unwrap();
}

#[test]
fn test_on_message_handler() {
    let mut channel = adder();
    channel.send(Envelope::copy(&operands(1, 1))).unwrap();
    // Let the first reply land in the queue before the handler is set.
    let first = channel.receive_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.open(), 2);

    let (tx, rx) = cb::unbounded();
    channel.on_message(move |message| {
        tx.send(message.open()).unwrap();
    });
    channel.send(Envelope::copy(&operands(4, 5))).unwrap();
    channel.send(Envelope::copy(&operands(6, 7))).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 9);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 13);
    assert!(channel.try_receive().is_none());
    channel.terminate().unwrap();
}

#[test]
fn test_on_message_flushes_queued() {
    let (ready_tx, ready_rx) = cb::bounded(1);
    let mut channel = DedicatedChannel::<Copied<()>, Copied<u8>>::create("flush", move |scope| {
        scope.post(Envelope::copy(&7)).unwrap();
        scope.post(Envelope::copy(&8)).unwrap();
        ready_tx.send(()).unwrap();
        for _ in scope.receive() {}
    })
    .unwrap();
    ready_rx.recv().unwrap();

    let (tx, rx) = cb::unbounded();
    channel.on_message(move |message| tx.send(message.open()).unwrap());
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![7, 8]);
    assert!(channel.try_receive().is_none());
    channel.terminate().unwrap();
}

#[test]
fn test_body_panic_reported() {
    let mut channel = DedicatedChannel::<Copied<u8>, Copied<u8>>::create("fragile", |scope| {
        for message in scope.receive() {
            if message.open() == 0 {
                panic!("zero is not allowed");
            }
        }
    })
    .unwrap();
    channel.send(Envelope::copy(&0)).unwrap();
    match channel.terminate() {
        Err(ChannelError::Panicked { message, .. }) => assert_eq!(message, "zero is not allowed"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_move_envelope_through_channel() {
    let mut channel = DedicatedChannel::<Transferred<Vec<u8>>, Copied<usize>>::create("mover", |scope| {
        for message in scope.receive() {
            let bytes = message.open();
            scope.post(Envelope::copy(&bytes.len())).unwrap();
        }
    })
    .unwrap();
    let mut payload = MoveHandle::new(vec![1, 2, 3]);
    channel.send(payload.transfer().unwrap()).unwrap();
    assert!(payload.is_transferred());
    assert_eq!(
        channel
            .receive_timeout(Duration::from_secs(5))
            .unwrap()
            .open(),
        3
    );
    channel.terminate().unwrap();
}

#[test]
fn test_lifecycle_progression() {
    let channel = adder();
    assert_eq!(channel.name(), "adder");
    let mut state = channel.state();
    for _ in 0..200 {
        if state == LifecycleState::Idle {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
        state = channel.state();
    }
    assert_eq!(state, LifecycleState::Idle);
    // Dropping without terminate still stops the thread.
    drop(channel);
}
