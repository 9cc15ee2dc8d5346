//! Envelope unit tests

use super::*;
use crate::runtime::error::EnvelopeError;
use parking_lot::Mutex;
use quickcheck::quickcheck;
use std::sync::atomic::Ordering;
use std::thread;

#[test]
fn test_copy_mode_is_independent() {
    let original = vec![1, 2, 3];
    let envelope = Envelope::copy(&original);
    assert_eq!(envelope.mode(), TransferMode::Copy);

    let mut received = thread::spawn(move || envelope.open()).join().unwrap();
    received.push(4);
    received[0] = 100;

    assert_eq!(original, vec![1, 2, 3]);
    assert_eq!(received, vec![100, 2, 3, 4]);
}

quickcheck! {
    fn prop_copy_receiver_mutation_never_reaches_sender(values: Vec<i32>, extra: i32) -> bool {
        let snapshot = values.clone();
        let envelope = Envelope::copy(&values);
        let mut received = envelope.open();
        received.push(extra);
        for v in received.iter_mut() {
            *v = v.wrapping_add(1);
        }
        values == snapshot && received.len() == values.len() + 1
    }
}

#[test]
fn test_move_mode_invalidates_sender() {
    let mut handle = MoveHandle::new(vec![0u8; 16]);
    assert_eq!(handle.get().unwrap().len(), 16);

    let envelope = handle.transfer().unwrap();
    assert_eq!(envelope.mode(), TransferMode::Move);
    assert_eq!(envelope.id(), handle.id());
    assert!(handle.is_transferred());

    assert_eq!(
        handle.get().unwrap_err(),
        EnvelopeError::TransferAfterMove { envelope: handle.id() }
    );
    assert!(handle.get_mut().is_err());
    assert!(matches!(
        handle.transfer(),
        Err(EnvelopeError::TransferAfterMove { .. })
    ));

    let mut buffer = thread::spawn(move || envelope.open()).join().unwrap();
    buffer[3] = 7;
    assert_eq!(buffer.len(), 16);
    assert_eq!(buffer[3], 7);
}

#[test]
fn test_move_handle_mutable_before_transfer() {
    let mut handle = MoveHandle::new(String::from("abc"));
    handle.get_mut().unwrap().push('d');
    let envelope = handle.transfer().unwrap();
    assert_eq!(envelope.open(), "abcd");
}

#[test]
fn test_shared_atomics_visible_across_threads() {
    let buffer = SharedAtomics::new(4);
    let envelope = Envelope::atomics(&buffer);
    assert_eq!(envelope.mode(), TransferMode::SharedAtomics);

    let remote = envelope.open();
    assert!(remote.ptr_eq(&buffer));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let view = Envelope::atomics(&buffer).open();
            thread::spawn(move || {
                for _ in 0..1000 {
                    view.fetch_add(0, 1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    remote.store(1, 42, Ordering::SeqCst);
    assert_eq!(buffer.load(0, Ordering::SeqCst), 4000);
    assert_eq!(buffer.load(1, Ordering::SeqCst), 42);
    assert_eq!(
        buffer.compare_exchange(1, 42, 7, Ordering::SeqCst, Ordering::SeqCst),
        Ok(42)
    );
    assert_eq!(remote.swap(1, 9, Ordering::SeqCst), 7);
    assert_eq!(buffer.len(), 4);
}

#[test]
#[should_panic]
fn test_shared_atomics_out_of_bounds_panics() {
    let buffer = SharedAtomics::new(1);
    buffer.load(1, Ordering::SeqCst);
}

#[test]
fn test_shared_ref_keeps_identity() {
    let shared = Shared::new(Mutex::new(Vec::<u32>::new()));
    let envelope = Envelope::shared(&shared);
    assert_eq!(envelope.mode(), TransferMode::SharedRef);

    let remote = envelope.open();
    assert!(remote.ptr_eq(&shared));
    assert_eq!(shared.holders(), 2);

    thread::spawn(move || remote.lock().push(5)).join().unwrap();

    assert_eq!(*shared.lock(), vec![5]);
    assert_eq!(shared.holders(), 1);
}

#[test]
fn test_shared_ref_outlives_sender() {
    let shared = Shared::new(String::from("kept"));
    let remote = Envelope::shared(&shared).open();
    drop(shared);
    assert_eq!(&*remote, "kept");
    assert_eq!(remote.holders(), 1);
}

#[test]
fn test_envelope_ids_are_unique() {
    let a = Envelope::copy(&1);
    let b = Envelope::copy(&1);
    assert_ne!(a.id(), b.id());
    assert!(format!("{}", a.id()).starts_with("Envelope("));
}
