//! Dedicated channels working alongside a pool.

use std::collections::HashMap;
use std::time::Duration;

use taskpool::{
    ChannelError, Copied, DedicatedChannel, Envelope, LifecycleState, Task, TaskPool,
    TaskPriority,
};

type Request = HashMap<String, i64>;

fn adder() -> DedicatedChannel<Copied<Request>, Copied<i64>> {
    DedicatedChannel::<Copied<Request>, Copied<i64>>::create("adder", |scope| {
        for message in scope.receive() {
            let request = message.open();
            let sum = request["a"] + request["b"];
            if scope.post(Envelope::copy(&sum)).is_err() {
                break;
            }
        }
    })
    .unwrap()
}

#[test]
fn test_adder_replies_thirty() {
    let mut channel = adder();
    let request = HashMap::from([("a".to_string(), 10), ("b".to_string(), 20)]);
    channel.send(Envelope::copy(&request)).unwrap();
    assert_eq!(
        channel
            .receive_timeout(Duration::from_secs(5))
            .unwrap()
            .open(),
        30
    );
    channel.terminate().unwrap();
    assert_eq!(channel.state(), LifecycleState::Terminated);
}

#[test]
fn test_channel_outlives_pool_tasks() {
    let pool = TaskPool::with_size(2).unwrap();
    let mut channel = adder();

    // Pool tasks compute requests; the channel stays up across all of them.
    let handles: Vec<_> = (0..5i64)
        .map(|i| {
            pool.submit(Task::new(TaskPriority::Medium, move |_| {
                Ok(HashMap::from([("a".to_string(), i), ("b".to_string(), i * 10)]))
            }))
            .unwrap()
        })
        .collect();
    for handle in handles {
        let request = handle.join().unwrap();
        channel.send(Envelope::copy(&request)).unwrap();
    }
    pool.shutdown(true);

    let sums: Vec<i64> = (0..5)
        .map(|_| {
            channel
                .receive_timeout(Duration::from_secs(5))
                .unwrap()
                .open()
        })
        .collect();
    assert_eq!(sums, vec![0, 11, 22, 33, 44]);
    assert!(channel.state().is_live());

    channel.terminate().unwrap();
    assert!(matches!(
        channel.send(Envelope::copy(&HashMap::new())),
        Err(ChannelError::Terminated { .. })
    ));
}
