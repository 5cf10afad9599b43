//! Action channel concurrency tests
//!
//! The channel is shared between the inbound message path and the actuator
//! task; these tests hammer it from plain threads to check that a pending
//! action is handed out exactly once no matter how writers and readers
//! interleave.

use device_agent::action::ActionChannel;
use device_agent::protocol::ActionKind;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_writers_leave_single_action() {
    let channel = Arc::new(ActionChannel::new());
    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    channel.set_action(ActionKind::TurnOn);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(channel.writes(), 800);
    assert_eq!(channel.take_action(), Some(ActionKind::TurnOn));
    for _ in 0..10 {
        assert_eq!(channel.take_action(), None);
    }
}

#[test]
fn test_concurrent_takers_see_action_once() {
    let channel = Arc::new(ActionChannel::new());
    let taken = Arc::new(AtomicUsize::new(0));
    let readers = 8;
    let barrier = Arc::new(Barrier::new(readers));

    channel.set_action(ActionKind::TurnOn);

    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let taken = Arc::clone(&taken);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    if channel.take_action().is_some() {
                        taken.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(taken.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interleaved_writers_and_readers_never_duplicate() {
    let channel = Arc::new(ActionChannel::new());
    let taken = Arc::new(AtomicUsize::new(0));

    let writer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for _ in 0..1000 {
                channel.set_action(ActionKind::TurnOn);
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let channel = Arc::clone(&channel);
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                for _ in 0..1000 {
                    if channel.take_action().is_some() {
                        taken.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    let leftover = usize::from(channel.take_action().is_some());

    // Every take corresponds to at least one distinct write
    let total = taken.load(Ordering::SeqCst) + leftover;
    assert!(total >= 1);
    assert!(total as u64 <= channel.writes());
    assert_eq!(channel.take_action(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_wakes_for_write_from_other_thread() {
    let channel = Arc::new(ActionChannel::new());
    let waiter = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.wait_action().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let writer = Arc::clone(&channel);
    thread::spawn(move || writer.set_action(ActionKind::TurnOn))
        .join()
        .unwrap();

    let kind = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, ActionKind::TurnOn);
    assert!(!channel.is_pending());
}

proptest! {
    #[test]
    fn prop_single_set_yields_exactly_once(takes in 1usize..50) {
        let channel = ActionChannel::new();
        channel.set_action(ActionKind::TurnOn);

        let results: Vec<_> = (0..takes).map(|_| channel.take_action()).collect();
        prop_assert_eq!(results[0], Some(ActionKind::TurnOn));
        prop_assert!(results[1..].iter().all(Option::is_none));
    }
}
