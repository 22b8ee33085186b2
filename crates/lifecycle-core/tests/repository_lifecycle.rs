//! End-to-end tests for entity tracking
//!
//! These tests verify:
//! - The add / progress / end scenario as seen by repository listeners
//! - Exactly one end notification per entity under concurrency
//! - Termination signals observed from async code

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lifecycle_core::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn describe(event: &RepositoryEvent<CallId, Call>) -> String {
    match event {
        RepositoryEvent::Added { key, .. } => format!("added {}", key),
        RepositoryEvent::StateChanged { key, change, .. } => format!("changed {} {}", key, change.new_state),
        RepositoryEvent::Ended { key, entity, .. } => format!("ended {} {}", key, entity.state()),
    }
}

#[test]
fn test_call_scenario_from_add_to_end() {
    let calls = ActiveCallsRepository::new("calls");
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    calls
        .listeners()
        .subscribe_fn(move |event: &RepositoryEvent<CallId, Call>| sink.lock().push(describe(event)));

    assert_eq!(calls.count(), 0);

    let call = Arc::new(Call::new(CallId::from("call-1"), CallDirection::Incoming));
    calls.add(CallId::from("call-1"), call.clone()).unwrap();
    assert_eq!(calls.count(), 1);

    call.set_state(CallState::InProgress).unwrap();
    assert_eq!(calls.count(), 1);

    call.set_state(CallState::Ended).unwrap();
    assert_eq!(calls.count(), 0);
    assert!(calls.snapshot().is_empty());

    assert_eq!(
        *log.lock(),
        vec![
            "added call-1".to_string(),
            "changed call-1 IN_PROGRESS".to_string(),
            "ended call-1 ENDED".to_string(),
        ]
    );
}

#[test]
fn test_concurrent_calls_each_end_once() {
    const THREADS: usize = 8;
    const CALLS_PER_THREAD: usize = 50;

    let coordinator = Arc::new(LifecycleCoordinator::new(LifecycleConfig::default()).unwrap());
    let ended = Arc::new(Mutex::new(Vec::new()));
    let sink = ended.clone();
    coordinator
        .calls()
        .listeners()
        .subscribe_fn(move |event: &RepositoryEvent<CallId, Call>| {
            if let RepositoryEvent::Ended { key, .. } = event {
                sink.lock().push(key.clone());
            }
        });

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                for i in 0..CALLS_PER_THREAD {
                    let id = CallId::from(format!("call-{}-{}", t, i));
                    let call = coordinator.create_call_with_id(id, CallDirection::Outgoing).unwrap();
                    call.set_state(CallState::InProgress).unwrap();

                    // A second driver races to end the same call
                    let racer = call.clone();
                    let other = thread::spawn(move || {
                        racer.set_state(CallState::Ended).unwrap();
                    });
                    call.set_state(CallState::Ended).unwrap();
                    other.join().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut ended = ended.lock().clone();
    assert_eq!(ended.len(), THREADS * CALLS_PER_THREAD);
    ended.sort();
    ended.dedup();
    assert_eq!(ended.len(), THREADS * CALLS_PER_THREAD);

    let stats = coordinator.calls().stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total_added, (THREADS * CALLS_PER_THREAD) as u64);
    assert_eq!(stats.total_ended, (THREADS * CALLS_PER_THREAD) as u64);
}

#[test]
fn test_ended_event_carries_final_file_transfer_state() {
    let transfers = ActiveFileTransfers::new("transfers");
    let finals = Arc::new(Mutex::new(Vec::new()));
    let sink = finals.clone();
    transfers
        .listeners()
        .subscribe_fn(move |event: &RepositoryEvent<TransferId, FileTransfer>| {
            if let RepositoryEvent::Ended { entity, .. } = event {
                sink.lock().push((entity.status(), entity.transferred_bytes()));
            }
        });

    let transfer = Arc::new(FileTransfer::new(
        TransferId::from("ft-9"),
        TransferDirection::Incoming,
        "notes.pdf",
        Some(2048),
    ));
    transfers.add(TransferId::from("ft-9"), transfer.clone()).unwrap();
    transfer.set_status(FileTransferStatus::Active, None).unwrap();
    transfer.update_progress(512);
    transfer.set_status(FileTransferStatus::Completed, None).unwrap();

    assert_eq!(*finals.lock(), vec![(FileTransferStatus::Canceled, 512)]);
    assert!(transfers.is_empty());
}

#[tokio::test]
async fn test_await_call_termination() {
    let coordinator = LifecycleCoordinator::new(LifecycleConfig::default()).unwrap();
    let call = coordinator.create_call(CallDirection::Incoming).unwrap();

    let driver = call.clone();
    let hangup = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        driver.set_state(CallState::Ended).unwrap();
    });

    tokio::time::timeout(Duration::from_secs(5), call.lifecycle().termination().wait_async())
        .await
        .expect("call should terminate");
    hangup.join().unwrap();

    assert!(call.is_ended());
    assert_eq!(coordinator.calls().count(), 0);
}
