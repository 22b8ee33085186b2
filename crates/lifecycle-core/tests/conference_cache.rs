//! Concurrency tests for the conference description cache

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use lifecycle_core::*;

fn announcement(call_id: &str) -> ConferenceDescription {
    ConferenceDescription::new("xmpp:host@example.org/conf", Some(call_id.to_string()))
        .with_transport("urn:xmpp:jingle:transports:ice-udp:1")
}

#[test]
fn test_racing_announcements_accept_exactly_one() {
    let cache = Arc::new(ConferenceDescriptionCache::new());
    let published = Arc::new(AtomicUsize::new(0));
    let counter = published.clone();
    cache.listeners().subscribe_fn(move |event: &ConferencePublishedEvent| {
        if event.kind == PublicationKind::Received {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let participant = ParticipantKey::new("room@conference.example.org", "host");
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = cache.clone();
            let participant = participant.clone();
            thread::spawn(move || cache.process_announcement(announcement(&format!("call-{}", i)), &participant))
        })
        .collect();
    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|accepted| *accepted)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(cache.cached_count(), 1);
    assert_eq!(published.load(Ordering::SeqCst), 1);
}

#[test]
fn test_racing_withdrawals_remove_once() {
    let cache = Arc::new(ConferenceDescriptionCache::new());
    let participant = ParticipantKey::new("room@conference.example.org", "host");
    assert!(cache.process_announcement(announcement("A"), &participant));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let participant = participant.clone();
            thread::spawn(move || cache.process_announcement(announcement("A").withdrawn(), &participant))
        })
        .collect();
    let removed = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|removed| *removed)
        .count();

    assert_eq!(removed, 1);
    assert_eq!(cache.cached_count(), 0);
}

#[test]
fn test_stale_withdrawal_keeps_newer_announcement() {
    let cache = ConferenceDescriptionCache::new();
    let participant = ParticipantKey::new("room@conference.example.org", "host");

    cache.process_announcement(announcement("old"), &participant);
    cache.process_announcement(announcement("old").withdrawn(), &participant);
    cache.process_announcement(announcement("new"), &participant);

    // The server replays the first withdrawal
    assert!(!cache.process_announcement(announcement("old").withdrawn(), &participant));
    let cached = cache.get_cached_descriptions();
    assert_eq!(
        cached["room@conference.example.org/host"].call_id.as_deref(),
        Some("new")
    );
}

#[test]
fn test_clear_room_counts_only_its_own_entries_under_concurrent_inserts() {
    let cache = Arc::new(ConferenceDescriptionCache::new());
    for i in 0..50 {
        let participant = ParticipantKey::new("cleared@conference.example.org", format!("user-{}", i));
        assert!(cache.process_announcement(announcement(&format!("old-{}", i)), &participant));
    }

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let participant = ParticipantKey::new("busy@conference.example.org", format!("user-{}", i));
                cache.process_announcement(announcement(&format!("new-{}", i)), &participant);
            }
        })
    };
    let removed = cache.clear_room("cleared@conference.example.org");
    writer.join().unwrap();

    assert_eq!(removed, 50);
    assert_eq!(cache.cached_count(), 200);
}
