//! File transfer entity
//!
//! Status changes are published through the transfer's [`Lifecycle`];
//! byte-count updates go through a separate progress broadcaster so that
//! status observers are not woken for every chunk.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::Result;
use crate::events::EventBroadcaster;
use crate::repository::TrackedEntity;
use crate::state::{EntityState, Lifecycle, TransitionPolicy};

/// Unique identifier for a file transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub String);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Status of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileTransferStatus {
    /// Offer sent or received, waiting for the other side
    Waiting,
    /// Bytes are flowing
    Active,
    Completed,
    Canceled,
    Declined,
    Failed,
}

impl fmt::Display for FileTransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileTransferStatus::Waiting => "WAITING",
            FileTransferStatus::Active => "ACTIVE",
            FileTransferStatus::Completed => "COMPLETED",
            FileTransferStatus::Canceled => "CANCELED",
            FileTransferStatus::Declined => "DECLINED",
            FileTransferStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

impl EntityState for FileTransferStatus {
    fn initial() -> Self {
        FileTransferStatus::Waiting
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileTransferStatus::Completed
                | FileTransferStatus::Canceled
                | FileTransferStatus::Declined
                | FileTransferStatus::Failed
        )
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (FileTransferStatus::Waiting, FileTransferStatus::Active) => true,
            (_, next) => next.is_terminal(),
        }
    }
}

/// Direction of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

/// Byte-count update for a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferProgressEvent {
    pub transfer_id: TransferId,
    pub transferred: u64,
    pub timestamp: DateTime<Utc>,
}

/// A live file transfer
#[derive(Debug)]
pub struct FileTransfer {
    id: TransferId,
    direction: TransferDirection,
    file_name: String,
    file_size: Option<u64>,
    transferred: AtomicU64,
    lifecycle: Lifecycle<FileTransferStatus>,
    progress: EventBroadcaster<FileTransferProgressEvent>,
}

impl FileTransfer {
    /// Create a transfer in `WAITING` with the lenient transition policy
    pub fn new(
        id: TransferId,
        direction: TransferDirection,
        file_name: impl Into<String>,
        file_size: Option<u64>,
    ) -> Self {
        Self::with_policy(id, direction, file_name, file_size, TransitionPolicy::default())
    }

    /// Create a transfer using an explicit transition policy
    pub fn with_policy(
        id: TransferId,
        direction: TransferDirection,
        file_name: impl Into<String>,
        file_size: Option<u64>,
        policy: TransitionPolicy,
    ) -> Self {
        let lifecycle = Lifecycle::new(format!("file transfer {}", id), policy);
        Self {
            id,
            direction,
            file_name: file_name.into(),
            file_size,
            transferred: AtomicU64::new(0),
            lifecycle,
            progress: EventBroadcaster::new("file-transfer-progress"),
        }
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Expected size in bytes, when the offer announced one
    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    /// Bytes transferred so far
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    /// Current status
    pub fn status(&self) -> FileTransferStatus {
        self.lifecycle.state()
    }

    /// Report a new status from the protocol layer
    ///
    /// Returns `Ok(false)` if the transfer already has that status. An
    /// incoming transfer reported `COMPLETED` with fewer bytes than the
    /// announced size is recorded as `CANCELED`, since only part of the file
    /// arrived.
    pub fn set_status(&self, status: FileTransferStatus, reason: Option<String>) -> Result<bool> {
        // The partial-file check must see the byte count the status applies to
        self.lifecycle.exclusive(|_| {
            let (status, reason) = self.reconcile_completion(status, reason);
            self.lifecycle.transition_with_reason(status, reason)
        })
    }

    fn reconcile_completion(
        &self,
        status: FileTransferStatus,
        reason: Option<String>,
    ) -> (FileTransferStatus, Option<String>) {
        if status != FileTransferStatus::Completed || self.direction != TransferDirection::Incoming {
            return (status, reason);
        }
        match self.file_size {
            Some(expected) if expected > 0 && self.transferred_bytes() < expected => {
                let received = self.transferred_bytes();
                info!(
                    transfer_id = %self.id,
                    received,
                    expected,
                    "Partial file received, recording transfer as canceled"
                );
                (
                    FileTransferStatus::Canceled,
                    Some(reason.unwrap_or_else(|| {
                        format!("partial file received: {} of {} bytes", received, expected)
                    })),
                )
            }
            _ => (status, reason),
        }
    }

    /// Record the total number of bytes transferred so far
    ///
    /// Publishes a progress event only when the count changed and the
    /// transfer has not finished. Returns whether an event was published.
    /// Runs under the transfer's delivery lock, so no progress event is
    /// published after its terminal status.
    pub fn update_progress(&self, transferred: u64) -> bool {
        self.lifecycle.exclusive(|status| {
            if status.is_terminal() {
                return false;
            }
            let previous = self.transferred.swap(transferred, Ordering::AcqRel);
            if previous == transferred {
                return false;
            }

            debug!(transfer_id = %self.id, transferred, "Transfer progress");
            self.progress.broadcast(&FileTransferProgressEvent {
                transfer_id: self.id.clone(),
                transferred,
                timestamp: Utc::now(),
            });
            true
        })
    }

    /// Status change plumbing for this transfer
    pub fn lifecycle(&self) -> &Lifecycle<FileTransferStatus> {
        &self.lifecycle
    }

    /// Broadcaster for byte-count updates
    pub fn progress_events(&self) -> &EventBroadcaster<FileTransferProgressEvent> {
        &self.progress
    }
}

impl TrackedEntity for FileTransfer {
    type State = FileTransferStatus;

    fn lifecycle(&self) -> &Lifecycle<FileTransferStatus> {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateChange;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn incoming(size: Option<u64>) -> FileTransfer {
        FileTransfer::new(TransferId::from("ft-1"), TransferDirection::Incoming, "photo.jpg", size)
    }

    #[test]
    fn test_status_table() {
        use FileTransferStatus::*;

        assert!(Waiting.can_transition_to(&Active));
        assert!(Waiting.can_transition_to(&Declined));
        assert!(Active.can_transition_to(&Completed));
        assert!(Active.can_transition_to(&Failed));
        assert!(!Active.can_transition_to(&Waiting));
        assert!(!Completed.can_transition_to(&Failed));
        for terminal in [Completed, Canceled, Declined, Failed] {
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_status_changes_are_published_once() {
        let transfer = incoming(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transfer.lifecycle().listeners().subscribe_fn(
            move |change: &StateChange<FileTransferStatus>| sink.lock().push(change.new_state),
        );

        assert!(transfer.set_status(FileTransferStatus::Active, None).unwrap());
        assert!(!transfer.set_status(FileTransferStatus::Active, None).unwrap());
        assert!(transfer.set_status(FileTransferStatus::Completed, None).unwrap());

        assert_eq!(
            *seen.lock(),
            vec![FileTransferStatus::Active, FileTransferStatus::Completed]
        );
    }

    #[test]
    fn test_partial_incoming_file_is_canceled() {
        let transfer = incoming(Some(1000));
        transfer.set_status(FileTransferStatus::Active, None).unwrap();
        transfer.update_progress(400);

        transfer.set_status(FileTransferStatus::Completed, None).unwrap();

        assert_eq!(transfer.status(), FileTransferStatus::Canceled);
    }

    #[test]
    fn test_full_incoming_file_completes() {
        let transfer = incoming(Some(1000));
        transfer.set_status(FileTransferStatus::Active, None).unwrap();
        transfer.update_progress(1000);

        transfer.set_status(FileTransferStatus::Completed, None).unwrap();

        assert_eq!(transfer.status(), FileTransferStatus::Completed);
    }

    #[test]
    fn test_progress_deduplicates_and_stops_after_terminal() {
        let transfer = incoming(Some(10));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transfer
            .progress_events()
            .subscribe_fn(move |event: &FileTransferProgressEvent| sink.lock().push(event.transferred));

        assert!(transfer.update_progress(4));
        assert!(!transfer.update_progress(4));
        assert!(transfer.update_progress(10));
        transfer.set_status(FileTransferStatus::Completed, None).unwrap();
        assert!(!transfer.update_progress(12));

        assert_eq!(*seen.lock(), vec![4, 10]);
        assert_eq!(transfer.transferred_bytes(), 10);
    }

    #[test]
    fn test_no_progress_after_concurrent_completion() {
        let transfer = Arc::new(incoming(None));
        transfer.set_status(FileTransferStatus::Active, None).unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        transfer.lifecycle().listeners().subscribe_fn(
            move |change: &StateChange<FileTransferStatus>| {
                if change.is_terminal() {
                    sink.lock().push("end");
                }
            },
        );
        let sink = log.clone();
        let watched = Arc::downgrade(&transfer);
        transfer
            .progress_events()
            .subscribe_fn(move |_: &FileTransferProgressEvent| {
                let finished = watched.upgrade().is_some_and(|t| t.status().is_terminal());
                sink.lock().push(if finished { "progress-after-end" } else { "progress" });
            });

        let updater = {
            let transfer = transfer.clone();
            thread::spawn(move || {
                for bytes in 1..=5_000 {
                    transfer.update_progress(bytes);
                }
            })
        };
        let finisher = {
            let transfer = transfer.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(1));
                transfer.set_status(FileTransferStatus::Completed, None).unwrap();
            })
        };
        updater.join().unwrap();
        finisher.join().unwrap();

        let log = log.lock();
        assert!(!log.contains(&"progress-after-end"));
        if let Some(end) = log.iter().position(|entry| *entry == "end") {
            assert!(log[end + 1..].is_empty());
        }
    }
}
