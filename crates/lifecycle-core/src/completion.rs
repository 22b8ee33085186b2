//! Single-shot completion signal
//!
//! A `Completion` starts pending and can be completed exactly once. Waiters
//! either block on a condition variable (the predicate is re-checked under
//! the same lock, so spurious wakeups are harmless) or await a
//! `tokio::sync::watch` channel from async code.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

/// One-shot "done" flag shared between a producer and any number of waiters
#[derive(Debug)]
pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
    notify: watch::Sender<bool>,
}

impl Completion {
    /// Create a pending completion
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
            notify,
        }
    }

    /// Mark the completion as done and wake every waiter
    ///
    /// Returns `true` only for the call that actually completed it.
    pub fn complete(&self) -> bool {
        let mut done = self.done.lock();
        if *done {
            return false;
        }
        *done = true;
        self.cond.notify_all();
        drop(done);

        self.notify.send_replace(true);
        true
    }

    /// Whether `complete` has been called
    pub fn is_complete(&self) -> bool {
        *self.done.lock()
    }

    /// Block the current thread until completed
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Block until completed or until `timeout` elapses
    ///
    /// Returns `true` if the completion happened.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    /// Wait asynchronously until completed
    pub async fn wait_async(&self) {
        let mut rx = self.notify.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_complete_only_once() {
        let completion = Completion::new();
        assert!(!completion.is_complete());
        assert!(completion.complete());
        assert!(!completion.complete());
        assert!(completion.is_complete());
    }

    #[test]
    fn test_wait_returns_after_completion_on_other_thread() {
        let completion = Arc::new(Completion::new());
        let producer = {
            let completion = completion.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                completion.complete();
            })
        };

        completion.wait();
        assert!(completion.is_complete());
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires_when_pending() {
        let completion = Completion::new();
        assert!(!completion.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_on_completed_signal_is_immediate() {
        let completion = Completion::new();
        completion.complete();
        assert!(completion.wait_timeout(Duration::from_millis(0)));
    }

    #[tokio::test]
    async fn test_wait_async() {
        let completion = Arc::new(Completion::new());
        let waiter = {
            let completion = completion.clone();
            tokio::spawn(async move { completion.wait_async().await })
        };

        tokio::task::yield_now().await;
        completion.complete();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_async_after_completion() {
        let completion = Completion::new();
        completion.complete();
        completion.wait_async().await;
    }
}
