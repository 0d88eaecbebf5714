//! Pending-task counter doubling as the completion barrier.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

/// Number of submitted-but-unfinished migration tasks.
///
/// The count lives inside a watch channel, which makes the channel lock the single
/// synchronization domain for increments, decrements, wake-ups and waiter checks.
#[derive(Debug, Clone)]
pub struct PendingCounter {
    tx: Arc<watch::Sender<u64>>,
}

impl PendingCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current number of pending tasks.
    pub fn pending(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Increments the count and returns a token that decrements it exactly once when dropped.
    ///
    /// The increment is visible to every waiter before this method returns.
    pub fn track(&self) -> CompletionToken {
        self.tx.send_modify(|count| *count += 1);

        CompletionToken {
            counter: self.clone(),
        }
    }

    /// Waits until the count reaches zero.
    ///
    /// Returns immediately when nothing is pending. Dropping the returned future leaves the
    /// counter untouched.
    pub async fn wait_for_zero(&self) {
        let mut rx = self.tx.subscribe();

        // The sender lives as long as `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Decrements the count and wakes every waiter.
    fn release(&self) {
        self.tx.send_modify(|count| {
            if *count == 0 {
                error!("pending counter released more times than it was tracked");
                return;
            }

            *count -= 1;
        });
    }
}

impl Default for PendingCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that one unit of work is still pending.
///
/// Dropping the token reports the unit as finished. Because the token is owned by the task
/// future, the report also happens when the future is dropped without running to completion.
#[derive(Debug)]
#[must_use = "dropping the token immediately reports the work as finished"]
pub struct CompletionToken {
    counter: PendingCounter,
}

impl CompletionToken {
    /// Reports the unit of work as finished.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        self.counter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn wait_returns_immediately_when_nothing_is_pending() {
        let counter = PendingCounter::new();

        timeout(Duration::from_millis(50), counter.wait_for_zero())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tokens_increment_and_decrement_once() {
        let counter = PendingCounter::new();

        let first = counter.track();
        let second = counter.track();
        assert_eq!(counter.pending(), 2);

        first.complete();
        assert_eq!(counter.pending(), 1);

        drop(second);
        assert_eq!(counter.pending(), 0);
    }

    #[tokio::test]
    async fn wait_blocks_until_last_token_is_released() {
        let counter = PendingCounter::new();
        let token = counter.track();

        let waiter = tokio::spawn({
            let counter = counter.clone();
            async move { counter.wait_for_zero().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        token.complete();

        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_count_untouched() {
        let counter = PendingCounter::new();
        let token = counter.track();

        assert!(
            timeout(Duration::from_millis(20), counter.wait_for_zero())
                .await
                .is_err()
        );
        assert_eq!(counter.pending(), 1);

        token.complete();
        timeout(Duration::from_secs(1), counter.wait_for_zero())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_releases_wake_every_waiter() {
        let counter = PendingCounter::new();
        let tokens: Vec<_> = (0..256).map(|_| counter.track()).collect();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.wait_for_zero().await })
            })
            .collect();

        let releasers: Vec<_> = tokens
            .into_iter()
            .map(|token| tokio::spawn(async move { token.complete() }))
            .collect();

        for releaser in releasers {
            releaser.await.unwrap();
        }

        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(counter.pending(), 0);
    }
}
