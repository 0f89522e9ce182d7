//! Abortable exponential retry delay.

use crate::util::lock;
use std::sync::Mutex;
use std::time::Duration;
use sync_core::Backoff;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when a retry wait was cut short by [`ExponentialRetryDelay::abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("retry wait aborted")]
pub struct RetryAborted;

/// Exponential backoff you can wait on.
///
/// Each elapsed wait doubles the next delay up to the maximum. An aborted
/// wait leaves the delay unchanged.
#[derive(Debug)]
pub struct ExponentialRetryDelay {
    backoff: Mutex<Backoff>,
    current_wait: Mutex<Option<CancellationToken>>,
}

impl ExponentialRetryDelay {
    /// Create a delay starting at `start`, capped at `max`.
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            backoff: Mutex::new(Backoff::new(start, max)),
            current_wait: Mutex::new(None),
        }
    }

    /// Install the cancellation point of the next wait.
    ///
    /// An [`abort`](Self::abort) from now on ends that wait, even if it has
    /// not started yet.
    pub fn arm(&self) {
        lock(&self.current_wait).get_or_insert_with(CancellationToken::new);
    }

    /// Wait for the current delay, then double it.
    pub async fn wait_for_retry(&self) -> Result<(), RetryAborted> {
        let token = lock(&self.current_wait)
            .get_or_insert_with(CancellationToken::new)
            .clone();
        let delay = self.next_value();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(RetryAborted),
            _ = tokio::time::sleep(delay) => {
                lock(&self.backoff).advance();
                Ok(())
            }
        };

        lock(&self.current_wait).take();
        outcome
    }

    /// End a pending or armed wait early with [`RetryAborted`].
    pub fn abort(&self) {
        if let Some(token) = lock(&self.current_wait).as_ref() {
            token.cancel();
        }
    }

    /// Restore the start delay and abort a pending wait.
    pub fn reset(&self) {
        lock(&self.backoff).reset();
        self.abort();
    }

    /// Delay the next wait will use.
    pub fn next_value(&self) -> Duration {
        lock(&self.backoff).next_value()
    }
}

impl Default for ExponentialRetryDelay {
    fn default() -> Self {
        Self::new(
            sync_core::backoff::DEFAULT_START,
            sync_core::backoff::DEFAULT_MAX,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn wait_doubles_delay() {
        let delay = ExponentialRetryDelay::new(Duration::from_secs(2), Duration::from_secs(5));
        let started = Instant::now();

        delay.wait_for_retry().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(delay.next_value(), Duration::from_secs(4));

        delay.wait_for_retry().await.unwrap();
        assert_eq!(delay.next_value(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_ends_wait_without_advancing() {
        let delay = Arc::new(ExponentialRetryDelay::new(
            Duration::from_secs(10),
            Duration::from_secs(60),
        ));

        let waiter = {
            let delay = Arc::clone(&delay);
            tokio::spawn(async move { delay.wait_for_retry().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        delay.abort();

        assert_eq!(waiter.await.unwrap(), Err(RetryAborted));
        assert_eq!(delay.next_value(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_start_and_cancels() {
        let delay = Arc::new(ExponentialRetryDelay::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));
        delay.wait_for_retry().await.unwrap();
        delay.wait_for_retry().await.unwrap();
        assert_eq!(delay.next_value(), Duration::from_secs(4));

        let waiter = {
            let delay = Arc::clone(&delay);
            tokio::spawn(async move { delay.wait_for_retry().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        delay.reset();

        assert_eq!(waiter.await.unwrap(), Err(RetryAborted));
        assert_eq!(delay.next_value(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_arm_ends_next_wait() {
        let delay = ExponentialRetryDelay::new(Duration::from_secs(300), Duration::from_secs(600));
        let started = Instant::now();

        delay.arm();
        delay.abort();

        assert_eq!(delay.wait_for_retry().await, Err(RetryAborted));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(delay.next_value(), Duration::from_secs(300));

        // The abort was used up by that wait.
        delay.wait_for_retry().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_without_wait_is_no_op() {
        let delay = ExponentialRetryDelay::default();
        delay.abort();
        assert_eq!(delay.next_value(), Duration::from_secs(2));
        delay.wait_for_retry().await.unwrap();
        assert_eq!(delay.next_value(), Duration::from_secs(4));
    }
}
