// Retry loop for operations whose postcondition tolerates races
//
// Each attempt reports Done, Retry or Fatal. Only the path ensurer uses this;
// every other operation hands backend errors straight to the caller.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{Error, Result};

/// Outcome of a single attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(Error),
    Fatal(Error),
}

impl<T> Attempt<T> {
    /// Sort a backend result by the error's kind
    pub fn classify(result: Result<T>) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(err) if err.is_fatal() => Attempt::Fatal(err),
            Err(err) => Attempt::Retry(err),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// `None` retries until the operation resolves
    pub max_attempts: Option<u32>,
    /// Pause between attempts; zero only yields to the scheduler
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    async fn pause(&self) {
        if self.backoff_ms == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_millis(self.backoff_ms)).await;
        }
    }

    /// Run `op` until it is done, fails fatally, or the budget runs out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            let err = match op().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) => err,
            };

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                warn!("giving up on {} after {} attempts: {}", label, attempts, err);
                return Err(Error::RetriesExhausted {
                    path: label.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }
            trace!("retrying {} (attempt {}): {}", label, attempts, err);
            self.pause().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_done() {
        let calls = &AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("/x", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Attempt::Retry(Error::ConnectionLoss)
                } else {
                    Attempt::Done(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .run("/x", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Attempt::Fatal(Error::SessionExpired)
            })
            .await;
        assert!(matches!(result, Err(Error::SessionExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_budget() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::bounded(3)
            .with_backoff(Duration::from_millis(1))
            .run("/x", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Attempt::Retry(Error::ConnectionLoss)
            })
            .await;
        match result {
            Err(Error::RetriesExhausted { path, attempts, last }) => {
                assert_eq!(path, "/x");
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::ConnectionLoss));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_classify() {
        assert!(matches!(Attempt::classify(Ok(1)), Attempt::Done(1)));
        assert!(matches!(
            Attempt::<()>::classify(Err(Error::SessionExpired)),
            Attempt::Fatal(_)
        ));
        assert!(matches!(
            Attempt::<()>::classify(Err(Error::NodeExists { path: "/a".into() })),
            Attempt::Retry(_)
        ));
    }
}
