//! API-key rotation with bounded retry.
//!
//! One process-wide cursor over the key pool, shared by every caller.
//! Successive calls inherit the cursor wherever the previous call left it,
//! and concurrent callers may interleave cursor updates — a key can be
//! skipped or reused out of turn. That only perturbs rotation order; each
//! call bounds its own attempt count independently.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::llm::{OracleError, RetryClass};

/// Pause before retrying after a rate-limit or availability failure.
const BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
#[error("no API keys configured")]
pub struct EmptyPool;

#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    /// A pool without keys cannot serve any oracle call, so constructing one
    /// is an error the caller should treat as fatal at startup.
    pub fn new(keys: Vec<String>) -> Result<Self, EmptyPool> {
        if keys.is_empty() {
            return Err(EmptyPool);
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the key the next attempt will use.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) % self.keys.len()
    }

    /// The single mutation point for the shared cursor. Plain load-then-store;
    /// see the module docs for the accepted interleaving.
    fn advance(&self) {
        let next = self.cursor.load(Ordering::Relaxed).wrapping_add(1);
        self.cursor.store(next, Ordering::Relaxed);
    }

    /// Run `op` with the key at the cursor, rotating to the next key when the
    /// failure is credential-shaped: immediately for a rejected key, after a
    /// fixed backoff for rate limits and outages. Any other failure propagates
    /// untouched. Gives up after `2 × pool` attempts.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, OracleError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let max_attempts = self.keys.len() * 2;
        let mut attempts = 0;

        loop {
            let index = self.position();
            let key = self.keys[index].clone();
            let err = match op(key).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.retry_class() {
                RetryClass::Fatal => return Err(err),
                RetryClass::RotateNow => {
                    warn!(key_index = index, error = %err, "API key rejected, rotating");
                }
                RetryClass::RotateAfterBackoff => {
                    warn!(key_index = index, error = %err, "oracle overloaded, backing off");
                    tokio::time::sleep(BACKOFF).await;
                }
            }

            self.advance();
            attempts += 1;
            if attempts >= max_attempts {
                return Err(OracleError::Exhausted {
                    pool: self.keys.len(),
                    attempts,
                    last: Box::new(err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn pool(n: usize) -> KeyPool {
        KeyPool::new((1..=n).map(|i| format!("key-{i}")).collect()).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(KeyPool::new(Vec::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_twice_the_pool_size() {
        let pool = pool(2);
        let mut used = Vec::new();
        let result: Result<(), _> = pool
            .run(|key| {
                used.push(key);
                async { Err(OracleError::RateLimited("quota".into())) }
            })
            .await;

        assert_eq!(used, vec!["key-1", "key-2", "key-1", "key-2"]);
        match result {
            Err(OracleError::Exhausted { pool, attempts, .. }) => {
                assert_eq!(pool, 2);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_key_gets_two_attempts() {
        let pool = pool(1);
        let mut calls = 0;
        let result: Result<(), _> = pool
            .run(|_key| {
                calls += 1;
                async { Err(OracleError::InvalidKey("rejected".into())) }
            })
            .await;

        assert_eq!(calls, 2);
        assert!(matches!(result, Err(OracleError::Exhausted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backs_off_before_rotating() {
        let pool = pool(2);
        let start = Instant::now();
        let mut calls = 0;
        let result = pool
            .run(|key| {
                calls += 1;
                let fail = calls == 1;
                async move {
                    if fail {
                        Err(OracleError::RateLimited("quota".into()))
                    } else {
                        Ok(key)
                    }
                }
            })
            .await;

        // One backoff happened, and the retry used the cyclic successor.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(result.unwrap(), "key-2");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_key_rotates_without_delay() {
        let pool = pool(2);
        let start = Instant::now();
        let mut calls = 0;
        let result = pool
            .run(|key| {
                calls += 1;
                let fail = calls == 1;
                async move {
                    if fail {
                        Err(OracleError::InvalidKey("rejected".into()))
                    } else {
                        Ok(key)
                    }
                }
            })
            .await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(result.unwrap(), "key-2");
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_error_propagates_without_rotation() {
        let pool = pool(3);
        let mut calls = 0;
        let result: Result<(), _> = pool
            .run(|_key| {
                calls += 1;
                async {
                    Err(OracleError::Api {
                        status: 500,
                        message: "boom".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls, 1);
        assert_eq!(pool.position(), 0);
        assert!(matches!(result, Err(OracleError::Api { status: 500, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_position_carries_across_calls() {
        let pool = pool(3);
        let mut calls = 0;
        let _ = pool
            .run(|key| {
                calls += 1;
                let fail = calls == 1;
                async move {
                    if fail {
                        Err(OracleError::InvalidKey("rejected".into()))
                    } else {
                        Ok(key)
                    }
                }
            })
            .await;

        // The first call failed once and succeeded on key-2; an unrelated
        // follow-up call starts from the inherited position.
        let second = pool.run(|key| async move { Ok::<_, OracleError>(key) }).await;
        assert_eq!(second.unwrap(), "key-2");
    }
}
