// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Bounded retry helper for externally-facing calls (Object Store I/O, Cloud
//! Fleet calls) that are allowed to fail transiently a fixed number of times
//! before the caller gives up. This is deliberately distinct from the
//! coordination store's unbounded optimistic-transaction retry: that one
//! retries on conflict, not on failure, and never has a delay budget.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.min_delay.saturating_mul(1 << attempt.min(16));
        scaled.min(self.max_delay)
    }
}

/// Runs `action` up to `config.max_attempts` times, backing off between
/// attempts, as long as `is_retriable` says the error is worth retrying.
/// Same `with_retries`/`is_retriable` split used by every remote-service
/// client in this stack.
pub async fn with_retries<T, E, ActionFn, RetriableFn>(
    component: &str,
    operation: &str,
    config: &RetryConfig,
    mut action: ActionFn,
    is_retriable: RetriableFn,
) -> Result<T, E>
where
    ActionFn: FnMut() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>>,
    RetriableFn: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < config.max_attempts && is_retriable(&err) => {
                let delay = config.delay_for(attempt);
                warn!(
                    component,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use test_r::test;

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 5,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: Result<u32, String> = with_retries(
            "test",
            "op",
            &config,
            || {
                let calls = calls.clone();
                Box::pin(async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(n)
                    }
                })
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_when_exhausted() {
        let config = RetryConfig {
            max_attempts: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let result: Result<u32, String> = with_retries(
            "test",
            "op",
            &config,
            || Box::pin(async { Err::<u32, _>("always fails".to_string()) }),
            |_| true,
        )
        .await;
        assert_eq!(result, Err("always fails".to_string()));
    }

    #[tokio::test]
    async fn does_not_retry_non_retriable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default();
        let result: Result<u32, String> = with_retries(
            "test",
            "op",
            &config,
            || {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                })
            },
            |_| false,
        )
        .await;
        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
