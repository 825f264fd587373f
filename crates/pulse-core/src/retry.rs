// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry-with-classifier-and-backoff combinator.
//!
//! Every call site that talks to the repository or a remote endpoint goes
//! through [`with_retries`]; retry policy lives here and nowhere else.

use crate::error::{is_transient, RelayError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Total attempts per delivery, including the first one.
pub const MAX_ATTEMPTS: u32 = 4;

/// Backoff before the k-th retry (zero-based): 1s after the first failure,
/// then 2k+1 seconds.
fn backoff(retry: u32) -> Duration {
    Duration::from_secs(u64::from(2 * retry + 1))
}

/// Runs `op` up to [`MAX_ATTEMPTS`] times, sleeping with increasing backoff
/// between attempts. Non-transient errors abort immediately.
pub async fn with_retries<T, F, Fut>(what: &str, mut op: F) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_transient(&err) {
                    return Err(err);
                }
                if attempt >= MAX_ATTEMPTS {
                    warn!("{what}: giving up after {attempt} attempts: {err}");
                    return Err(err);
                }
                let delay = backoff(attempt - 1);
                warn!("{what}: attempt {attempt} failed, retrying in {delay:?}: {err}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn refused() -> RelayError {
        RelayError::Transport {
            kind: TransportKind::ConnectionRefused,
            message: "connection refused".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_stop_after_four_attempts() {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = with_retries("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(refused()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 1s + 3s + 5s of backoff between the four attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failures_are_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = with_retries("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RelayError::InvalidMetric("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);

        let result = with_retries("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(refused())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_try_success_sleeps_nowhere() {
        let started = Instant::now();
        let result = with_retries("test", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
