//! Per-call deadlines.
//!
//! Every external call runs under [`bounded`]; hitting the limit turns into
//! the call's own timeout error, which classifies as recoverable.

use std::future::Future;
use std::time::Duration;

use crate::store::StoreError;

/// Error types that can represent an elapsed deadline.
pub trait TimeoutError {
    fn timed_out(limit: Duration) -> Self;
}

impl TimeoutError for StoreError {
    fn timed_out(limit: Duration) -> Self {
        StoreError::Timeout(limit)
    }
}

/// Run `fut` with a deadline of `limit`. The future is dropped on expiry.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    E: TimeoutError,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(limit_ms = limit.as_millis() as u64, "Call deadline elapsed");
            Err(E::timed_out(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(11)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(StoreError::Timeout(Duration::from_secs(10))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let result: Result<u8, StoreError> = bounded(Duration::from_secs(10), async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
