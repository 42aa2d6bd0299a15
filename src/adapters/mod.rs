pub mod embedder;
pub mod extractor;
pub mod kmeans;
pub mod labeler;
pub mod meeting;
pub mod openrouter;

pub use embedder::OpenRouterEmbedder;
pub use extractor::TwoPassExtractor;
pub use kmeans::KMeansClusterer;
pub use labeler::ChatTopicLabeler;
pub use meeting::StructuredMeetingExtractor;
pub use openrouter::OpenRouterClient;

use std::future::Future;
use std::time::Duration;

use tracing::debug;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_MIN: Duration = Duration::from_secs(4);
const RETRY_MAX: Duration = Duration::from_secs(10);

/// Retry an operation up to three times with exponential backoff
/// (multiplier 1s, clamped to 4-10s). Only errors the classifier marks
/// transient are retried; the last error is returned on exhaustion.
pub(crate) async fn with_retry<T, E, Fut>(
    mut op: impl FnMut() -> Fut,
    is_transient: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                let backoff = Duration::from_secs(1 << attempt).clamp(RETRY_MIN, RETRY_MAX);
                debug!(attempt = attempt + 1, backoff_secs = backoff.as_secs(), error = %e, "retrying after transient error");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_to_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_capped() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always".to_string()) }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent".to_string()) }
            },
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
