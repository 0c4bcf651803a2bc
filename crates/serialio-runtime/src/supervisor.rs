//! Process-level restart policy.
//!
//! Any error from an attempt is logged, followed by a fixed pause and a fresh
//! attempt.  There is no backoff growth and no attempt limit.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::error;

/// Pause between a failed attempt and the next one.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Run `attempt` until it returns `Ok`, pausing `retry_delay` after each
/// failure.
pub async fn supervise<F, Fut, T, E>(mut attempt: F, retry_delay: Duration) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    loop {
        match attempt().await {
            Ok(value) => return value,
            Err(e) => {
                error!(error = %e, "Configuration service crashed. Restart in {} seconds.", retry_delay.as_secs());
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let result = supervise(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n} failed")) } else { Ok(n) }
                }
            },
            Duration::from_millis(5),
        )
        .await;
        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn delay_is_fixed_between_attempts() {
        let delay = Duration::from_millis(30);
        let mut remaining_failures = 2;
        let started = Instant::now();
        supervise(
            || {
                let fail = remaining_failures > 0;
                remaining_failures -= 1;
                async move { if fail { Err("boom") } else { Ok(()) } }
            },
            delay,
        )
        .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= delay * 2);
        assert!(elapsed < delay * 10);
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let started = Instant::now();
        let value = supervise(|| async { Ok::<_, String>("up") }, RESTART_DELAY).await;
        assert_eq!(value, "up");
        assert!(started.elapsed() < RESTART_DELAY);
    }
}
