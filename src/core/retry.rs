use crate::config::RetryPolicy;

use std::fmt::Display;
use std::future::Future;
use tracing::debug;
use tracing::Span;

/// Runs `op` up to `policy.attempts` times, doubling the delay between attempts.
/// Returns the last error once attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    span: &Span,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => debug!(parent: span, "{label}: attempt {attempt}/{attempts} failed: {err}"),
        }

        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
        attempt += 1;
    }
}
