//! Bounded retry for eventually-consistent API calls
//!
//! Some calls fail until the resource they target has propagated through
//! the provider's internal systems (tagging a load balancer right after
//! creating it, for instance). Those failures are retried with growing
//! backoff up to a hard deadline; once the deadline passes, one final
//! attempt is made and its result returned as-is.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::error::ProviderResult;

const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Retries `op` while it fails with transient errors, up to `timeout`.
///
/// Non-transient errors are returned immediately. There is no unbounded
/// retry: after the deadline the last attempt's error surfaces directly.
pub async fn retry_transient<T, F, Fut>(
    timeout: Duration,
    min_interval: Duration,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut interval = min_interval;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if Instant::now() >= deadline {
                    log::debug!("retry window exhausted, making a final attempt: {err}");
                    return op().await;
                }
                log::debug!("transient error, retrying: {err}");
            }
            Err(err) => return Err(err),
        }

        sleep(interval).await;
        interval = (interval * 2).min(MAX_INTERVAL);
    }
}
