//! Wait With Progress
//!
//! Repeats a check up to a fixed number of times with a fixed interval in
//! between, until it yields a valid result. Used for login escalation and for
//! waiting on application state changes (with the short interval).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::RequestError;
use super::monitor::ProgressMonitor;

/// Call `check` up to `attempts` times, sleeping `interval` between calls.
///
/// `check` returns `Ok(Some(value))` for a valid result, `Ok(None)` to try
/// again. Errors end the wait immediately; a check that wants to tolerate
/// errors maps them to `Ok(None)` itself.
///
/// Returns `Ok(None)` if no valid result appeared within `attempts` calls.
pub async fn poll_until<T, F, Fut>(
    label: &str,
    attempts: u32,
    interval: Duration,
    monitor: &ProgressMonitor,
    mut check: F,
) -> Result<Option<T>, RequestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, RequestError>>,
{
    for attempt in 1..=attempts {
        monitor.check()?;

        if let Some(value) = check(attempt).await? {
            debug!("{}: valid result on attempt {}/{}", label, attempt, attempts);
            return Ok(Some(value));
        }

        if attempt < attempts {
            debug!(
                "{}: no valid result on attempt {}/{}, waiting {:?}",
                label, attempt, attempts, interval
            );
            monitor.sleep(interval).await?;
        }
    }

    Ok(None)
}
