//! Cancellable Execution
//!
//! Runs work on a detached task while the caller polls the monitor. When the
//! monitor is cancelled the caller returns `Cancelled` right away; the task is
//! abandoned, not aborted. Work that shares the monitor stops at its next
//! checkpoint (a retry sleep or a new attempt).

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::error::RequestError;
use super::monitor::ProgressMonitor;

/// Run `work` on a spawned task, returning early with `Cancelled` when
/// `monitor` is cancelled. The monitor is looked at every `poll_interval`.
pub async fn run_cancellable<T, F>(
    label: &str,
    work: F,
    monitor: &ProgressMonitor,
    poll_interval: Duration,
) -> Result<T, RequestError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, RequestError>> + Send + 'static,
{
    // Nothing is started for an already cancelled monitor
    monitor.check()?;

    let mut handle = tokio::spawn(work);
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    poll.tick().await;

    loop {
        tokio::select! {
            biased;

            joined = &mut handle => {
                // A result arriving after cancellation is discarded
                monitor.check()?;
                return match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("{}: worker task failed: {}", label, e);
                        Err(RequestError::Failed(format!("{}: worker task failed: {}", label, e)))
                    }
                };
            }
            _ = poll.tick() => {
                if monitor.is_cancelled() {
                    debug!("{}: cancelled, abandoning worker task", label);
                    return Err(RequestError::Cancelled);
                }
            }
        }
    }
}
