//! Request Executor
//!
//! Runs a remote operation until it succeeds, honoring a [`BackoffPolicy`]
//! for transient failures and escalating to a login exactly once per call
//! when the server rejects the credentials.
//!
//! # Attempt flow
//!
//! ```text
//!   attempt ──ok──────────────────────────────► value
//!      │
//!      ├─ Cancelled ──────────────────────────► Cancelled
//!      ├─ 401/403 ── first time ── login ok ──► attempt again
//!      │        └─── login failed / second ───► AuthorizationFailed
//!      └─ other ─── policy ── NoRetry ────────► error as is
//!                        └── RetryAfter(d) ───► sleep d ── attempt again
//!                               (budget spent) ► policy.exhausted(error)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, RetryDecision};
use super::cancellable;
use super::error::RequestError;
use super::login::LoginEscalation;
use super::monitor::ProgressMonitor;
use crate::config::RequestSettings;

/// Per-attempt information handed to a [`RemoteOperation`]
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 1-based attempt number within one `run()` call
    pub attempt: u32,
    /// Set once a login escalation has happened in this call
    pub after_login: bool,
    pub monitor: ProgressMonitor,
}

/// One unit of remote work. Invoked once per attempt.
///
/// Any `FnMut(RequestContext) -> impl Future<Output = Result<T, RequestError>>`
/// closure is a `RemoteOperation`.
pub trait RemoteOperation<T>: Send {
    fn invoke(
        &mut self,
        ctx: RequestContext,
    ) -> impl Future<Output = Result<T, RequestError>> + Send;
}

impl<T, F, Fut> RemoteOperation<T> for F
where
    F: FnMut(RequestContext) -> Fut + Send,
    Fut: Future<Output = Result<T, RequestError>> + Send,
{
    fn invoke(
        &mut self,
        ctx: RequestContext,
    ) -> impl Future<Output = Result<T, RequestError>> + Send {
        self(ctx)
    }
}

/// Executor limits
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Upper bound for the total time spent sleeping between retries
    pub max_total_wait: Duration,
    /// Login attempts during an escalation
    pub login_attempts: u32,
    /// Sleep between login attempts
    pub login_interval: Duration,
    /// How often `run_cancellable` looks at the monitor
    pub cancel_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&RequestSettings::default())
    }
}

impl From<&RequestSettings> for ExecutorConfig {
    fn from(settings: &RequestSettings) -> Self {
        Self {
            max_total_wait: settings.total_wait(),
            login_attempts: settings.login_attempts_request,
            login_interval: settings.login_retry_interval(),
            cancel_poll_interval: settings.cancel_poll_interval(),
        }
    }
}

/// Bookkeeping for a single `run()` call
#[derive(Debug, Default)]
struct AttemptRecord {
    attempts: u32,
    waited: Duration,
    escalated: bool,
}

/// Retrying executor. Cheap to clone.
#[derive(Clone)]
pub struct RequestExecutor {
    login: Arc<LoginEscalation>,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(login: Arc<LoginEscalation>, config: ExecutorConfig) -> Self {
        Self { login, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or fails for good.
    pub async fn run<T, O, P>(
        &self,
        label: &str,
        mut operation: O,
        policy: &P,
        monitor: &ProgressMonitor,
    ) -> Result<T, RequestError>
    where
        O: RemoteOperation<T>,
        P: BackoffPolicy + ?Sized,
    {
        let mut record = AttemptRecord::default();

        loop {
            monitor.check()?;
            record.attempts += 1;

            let ctx = RequestContext {
                attempt: record.attempts,
                after_login: record.escalated,
                monitor: monitor.clone(),
            };

            debug!("{}: attempt {}", label, record.attempts);

            let error = match operation.invoke(ctx).await {
                Ok(value) => {
                    if record.attempts > 1 {
                        info!("{}: succeeded after {} attempts", label, record.attempts);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.is_cancelled() {
                debug!("{}: cancelled during attempt {}", label, record.attempts);
                return Err(error);
            }

            if error.is_authorization() {
                if record.escalated {
                    warn!("{}: still unauthorized after login: {}", label, error);
                    return Err(RequestError::AuthorizationFailed {
                        source: Box::new(error),
                    });
                }
                record.escalated = true;

                info!("{}: {} - attempting login", label, error);
                match self
                    .login
                    .escalate(self.config.login_attempts, self.config.login_interval, monitor)
                    .await
                {
                    Ok(_) => continue,
                    Err(login_error) if login_error.is_cancelled() => return Err(login_error),
                    Err(login_error) => {
                        warn!("{}: login escalation failed: {}", label, login_error);
                        return Err(RequestError::AuthorizationFailed {
                            source: Box::new(error),
                        });
                    }
                }
            }

            match policy.decide(&error, record.attempts) {
                RetryDecision::NoRetry => {
                    debug!("{}: not retrying: {}", label, error);
                    return Err(error);
                }
                RetryDecision::RetryAfter(delay) => {
                    let within_budget = record
                        .waited
                        .checked_add(delay)
                        .is_some_and(|total| total <= self.config.max_total_wait);
                    if !within_budget {
                        warn!(
                            "{}: giving up after {} attempts ({:?} waited): {}",
                            label, record.attempts, record.waited, error
                        );
                        return Err(policy.exhausted(error, record.attempts));
                    }

                    info!(
                        "{}: attempt {} failed, retrying in {:?}: {}",
                        label, record.attempts, delay, error
                    );
                    monitor.sleep(delay).await?;
                    record.waited += delay;
                }
            }
        }
    }

    /// Like [`run`](Self::run), but on a detached task so the caller can stop
    /// waiting when `monitor` is cancelled. The task itself keeps running
    /// until its current attempt returns.
    pub async fn run_cancellable<T, O, P>(
        &self,
        label: &str,
        operation: O,
        policy: Arc<P>,
        monitor: &ProgressMonitor,
    ) -> Result<T, RequestError>
    where
        T: Send + 'static,
        O: RemoteOperation<T> + 'static,
        P: BackoffPolicy + ?Sized + 'static,
    {
        let executor = self.clone();
        let worker_label = label.to_string();
        let worker_monitor = monitor.clone();

        cancellable::run_cancellable(
            label,
            async move {
                executor
                    .run(&worker_label, operation, policy.as_ref(), &worker_monitor)
                    .await
            },
            monitor,
            self.config.cancel_poll_interval,
        )
        .await
    }
}
