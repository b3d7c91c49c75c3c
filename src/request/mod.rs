//! Request module - resilient execution of Cloud Foundry API calls
//!
//! # Features
//! - Typed retry policies for 503, staging-not-finished and stopped apps
//! - One-time login escalation on 401/403
//! - Cooperative cancellation through [`ProgressMonitor`]
//! - Detached-task execution that can be abandoned on cancel
//! - `next_url` pagination

pub mod backoff;
pub mod cancellable;
mod error;
pub mod executor;
pub mod login;
mod monitor;
pub mod pagination;
pub mod wait;

pub use backoff::{
    calculate_backoff, BackoffPolicy, ExponentialBackoff, Interval, RequestPolicy, RetryDecision,
    RetryRule, TransientCondition,
};
pub use cancellable::run_cancellable;
pub use error::{ErrorKind, RequestError};
pub use executor::{ExecutorConfig, RemoteOperation, RequestContext, RequestExecutor};
pub use login::{Authenticator, LoginEscalation, LoginToken, TokenKind, TokenState};
pub use monitor::ProgressMonitor;
pub use pagination::{fetch_all, HttpPageSource, PageSource, Paginator, ResourcePage};
pub use wait::poll_until;
