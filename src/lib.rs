//! cf-client-core - resilient request execution for Cloud Foundry clients
//!
//! Runs API calls with typed retry policies, one-time login recovery on
//! 401/403, and cooperative cancellation. Also provides paginated listing and
//! a bounded SSH session pool for reading files from application instances.

pub mod cloud;
pub mod config;
pub mod request;
pub mod ssh;

pub use cloud::{CloudSession, CloudTarget};
pub use config::{ConfigStorage, CoreConfig};
pub use request::{ProgressMonitor, RequestError, RequestExecutor, RequestPolicy};
pub use ssh::{SshError, SshSessionPool};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Reads `RUST_LOG`, defaulting to `info`. Does nothing if a global
/// subscriber is already installed.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
