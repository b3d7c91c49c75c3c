//! Configuration Types
//!
//! Every field has a serde default, so an empty `{}` config file (or no file
//! at all) yields the stock timings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root of the on-disk configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub request: RequestSettings,

    #[serde(default)]
    pub ssh: SshPoolSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            request: RequestSettings::default(),
            ssh: SshPoolSettings::default(),
        }
    }
}

/// Timings for request execution and login recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    /// Login attempts when recovering a failed request
    #[serde(default = "default_login_attempts_request")]
    pub login_attempts_request: u32,

    /// Login attempts when a session connects
    #[serde(default = "default_login_attempts_connect")]
    pub login_attempts_connect: u32,

    #[serde(default = "default_login_retry_interval_ms")]
    pub login_retry_interval_ms: u64,

    /// Total time a request may spend sleeping between retries
    #[serde(default = "default_total_wait_ms")]
    pub total_wait_ms: u64,

    /// Poll interval for waiting on application state
    #[serde(default = "default_short_interval_ms")]
    pub short_interval_ms: u64,

    #[serde(default = "default_service_unavailable_interval_ms")]
    pub service_unavailable_interval_ms: u64,

    #[serde(default = "default_staging_interval_ms")]
    pub staging_interval_ms: u64,

    #[serde(default = "default_app_stopped_interval_ms")]
    pub app_stopped_interval_ms: u64,

    /// How often a cancellable request checks the monitor
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            login_attempts_request: default_login_attempts_request(),
            login_attempts_connect: default_login_attempts_connect(),
            login_retry_interval_ms: default_login_retry_interval_ms(),
            total_wait_ms: default_total_wait_ms(),
            short_interval_ms: default_short_interval_ms(),
            service_unavailable_interval_ms: default_service_unavailable_interval_ms(),
            staging_interval_ms: default_staging_interval_ms(),
            app_stopped_interval_ms: default_app_stopped_interval_ms(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
        }
    }
}

impl RequestSettings {
    pub fn login_retry_interval(&self) -> Duration {
        Duration::from_millis(self.login_retry_interval_ms)
    }

    pub fn total_wait(&self) -> Duration {
        Duration::from_millis(self.total_wait_ms)
    }

    pub fn short_interval(&self) -> Duration {
        Duration::from_millis(self.short_interval_ms)
    }

    pub fn service_unavailable_interval(&self) -> Duration {
        Duration::from_millis(self.service_unavailable_interval_ms)
    }

    pub fn staging_interval(&self) -> Duration {
        Duration::from_millis(self.staging_interval_ms)
    }

    pub fn app_stopped_interval(&self) -> Duration {
        Duration::from_millis(self.app_stopped_interval_ms)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

/// Limits for the SSH session pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshPoolSettings {
    /// Upper bound on physically open SSH connections
    #[serde(default = "default_max_active_connections")]
    pub max_active_connections: usize,

    /// Give up acquiring a working session after this long
    #[serde(default = "default_max_attempt_time_secs")]
    pub max_attempt_time_secs: u64,

    /// Sleep when no session is idle and the budget is used up
    #[serde(default = "default_idle_retry_ms")]
    pub idle_retry_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for SshPoolSettings {
    fn default() -> Self {
        Self {
            max_active_connections: default_max_active_connections(),
            max_attempt_time_secs: default_max_attempt_time_secs(),
            idle_retry_ms: default_idle_retry_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl SshPoolSettings {
    pub fn max_attempt_time(&self) -> Duration {
        Duration::from_secs(self.max_attempt_time_secs)
    }

    pub fn idle_retry(&self) -> Duration {
        Duration::from_millis(self.idle_retry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_login_attempts_request() -> u32 {
    3
}

fn default_login_attempts_connect() -> u32 {
    5
}

fn default_login_retry_interval_ms() -> u64 {
    2000
}

fn default_total_wait_ms() -> u64 {
    60_000
}

fn default_short_interval_ms() -> u64 {
    5000
}

fn default_service_unavailable_interval_ms() -> u64 {
    2000
}

fn default_staging_interval_ms() -> u64 {
    2000
}

fn default_app_stopped_interval_ms() -> u64 {
    1000
}

fn default_cancel_poll_interval_ms() -> u64 {
    250
}

fn default_max_active_connections() -> usize {
    5
}

fn default_max_attempt_time_secs() -> u64 {
    120
}

fn default_idle_retry_ms() -> u64 {
    1000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_command_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.request.login_attempts_request, 3);
        assert_eq!(config.request.login_attempts_connect, 5);
        assert_eq!(config.request.total_wait(), Duration::from_secs(60));
        assert_eq!(config.request.cancel_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.ssh.max_active_connections, 5);
        assert_eq!(config.ssh.max_attempt_time(), Duration::from_secs(120));
        assert_eq!(config.ssh.idle_retry(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_override() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"request":{"total_wait_ms":1000},"ssh":{"max_active_connections":2}}"#)
                .unwrap();
        assert_eq!(config.request.total_wait(), Duration::from_secs(1));
        assert_eq!(config.request.service_unavailable_interval(), Duration::from_secs(2));
        assert_eq!(config.ssh.max_active_connections, 2);
        assert_eq!(config.ssh.command_timeout(), Duration::from_secs(30));
    }
}
