//! Cloud Session
//!
//! Owns everything scoped to one connection to a Cloud Foundry target: the
//! login escalation (and its token store for SSO targets), the request
//! executor, the page source, and optionally the SSH session pool. Nothing
//! here is process-global; dropping the session drops all of it.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{CoreConfig, TokenStore};
use crate::request::{
    fetch_all, poll_until, Authenticator, ExecutorConfig, LoginEscalation, LoginToken, PageSource,
    ProgressMonitor, RequestContext, RequestError, RequestExecutor, RequestPolicy,
};
use crate::ssh::{ConnectionBudget, SshConnector, SshSessionPool};

/// The API endpoint a session talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudTarget {
    pub api_url: String,

    /// Single-sign-on target: fresh tokens are persisted and restored
    #[serde(default)]
    pub sso: bool,
}

impl CloudTarget {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            sso: false,
        }
    }

    pub fn sso(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            sso: true,
        }
    }
}

pub struct CloudSession {
    target: CloudTarget,
    config: CoreConfig,
    login: Arc<LoginEscalation>,
    executor: RequestExecutor,
    pages: Arc<dyn PageSource>,
    ssh_pool: Option<Arc<SshSessionPool>>,
}

impl CloudSession {
    /// `token_store` is only used for SSO targets
    pub fn new(
        target: CloudTarget,
        config: CoreConfig,
        authenticator: Arc<dyn Authenticator>,
        pages: Arc<dyn PageSource>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        let mut login = LoginEscalation::new(authenticator);
        if target.sso {
            login = login.with_sso_store(target.api_url.clone(), token_store);
        }
        let login = Arc::new(login);
        let executor = RequestExecutor::new(login.clone(), ExecutorConfig::from(&config.request));

        Self {
            target,
            config,
            login,
            executor,
            pages,
            ssh_pool: None,
        }
    }

    /// Enable SSH file access with a budget of its own
    pub fn with_ssh(self, connector: Arc<dyn SshConnector>) -> Self {
        let budget = ConnectionBudget::new(self.config.ssh.max_active_connections);
        self.with_shared_ssh(connector, budget)
    }

    /// Enable SSH file access drawing from a budget shared with other sessions
    pub fn with_shared_ssh(
        mut self,
        connector: Arc<dyn SshConnector>,
        budget: Arc<ConnectionBudget>,
    ) -> Self {
        let pool = SshSessionPool::with_budget(connector, self.config.ssh.clone(), budget);
        self.ssh_pool = Some(Arc::new(pool));
        self
    }

    pub fn target(&self) -> &CloudTarget {
        &self.target
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn ssh_pool(&self) -> Option<&Arc<SshSessionPool>> {
        self.ssh_pool.as_ref()
    }

    /// Retry policy for plain requests under this session's settings
    pub fn standard_policy(&self) -> RequestPolicy {
        RequestPolicy::standard(&self.config.request)
    }

    /// Log in to the target. SSO targets reuse a still valid stored token.
    pub async fn connect(&self, monitor: &ProgressMonitor) -> Result<LoginToken, RequestError> {
        monitor.set_task(format!("Connecting to {}", self.target.api_url));

        let token = match self.login.restore() {
            Some(token) => token,
            None => {
                let settings = &self.config.request;
                self.login
                    .escalate(
                        settings.login_attempts_connect,
                        settings.login_retry_interval(),
                        monitor,
                    )
                    .await?
            }
        };

        self.pages.install_token(&token);
        info!("Connected to {}", self.target.api_url);
        Ok(token)
    }

    /// Fetch every page of a listing. The whole listing is retried as one
    /// operation under the standard policy.
    pub async fn list_resources(
        &self,
        url: &str,
        params: &[(String, String)],
        monitor: &ProgressMonitor,
    ) -> Result<Vec<Value>, RequestError> {
        let policy = self.standard_policy();
        let label = format!("list {}", url);
        let pages = self.pages.as_ref();
        let login = self.login.as_ref();

        self.executor
            .run(
                &label,
                |ctx: RequestContext| async move {
                    if ctx.after_login {
                        if let Some(token) = login.current_token() {
                            pages.install_token(&token);
                        }
                    }
                    fetch_all(pages, url, params).await
                },
                &policy,
                monitor,
            )
            .await
    }

    /// Poll `check` with the short interval until it yields a value
    pub async fn wait_for<T, F, Fut>(
        &self,
        label: &str,
        attempts: u32,
        monitor: &ProgressMonitor,
        check: F,
    ) -> Result<Option<T>, RequestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, RequestError>>,
    {
        poll_until(label, attempts, self.config.request.short_interval(), monitor, check).await
    }

    /// Close pooled SSH sessions
    pub async fn close(&self) {
        if let Some(pool) = &self.ssh_pool {
            debug!("Closing SSH sessions for {}", self.target.api_url);
            pool.close_all().await;
        }
    }
}
