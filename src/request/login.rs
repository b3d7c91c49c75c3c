//! Login Escalation
//!
//! The one-time re-authentication performed when a request is rejected with
//! 401/403. Login is attempted a bounded number of times with a fixed
//! interval; only a present, unexpired token counts as success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::RequestError;
use super::monitor::ProgressMonitor;
use super::wait::poll_until;
use crate::config::TokenStore;

/// Kind of credential a token represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Bearer,
    Passcode,
    Refresh,
}

/// Opaque credential returned by a login
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginToken {
    pub kind: TokenKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// Keep the secret out of logs
impl std::fmt::Debug for LoginToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginToken")
            .field("kind", &self.kind)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl LoginToken {
    pub fn new(kind: TokenKind, value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            kind,
            value: value.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    pub fn state(&self) -> TokenState {
        TokenState::of(Some(self))
    }
}

/// Classification of a login result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Expired,
    Valid,
}

impl TokenState {
    pub fn of(token: Option<&LoginToken>) -> Self {
        match token {
            None => TokenState::Absent,
            Some(t) if t.value.is_empty() => TokenState::Absent,
            Some(t) if t.is_expired() => TokenState::Expired,
            Some(_) => TokenState::Valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        *self == TokenState::Valid
    }
}

/// Performs the actual login against the target
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `Ok(None)` when the server answered without a token
    async fn login(&self) -> Result<Option<LoginToken>, RequestError>;
}

struct SsoPersistence {
    target: String,
    store: Arc<dyn TokenStore>,
}

pub struct LoginEscalation {
    authenticator: Arc<dyn Authenticator>,
    sso: Option<SsoPersistence>,
    /// Last valid token obtained or restored
    current: RwLock<Option<LoginToken>>,
}

impl LoginEscalation {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            sso: None,
            current: RwLock::new(None),
        }
    }

    /// Write fresh tokens for `target` back to `store` after each successful
    /// escalation (single-sign-on targets)
    pub fn with_sso_store(mut self, target: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        self.sso = Some(SsoPersistence {
            target: target.into(),
            store,
        });
        self
    }

    /// The token of the last successful login, if still valid
    pub fn current_token(&self) -> Option<LoginToken> {
        self.current
            .read()
            .as_ref()
            .filter(|token| token.state().is_valid())
            .cloned()
    }

    /// Restore the persisted token of an SSO target, if any is still valid
    pub fn restore(&self) -> Option<LoginToken> {
        let sso = self.sso.as_ref()?;
        let token = match sso.store.load(&sso.target) {
            Ok(token) => token?,
            Err(e) => {
                warn!("Failed to load stored token for {}: {}", sso.target, e);
                return None;
            }
        };

        if !token.state().is_valid() {
            debug!("Stored token for {} is no longer valid", sso.target);
            return None;
        }

        info!("Restored {:?} token for {}", token.kind, sso.target);
        *self.current.write() = Some(token.clone());
        Some(token)
    }

    /// Log in up to `attempts` times, `interval` apart, until a valid token
    /// is obtained.
    pub async fn escalate(
        &self,
        attempts: u32,
        interval: Duration,
        monitor: &ProgressMonitor,
    ) -> Result<LoginToken, RequestError> {
        let authenticator = &self.authenticator;
        let last_error: Mutex<Option<String>> = Mutex::new(None);
        let last_error_ref = &last_error;

        let token = poll_until("login", attempts, interval, monitor, |attempt| async move {
            info!("Login attempt {}/{}", attempt, attempts);
            match authenticator.login().await {
                Ok(token) => match TokenState::of(token.as_ref()) {
                    TokenState::Valid => Ok(token),
                    TokenState::Expired => {
                        warn!("Login attempt {} returned an expired token", attempt);
                        *last_error_ref.lock() = Some("token expired".to_string());
                        Ok(None)
                    }
                    TokenState::Absent => {
                        warn!("Login attempt {} returned no token", attempt);
                        *last_error_ref.lock() = Some("no token returned".to_string());
                        Ok(None)
                    }
                },
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    warn!("Login attempt {} failed: {}", attempt, e);
                    *last_error_ref.lock() = Some(e.to_string());
                    Ok(None)
                }
            }
        })
        .await?;

        match token {
            Some(token) => {
                info!("Login succeeded ({:?} token)", token.kind);
                self.persist(&token);
                *self.current.write() = Some(token.clone());
                Ok(token)
            }
            None => {
                let reason = last_error
                    .lock()
                    .take()
                    .unwrap_or_else(|| "no attempts made".to_string());
                Err(RequestError::LoginFailed(format!(
                    "no valid token after {} attempts: {}",
                    attempts, reason
                )))
            }
        }
    }

    fn persist(&self, token: &LoginToken) {
        if let Some(sso) = &self.sso {
            if let Err(e) = sso.store.save(&sso.target, token) {
                warn!("Failed to persist token for {}: {}", sso.target, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MemoryTokenStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Authenticator replaying scripted results, then valid tokens
    pub(crate) struct ScriptedAuthenticator {
        script: Mutex<VecDeque<Result<Option<LoginToken>, RequestError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedAuthenticator {
        pub(crate) fn new(script: Vec<Result<Option<LoginToken>, RequestError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn always_valid() -> Self {
            Self::new(Vec::new())
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn login(&self) -> Result<Option<LoginToken>, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Some(valid_token())))
        }
    }

    pub(crate) fn valid_token() -> LoginToken {
        LoginToken::new(
            TokenKind::Bearer,
            "fresh",
            Some(Utc::now() + chrono::Duration::hours(1)),
        )
    }

    fn expired_token() -> LoginToken {
        LoginToken::new(
            TokenKind::Bearer,
            "stale",
            Some(Utc::now() - chrono::Duration::minutes(1)),
        )
    }

    #[test]
    fn test_token_state() {
        assert_eq!(TokenState::of(None), TokenState::Absent);
        let empty = LoginToken::new(TokenKind::Passcode, "", None);
        assert_eq!(empty.state(), TokenState::Absent);
        assert_eq!(expired_token().state(), TokenState::Expired);
        assert!(valid_token().state().is_valid());
        let no_expiry = LoginToken::new(TokenKind::Refresh, "r", None);
        assert!(no_expiry.state().is_valid());
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = LoginToken::new(TokenKind::Bearer, "super-secret", None);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("12 bytes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalate_retries_until_valid() {
        let auth = Arc::new(ScriptedAuthenticator::new(vec![
            Err(RequestError::Transport("connection reset".to_string())),
            Ok(Some(expired_token())),
            Ok(None),
        ]));
        let escalation = LoginEscalation::new(auth.clone());
        let monitor = ProgressMonitor::new();
        let start = tokio::time::Instant::now();

        let token = escalation
            .escalate(5, Duration::from_secs(2), &monitor)
            .await
            .unwrap();

        assert_eq!(token.value, "fresh");
        assert_eq!(auth.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalate_gives_up() {
        let auth = Arc::new(ScriptedAuthenticator::new(vec![
            Ok(None),
            Ok(None),
            Err(RequestError::Unauthorized("bad password".to_string())),
        ]));
        let escalation = LoginEscalation::new(auth.clone());
        let monitor = ProgressMonitor::new();

        let err = escalation
            .escalate(3, Duration::from_secs(2), &monitor)
            .await
            .unwrap_err();

        assert_eq!(auth.calls(), 3);
        match err {
            RequestError::LoginFailed(msg) => assert!(msg.contains("bad password")),
            other => panic!("Expected LoginFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_escalate_persists_for_sso() {
        let store = Arc::new(MemoryTokenStore::new());
        let escalation = LoginEscalation::new(Arc::new(ScriptedAuthenticator::always_valid()))
            .with_sso_store("https://api.sso.example.com", store.clone());

        escalation
            .escalate(3, Duration::from_millis(10), &ProgressMonitor::new())
            .await
            .unwrap();

        let stored = store.load("https://api.sso.example.com").unwrap();
        assert_eq!(stored.map(|t| t.value), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_restore_and_current_token() {
        let store = Arc::new(MemoryTokenStore::new());
        let target = "https://api.sso.example.com";
        let escalation = LoginEscalation::new(Arc::new(ScriptedAuthenticator::always_valid()))
            .with_sso_store(target, store.clone());

        assert!(escalation.restore().is_none());
        assert!(escalation.current_token().is_none());

        store.save(target, &expired_token()).unwrap();
        assert!(escalation.restore().is_none());

        store.save(target, &valid_token()).unwrap();
        assert_eq!(escalation.restore().map(|t| t.value), Some("fresh".to_string()));
        assert!(escalation.current_token().is_some());
    }

    #[tokio::test]
    async fn test_escalate_cancelled() {
        let auth = Arc::new(ScriptedAuthenticator::new(vec![Err(RequestError::Cancelled)]));
        let escalation = LoginEscalation::new(auth.clone());

        let err = escalation
            .escalate(3, Duration::from_secs(2), &ProgressMonitor::new())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(auth.calls(), 1);
    }
}
