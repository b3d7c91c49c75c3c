//! SSH Client implementation using russh
//!
//! Application instances are reached through the platform SSH proxy. The
//! user name encodes the target (`cf:<app-guid>/<instance>`) and the password
//! is a one-time passcode obtained from the login server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::Md5;
use russh::client;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::SshEndpoint;
use super::error::SshError;
use super::pool::SessionKey;
use super::session::{RemoteSession, SshConnector, SshSession};
use crate::config::SshPoolSettings;
use crate::request::ProgressMonitor;

/// SHA256 fingerprint in OpenSSH form (`SHA256:<unpadded base64>`)
pub fn sha256_fingerprint(key: &PublicKey) -> String {
    let hash = Sha256::digest(key.public_key_bytes());
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// MD5 fingerprint as lowercase colon-separated hex
pub fn md5_fingerprint(key: &PublicKey) -> String {
    let hash = Md5::digest(key.public_key_bytes());
    hash.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compare an advertised fingerprint against the server key.
///
/// Accepts `SHA256:<base64>` (padding optional), bare SHA256 base64, and MD5
/// colon-hex. Any other format never matches.
pub fn fingerprint_matches(expected: &str, key: &PublicKey) -> bool {
    let expected = expected.trim();

    if let Some(b64) = expected.strip_prefix("SHA256:") {
        return b64.trim_end_matches('=') == &sha256_fingerprint(key)["SHA256:".len()..];
    }

    if expected.len() == 47 && expected.split(':').count() == 16 {
        return expected.eq_ignore_ascii_case(&md5_fingerprint(key));
    }

    // 32 bytes of unpadded base64
    if expected.trim_end_matches('=').len() == 43 {
        return expected.trim_end_matches('=') == &sha256_fingerprint(key)["SHA256:".len()..];
    }

    warn!("Unsupported host key fingerprint format: {}", expected);
    false
}

/// Client handler for russh callbacks
///
/// Verifies the server key against the fingerprint the API advertises for the
/// SSH proxy. Without an advertised fingerprint every key is accepted.
pub struct ClientHandler {
    host: String,
    expected_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: String, expected_fingerprint: Option<String>) -> Self {
        Self {
            host,
            expected_fingerprint,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(expected) = &self.expected_fingerprint else {
            debug!("No fingerprint advertised for {}, accepting host key", self.host);
            return Ok(true);
        };

        if fingerprint_matches(expected, server_public_key) {
            info!("Host key verified for {}", self.host);
            Ok(true)
        } else {
            let actual = sha256_fingerprint(server_public_key);
            warn!(
                "HOST KEY MISMATCH for {}! Expected {}, got {}",
                self.host, expected, actual
            );
            Err(SshError::HostKeyMismatch {
                host: self.host.clone(),
                expected: expected.clone(),
                actual,
            })
        }
    }
}

/// Open and authenticate a password session against `endpoint`
pub async fn connect_with_password(
    endpoint: &SshEndpoint,
    username: &str,
    password: &str,
) -> Result<SshSession, SshError> {
    let addr = endpoint.address();
    info!("Connecting to SSH server at {} as {}", addr, username);

    let ssh_config = client::Config {
        inactivity_timeout: Some(Duration::from_secs(300)),
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler::new(endpoint.host.clone(), endpoint.host_key_fingerprint.clone());

    // Connect with timeout
    let mut handle = tokio::time::timeout(
        endpoint.connect_timeout(),
        client::connect(Arc::new(ssh_config), addr.clone(), handler),
    )
    .await
    .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
    .map_err(|e| match e {
        SshError::HostKeyMismatch { .. } => e,
        other => SshError::ConnectionFailed(other.to_string()),
    })?;

    debug!("SSH handshake completed");

    let authenticated = handle
        .authenticate_password(username, password)
        .await
        .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

    if !authenticated.success() {
        return Err(SshError::AuthenticationFailed(
            "Authentication rejected by server".to_string(),
        ));
    }

    info!("SSH authentication successful");
    Ok(SshSession::new(handle, endpoint.command_timeout()))
}

/// Supplies one-time SSH passcodes
#[async_trait]
pub trait PasscodeSource: Send + Sync {
    async fn passcode(&self) -> Result<String, SshError>;
}

/// Connector for application instances behind the platform SSH proxy
pub struct CfSshConnector {
    endpoint: SshEndpoint,
    passcodes: Arc<dyn PasscodeSource>,
}

impl CfSshConnector {
    pub fn new(endpoint: SshEndpoint, passcodes: Arc<dyn PasscodeSource>) -> Self {
        Self {
            endpoint,
            passcodes,
        }
    }

    /// Apply the pool's connect and command timeouts to `endpoint`
    pub fn with_settings(
        endpoint: SshEndpoint,
        settings: &SshPoolSettings,
        passcodes: Arc<dyn PasscodeSource>,
    ) -> Self {
        let endpoint = endpoint.with_timeouts(settings.connect_timeout(), settings.command_timeout());
        Self::new(endpoint, passcodes)
    }

    pub fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Proxy user name selecting the app instance
    pub fn username(key: &SessionKey) -> String {
        format!("cf:{}/{}", key.app_guid, key.instance)
    }
}

#[async_trait]
impl SshConnector for CfSshConnector {
    async fn connect(
        &self,
        key: &SessionKey,
        monitor: &ProgressMonitor,
    ) -> Result<Box<dyn RemoteSession>, SshError> {
        if monitor.is_cancelled() {
            return Err(SshError::Cancelled);
        }
        monitor.set_task(format!("Connecting to {}", key));

        let passcode = self.passcodes.passcode().await?;
        let session = connect_with_password(&self.endpoint, &Self::username(key), &passcode).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_encodes_instance() {
        let key = SessionKey::new("5d4e3c2b-0000-1111-2222-333344445555", 2);
        assert_eq!(
            CfSshConnector::username(&key),
            "cf:5d4e3c2b-0000-1111-2222-333344445555/2"
        );
    }

    struct FixedPasscode;

    #[async_trait]
    impl PasscodeSource for FixedPasscode {
        async fn passcode(&self) -> Result<String, SshError> {
            Ok("abc123".to_string())
        }
    }

    #[test]
    fn test_with_settings_applies_timeouts() {
        let settings = SshPoolSettings {
            connect_timeout_secs: 10,
            command_timeout_secs: 45,
            ..Default::default()
        };
        let connector = CfSshConnector::with_settings(
            SshEndpoint::new("ssh.example.com", 2222),
            &settings,
            Arc::new(FixedPasscode),
        );
        assert_eq!(connector.endpoint().connect_timeout(), Duration::from_secs(10));
        assert_eq!(connector.endpoint().command_timeout(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_connect_checks_cancellation_first() {
        let connector = CfSshConnector::new(
            SshEndpoint::new("ssh.example.com", 2222),
            Arc::new(FixedPasscode),
        );
        let monitor = ProgressMonitor::new();
        monitor.cancel();

        let result = connector.connect(&SessionKey::new("guid", 0), &monitor).await;
        assert!(matches!(result, Err(SshError::Cancelled)));
    }

    #[test]
    fn test_fingerprint_formats() {
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti user@example.com",
        )
        .unwrap();

        assert!(!fingerprint_matches("not-a-fingerprint", &key));
        assert!(fingerprint_matches(&sha256_fingerprint(&key), &key));
        assert!(fingerprint_matches(&md5_fingerprint(&key), &key));
        assert!(fingerprint_matches(&md5_fingerprint(&key).to_uppercase(), &key));

        let bare = sha256_fingerprint(&key)["SHA256:".len()..].to_string();
        assert!(fingerprint_matches(&format!("{}=", bare), &key));
    }
}
