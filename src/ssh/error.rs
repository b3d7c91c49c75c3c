//! SSH Error types

use std::time::Duration;

use thiserror::Error;

use super::pool::SessionKey;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Host key mismatch for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    /// The command ran but exited non-zero. The session itself is healthy.
    #[error("Remote command exited with status {status}: {stderr}")]
    CommandFailed { status: u32, stderr: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No SSH connection to {key} after {elapsed:?}{}", .source.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    ConnectionUnavailable {
        key: SessionKey,
        elapsed: Duration,
        #[source]
        source: Option<Box<SshError>>,
    },
}

impl SshError {
    /// Whether the session that produced this error must be thrown away
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, SshError::CommandFailed { .. } | SshError::Cancelled)
    }

    /// Whether a failed connect must not be retried. A host key mismatch
    /// means the proxy is not the one the API advertised.
    pub fn is_connect_fatal(&self) -> bool {
        matches!(self, SshError::HostKeyMismatch { .. })
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}
