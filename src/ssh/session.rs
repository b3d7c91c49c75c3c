//! SSH Session management
//!
//! [`RemoteSession`] is one authenticated connection that can run commands;
//! [`SshConnector`] creates them. The pool only talks to these traits, so the
//! russh-backed [`SshSession`] can be swapped out in tests.

use std::time::Duration;

use async_trait::async_trait;
use russh::client::Handle;
use russh::ChannelMsg;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::client::ClientHandler;
use super::error::SshError;
use super::pool::SessionKey;
use crate::request::ProgressMonitor;

/// An authenticated connection to an application instance
#[async_trait]
pub trait RemoteSession: Send {
    /// Run one command on a fresh exec channel and return its stdout.
    ///
    /// A non-zero exit status is reported as [`SshError::CommandFailed`].
    async fn exec(&mut self, command: &str) -> Result<String, SshError>;

    /// Disconnect. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Opens new sessions for a [`SessionKey`]
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(
        &self,
        key: &SessionKey,
        monitor: &ProgressMonitor,
    ) -> Result<Box<dyn RemoteSession>, SshError>;
}

/// russh-backed session
pub struct SshSession {
    handle: Handle<ClientHandler>,
    command_timeout: Duration,
}

impl SshSession {
    pub fn new(handle: Handle<ClientHandler>, command_timeout: Duration) -> Self {
        Self {
            handle,
            command_timeout,
        }
    }
}

/// Collected output of one exec channel
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<String, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to open exec channel: {}", e)))?;

        debug!("SSH exec: {}", command);

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to execute command: {}", e)))?;

        let mut output = ExecOutput::default();

        // Use timeout to prevent hanging
        let collected = timeout(self.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        output.stdout.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        // ext=1 is stderr
                        output.stderr.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        output.exit_status = Some(exit_status);
                    }
                    // Exit status may still follow EOF
                    Some(ChannelMsg::Eof) => {}
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        if collected.is_err() {
            warn!("SSH exec timed out after {:?}: {}", self.command_timeout, command);
            return Err(SshError::Timeout(format!(
                "Command timed out after {:?}",
                self.command_timeout
            )));
        }

        let _ = channel.close().await;

        match output.exit_status {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(status) => Err(SshError::CommandFailed {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(SshError::ChannelError(
                "Channel closed without exit status".to_string(),
            )),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("SSH disconnect failed: {}", e);
        }
    }
}
