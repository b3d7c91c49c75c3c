//! SSH Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SshError;

/// Where and how to reach the application SSH proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshEndpoint {
    /// SSH proxy host
    pub host: String,

    /// SSH proxy port (default: 2222)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Fingerprint the proxy advertises, either `SHA256:<base64>` style or
    /// MD5 colon-hex. `None` accepts any key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command timeout in seconds
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
}

fn default_port() -> u16 {
    2222
}

fn default_timeout() -> u64 {
    30
}

impl SshEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            host_key_fingerprint: None,
            connect_timeout_secs: default_timeout(),
            command_timeout_secs: default_timeout(),
        }
    }

    /// Parse the `host:port` form advertised by the API info endpoint
    pub fn parse(endpoint: &str) -> Result<Self, SshError> {
        let endpoint = endpoint.trim();
        match endpoint.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    SshError::ConnectionFailed(format!("Invalid SSH endpoint port: {}", endpoint))
                })?;
                Ok(Self::new(host, port))
            }
            None if !endpoint.is_empty() => Ok(Self::new(endpoint, default_port())),
            _ => Err(SshError::ConnectionFailed(format!(
                "Invalid SSH endpoint: {:?}",
                endpoint
            ))),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        self.host_key_fingerprint = (!fingerprint.is_empty()).then_some(fingerprint);
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout_secs = connect.as_secs();
        self.command_timeout_secs = command.as_secs();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let endpoint = SshEndpoint::parse("ssh.example.com:2222").unwrap();
        assert_eq!(endpoint.host, "ssh.example.com");
        assert_eq!(endpoint.port, 2222);
        assert_eq!(endpoint.address(), "ssh.example.com:2222");

        let bare = SshEndpoint::parse("ssh.example.com").unwrap();
        assert_eq!(bare.port, 2222);

        assert!(SshEndpoint::parse("ssh.example.com:nope").is_err());
        assert!(SshEndpoint::parse("").is_err());
        assert!(SshEndpoint::parse(":22").is_err());
    }

    #[test]
    fn test_empty_fingerprint_is_none() {
        let endpoint = SshEndpoint::new("h", 22).with_fingerprint("");
        assert!(endpoint.host_key_fingerprint.is_none());
    }

    #[test]
    fn test_deserialize_defaults() {
        let endpoint: SshEndpoint = serde_json::from_str(r#"{"host":"ssh.example.com"}"#).unwrap();
        assert_eq!(endpoint.port, 2222);
        assert_eq!(endpoint.connect_timeout(), Duration::from_secs(30));
        assert_eq!(endpoint.command_timeout(), Duration::from_secs(30));
    }
}
