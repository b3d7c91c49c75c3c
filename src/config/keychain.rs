//! Token Persistence
//!
//! Per-target storage for login tokens of single-sign-on targets. The
//! `Keychain` store uses the system keychain through the `keyring` crate;
//! `MemoryTokenStore` keeps tokens for the lifetime of the process.

use dashmap::DashMap;
use keyring::Entry;

use crate::request::login::LoginToken;

/// Service name for keychain entries
const SERVICE_NAME: &str = "org.cloudfoundry.client";

#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Stored token is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage for tokens keyed by target (API URL)
pub trait TokenStore: Send + Sync {
    fn load(&self, target: &str) -> Result<Option<LoginToken>, KeychainError>;

    fn save(&self, target: &str, token: &LoginToken) -> Result<(), KeychainError>;

    fn clear(&self, target: &str) -> Result<(), KeychainError>;
}

/// System keychain backed token store
pub struct Keychain {
    service: String,
}

impl Keychain {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Create with custom service name (for testing)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, target: &str) -> Result<Entry, KeychainError> {
        // Explicit username keeps the keychain identity stable on macOS
        let username = whoami::username();
        Ok(Entry::new(&self.service, &format!("{}@{}", username, target))?)
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for Keychain {
    fn load(&self, target: &str) -> Result<Option<LoginToken>, KeychainError> {
        match self.entry(target)?.get_password() {
            Ok(secret) => {
                tracing::debug!("Keychain load: target={}, len={}", target, secret.len());
                Ok(Some(serde_json::from_str(&secret)?))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                tracing::error!("Keychain load failed: target={}, error={:?}", target, e);
                Err(KeychainError::Keyring(e))
            }
        }
    }

    fn save(&self, target: &str, token: &LoginToken) -> Result<(), KeychainError> {
        tracing::info!("Keychain save: service={}, target={}", self.service, target);
        let secret = serde_json::to_string(token)?;
        let entry = self.entry(target)?;
        entry.set_password(&secret)?;

        // Read back to catch silently dropped writes
        match entry.get_password() {
            Ok(read_back) if read_back == secret => Ok(()),
            Ok(_) => {
                tracing::error!("Keychain save verification failed: content mismatch");
                Err(KeychainError::Keyring(keyring::Error::NoEntry))
            }
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }

    fn clear(&self, target: &str) -> Result<(), KeychainError> {
        match self.entry(target)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }
}

/// In-process token store
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, LoginToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, target: &str) -> Result<Option<LoginToken>, KeychainError> {
        Ok(self.tokens.get(target).map(|t| t.value().clone()))
    }

    fn save(&self, target: &str, token: &LoginToken) -> Result<(), KeychainError> {
        self.tokens.insert(target.to_string(), token.clone());
        Ok(())
    }

    fn clear(&self, target: &str) -> Result<(), KeychainError> {
        self.tokens.remove(target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::login::TokenKind;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        let target = "https://api.example.com";
        assert!(store.load(target).unwrap().is_none());

        let token = LoginToken::new(TokenKind::Bearer, "abc", None);
        store.save(target, &token).unwrap();
        assert_eq!(store.load(target).unwrap(), Some(token));

        store.clear(target).unwrap();
        assert!(store.load(target).unwrap().is_none());
    }

    #[test]
    #[ignore] // Needs a real system keychain: cargo test keychain -- --ignored
    fn test_keychain_operations() {
        let keychain = Keychain::with_service("org.cloudfoundry.client.test");
        let target = "https://api.test.example.com";
        let token = LoginToken::new(TokenKind::Refresh, "refresh-secret", None);

        keychain.save(target, &token).unwrap();
        assert_eq!(keychain.load(target).unwrap(), Some(token));

        keychain.clear(target).unwrap();
        assert!(keychain.load(target).unwrap().is_none());
    }
}
