//! Configuration Management Module
//!
//! Request/SSH timing settings with on-disk storage, and persistent token
//! storage for single-sign-on targets.

pub mod keychain;
pub mod storage;
pub mod types;

pub use keychain::{Keychain, KeychainError, MemoryTokenStore, TokenStore};
pub use storage::{config_dir, config_file, ConfigStorage, StorageError};
pub use types::{CoreConfig, RequestSettings, SshPoolSettings, CONFIG_VERSION};
