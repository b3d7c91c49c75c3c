//! SSH module - file access on application instances
//!
//! This module provides pooled SSH sessions using the russh library.
//!
//! # Features
//! - One-time passcode authentication through the platform SSH proxy
//! - Host key verification against the advertised fingerprint
//! - Session reuse per application instance
//! - Shared connection budget with back-pressure
//! - Directory listing and file reading

mod client;
mod command;
mod config;
mod error;
pub mod pool;
mod session;

pub use client::{
    connect_with_password, fingerprint_matches, md5_fingerprint, sha256_fingerprint,
    CfSshConnector, ClientHandler, PasscodeSource,
};
pub use command::{parse_listing, RemoteCommand, RemoteEntry};
pub use config::SshEndpoint;
pub use error::SshError;
pub use pool::{BudgetSlot, ConnectionBudget, PoolStats, SessionKey, SshSessionPool};
pub use session::{RemoteSession, SshConnector, SshSession};
