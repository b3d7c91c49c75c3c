//! SSH Session Pool
//!
//! Keeps authenticated sessions per application instance and reuses them for
//! file listing/reading. The number of physically open connections is bounded
//! by a [`ConnectionBudget`], which several pools may share.
//!
//! # Session lifecycle
//!
//! ```text
//!   NoSession ──reserve slot──► Connecting ──ok──► Leased ──ok / exit≠0──► Available
//!       ▲                           │                 │                       │
//!       │                      connect error     I/O error                  lease
//!       │                           ▼                 ▼                       │
//!       └────── slot freed ◄──── Destroyed ◄──────────┘            Leased ◄───┘
//! ```
//!
//! A session is always in exactly one place: the available list of its key,
//! the hands of a single caller, or gone. Dropping a session frees its slot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::{parse_listing, RemoteCommand, RemoteEntry};
use super::error::SshError;
use super::session::{RemoteSession, SshConnector};
use crate::config::SshPoolSettings;
use crate::request::ProgressMonitor;

/// Identifies one application instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_guid: String,
    pub instance: u32,
}

impl SessionKey {
    pub fn new(app_guid: impl Into<String>, instance: u32) -> Self {
        Self {
            app_guid: app_guid.into(),
            instance,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_guid, self.instance)
    }
}

/// Upper bound on open connections
#[derive(Debug)]
pub struct ConnectionBudget {
    max: usize,
    active: AtomicUsize,
}

impl ConnectionBudget {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max,
            active: AtomicUsize::new(0),
        })
    }

    /// Reserve a slot if one is free. Check and increment are one atomic step.
    pub fn try_reserve(self: &Arc<Self>) -> Option<BudgetSlot> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|prev| {
                debug!("Connection slot reserved ({}/{})", prev + 1, self.max);
                BudgetSlot {
                    budget: Arc::clone(self),
                }
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// RAII guard for one reserved connection slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct BudgetSlot {
    budget: Arc<ConnectionBudget>,
}

impl Drop for BudgetSlot {
    fn drop(&mut self) {
        let result = self
            .budget
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(prev) => debug!("Connection slot freed ({}/{})", prev - 1, self.budget.max),
            Err(_) => warn!("Connection slot freed with active count already 0"),
        }
    }
}

/// A session together with the slot it occupies
struct PooledSession {
    id: Uuid,
    session: Box<dyn RemoteSession>,
    _slot: BudgetSlot,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections across every pool sharing the budget
    pub active_connections: usize,
    pub max_connections: usize,
    /// Sessions of this pool waiting to be leased
    pub idle_sessions: usize,
    /// Keys with at least one idle session
    pub keys: usize,
}

/// Per-instance SSH session pool
pub struct SshSessionPool {
    connector: Arc<dyn SshConnector>,
    settings: SshPoolSettings,
    sessions: Mutex<HashMap<SessionKey, Vec<PooledSession>>>,
    budget: Arc<ConnectionBudget>,
}

impl SshSessionPool {
    /// Create a pool with its own budget of `settings.max_active_connections`
    pub fn new(connector: Arc<dyn SshConnector>, settings: SshPoolSettings) -> Self {
        let budget = ConnectionBudget::new(settings.max_active_connections);
        Self::with_budget(connector, settings, budget)
    }

    /// Create a pool drawing from a shared budget
    pub fn with_budget(
        connector: Arc<dyn SshConnector>,
        settings: SshPoolSettings,
        budget: Arc<ConnectionBudget>,
    ) -> Self {
        Self {
            connector,
            settings,
            sessions: Mutex::new(HashMap::new()),
            budget,
        }
    }

    pub fn budget(&self) -> &Arc<ConnectionBudget> {
        &self.budget
    }

    /// List a directory on the instance
    pub async fn list_directory(
        &self,
        key: &SessionKey,
        path: &str,
        monitor: &ProgressMonitor,
    ) -> Result<Vec<RemoteEntry>, SshError> {
        let output = self
            .process_request(key, &RemoteCommand::ListDirectory(path.to_string()), monitor)
            .await?;
        Ok(parse_listing(&output))
    }

    /// Read a file on the instance
    pub async fn read_file(
        &self,
        key: &SessionKey,
        path: &str,
        monitor: &ProgressMonitor,
    ) -> Result<String, SshError> {
        self.process_request(key, &RemoteCommand::ReadFile(path.to_string()), monitor)
            .await
    }

    /// Run `command` on a pooled (or new) session for `key`.
    ///
    /// Connection and I/O failures are retried until the attempt-time budget
    /// runs out, then reported as [`SshError::ConnectionUnavailable`]. A
    /// non-zero exit status or a host key mismatch is returned right away.
    pub async fn process_request(
        &self,
        key: &SessionKey,
        command: &RemoteCommand,
        monitor: &ProgressMonitor,
    ) -> Result<String, SshError> {
        let start = Instant::now();
        let max_attempt_time = self.settings.max_attempt_time();
        let command_line = command.command_line();
        let mut last_error: Option<SshError> = None;

        loop {
            if monitor.is_cancelled() {
                return Err(SshError::Cancelled);
            }

            let elapsed = start.elapsed();
            if elapsed >= max_attempt_time {
                warn!("Giving up on SSH connection to {} after {:?}", key, elapsed);
                return Err(SshError::ConnectionUnavailable {
                    key: key.clone(),
                    elapsed,
                    source: last_error.map(Box::new),
                });
            }

            let mut pooled = match self.lease(key) {
                Some(pooled) => pooled,
                None => match self.budget.try_reserve() {
                    Some(slot) => match self.open(key, slot, monitor).await {
                        Ok(pooled) => pooled,
                        Err(SshError::Cancelled) => return Err(SshError::Cancelled),
                        Err(e) if e.is_connect_fatal() => {
                            warn!("SSH connection to {} rejected: {}", key, e);
                            return Err(e);
                        }
                        Err(e) => {
                            warn!("SSH connection to {} failed: {}", key, e);
                            last_error = Some(e);
                            self.idle(monitor).await?;
                            continue;
                        }
                    },
                    None => {
                        if !self.evict_idle_other_than(key).await {
                            debug!(
                                "No SSH connection available for {} ({} open), waiting",
                                key,
                                self.budget.active()
                            );
                            self.idle(monitor).await?;
                        }
                        continue;
                    }
                },
            };

            match pooled.session.exec(&command_line).await {
                Ok(output) => {
                    self.release(key, pooled);
                    return Ok(output);
                }
                Err(e) if !e.is_session_fatal() => {
                    self.release(key, pooled);
                    return Err(e);
                }
                Err(e) => {
                    warn!("SSH session {} for {} failed: {}", pooled.id, key, e);
                    self.destroy(pooled).await;
                    last_error = Some(e);
                }
            }
        }
    }

    /// Disconnect every idle session
    pub async fn close_all(&self) {
        let drained: Vec<PooledSession> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().flat_map(|(_, list)| list).collect()
        };

        if !drained.is_empty() {
            info!("Closing {} idle SSH sessions", drained.len());
        }
        for pooled in drained {
            self.destroy(pooled).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let sessions = self.sessions.lock();
        PoolStats {
            active_connections: self.budget.active(),
            max_connections: self.budget.max(),
            idle_sessions: sessions.values().map(Vec::len).sum(),
            keys: sessions.len(),
        }
    }

    fn lease(&self, key: &SessionKey) -> Option<PooledSession> {
        let mut sessions = self.sessions.lock();
        let list = sessions.get_mut(key)?;
        let pooled = list.pop();
        if list.is_empty() {
            sessions.remove(key);
        }
        if let Some(p) = &pooled {
            debug!("Leased SSH session {} for {}", p.id, key);
        }
        pooled
    }

    fn release(&self, key: &SessionKey, pooled: PooledSession) {
        debug!("Released SSH session {} for {}", pooled.id, key);
        self.sessions
            .lock()
            .entry(key.clone())
            .or_default()
            .push(pooled);
    }

    async fn open(
        &self,
        key: &SessionKey,
        slot: BudgetSlot,
        monitor: &ProgressMonitor,
    ) -> Result<PooledSession, SshError> {
        let timeout = self.settings.connect_timeout();
        let session = tokio::time::timeout(timeout, self.connector.connect(key, monitor))
            .await
            .map_err(|_| SshError::Timeout(format!("Connecting to {} timed out", key)))??;

        let pooled = PooledSession {
            id: Uuid::new_v4(),
            session,
            _slot: slot,
        };
        info!("Opened SSH session {} for {}", pooled.id, key);
        Ok(pooled)
    }

    async fn destroy(&self, mut pooled: PooledSession) {
        debug!("Destroying SSH session {}", pooled.id);
        pooled.session.close().await;
        // Slot is freed here
        drop(pooled);
    }

    /// Close one idle session of another key to free its slot.
    /// Returns false if there was none.
    async fn evict_idle_other_than(&self, key: &SessionKey) -> bool {
        let victim = {
            let mut sessions = self.sessions.lock();
            let other = sessions.keys().find(|k| *k != key).cloned();
            other.and_then(|other| {
                let list = sessions.get_mut(&other)?;
                let pooled = list.pop();
                if list.is_empty() {
                    sessions.remove(&other);
                }
                pooled
            })
        };

        match victim {
            Some(pooled) => {
                debug!("Evicting idle SSH session {} to make room for {}", pooled.id, key);
                self.destroy(pooled).await;
                true
            }
            None => false,
        }
    }

    async fn idle(&self, monitor: &ProgressMonitor) -> Result<(), SshError> {
        monitor
            .sleep(self.settings.idle_retry())
            .await
            .map_err(|_| SshError::Cancelled)
    }
}
