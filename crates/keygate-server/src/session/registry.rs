//! Session registry.
//!
//! Maps a connection key to the login resolved during authentication.
//! Written by the authentication gate, read by the connection handler,
//! and cleared by a [`SessionGuard`] when the connection task ends.

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Identifies one accepted connection.
///
/// The remote address alone is not unique (NAT, reconnects), so the
/// acceptor pairs it with a process-wide monotonic sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub remote: SocketAddr,
    pub seq: u64,
}

impl ConnectionKey {
    pub fn new(remote: SocketAddr, seq: u64) -> Self {
        Self { remote, seq }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.remote, self.seq)
    }
}

/// Which strategy resolved the login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    PublicKey,
    Interactive,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey => f.write_str("publickey"),
            AuthMethod::Interactive => f.write_str("keyboard-interactive"),
        }
    }
}

/// State recorded for an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Resolved login.
    pub login: String,
    /// Strategy that resolved it.
    pub method: AuthMethod,
    /// When authentication completed.
    pub authenticated_at: SystemTime,
}

impl SessionState {
    pub fn new(login: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            login: login.into(),
            method,
            authenticated_at: SystemTime::now(),
        }
    }

    /// Time since authentication completed; zero if the clock went back.
    pub fn age(&self) -> Duration {
        self.authenticated_at.elapsed().unwrap_or_default()
    }
}

/// Concurrency-safe store of per-connection session state.
///
/// Implementations must never block on I/O while holding internal locks.
pub trait SessionRegistry: Send + Sync {
    /// Insert or replace the state for a connection.
    fn set(&self, key: ConnectionKey, state: SessionState);

    /// Get a copy of the state for a connection.
    fn get(&self, key: &ConnectionKey) -> Option<SessionState>;

    /// Remove the state for a connection, returning it if present.
    fn remove(&self, key: &ConnectionKey) -> Option<SessionState>;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory registry backed by a sharded map, so lookups on distinct
/// keys do not contend on a single lock.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    sessions: DashMap<ConnectionKey, SessionState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl SessionRegistry for MemoryRegistry {
    fn set(&self, key: ConnectionKey, state: SessionState) {
        self.sessions.insert(key, state);
    }

    fn get(&self, key: &ConnectionKey) -> Option<SessionState> {
        self.sessions.get(key).map(|entry| entry.clone())
    }

    fn remove(&self, key: &ConnectionKey) -> Option<SessionState> {
        self.sessions.remove(key).map(|(_, state)| state)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Removes a connection's session state when dropped.
///
/// Created at the start of a connection task and held for its whole
/// lifetime, so every exit path (clean close, handshake failure, timeout,
/// panic unwind) clears the entry.
pub struct SessionGuard {
    registry: Arc<dyn SessionRegistry>,
    key: ConnectionKey,
}

impl SessionGuard {
    pub fn new(registry: Arc<dyn SessionRegistry>, key: ConnectionKey) -> Self {
        Self { registry, key }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(state) = self.registry.remove(&self.key) {
            debug!(
                conn = %self.key,
                login = %state.login,
                held_secs = state.age().as_secs(),
                "session state released"
            );
        }
    }
}
