//! Diagnostics endpoint.
//!
//! A separate HTTP listener exposing process counters as JSON at
//! `GET /debug/vars`. It runs in its own task; failures here are logged
//! and never affect the SSH listener.

use crate::session::SessionRegistry;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Process-wide counters, updated lock-free from every connection task.
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    pub connections_accepted: AtomicU64,
    pub accept_errors: AtomicU64,
    pub handshake_timeouts: AtomicU64,
    pub pubkey_permits: AtomicU64,
    pub pubkey_rejects: AtomicU64,
    pub store_failures: AtomicU64,
    pub interactive_permits: AtomicU64,
    pub interactive_denials: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            handshake_timeouts: AtomicU64::new(0),
            pubkey_permits: AtomicU64::new(0),
            pubkey_rejects: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            interactive_permits: AtomicU64::new(0),
            interactive_denials: AtomicU64::new(0),
        }
    }
}

/// Increment a counter.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of [`ServerStats`] plus registry size.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub connections_accepted: u64,
    pub accept_errors: u64,
    pub handshake_timeouts: u64,
    pub pubkey_permits: u64,
    pub pubkey_rejects: u64,
    pub store_failures: u64,
    pub interactive_permits: u64,
    pub interactive_denials: u64,
    pub active_sessions: usize,
}

impl ServerStats {
    pub fn snapshot(&self, registry: &dyn SessionRegistry) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            connections_accepted: load(&self.connections_accepted),
            accept_errors: load(&self.accept_errors),
            handshake_timeouts: load(&self.handshake_timeouts),
            pubkey_permits: load(&self.pubkey_permits),
            pubkey_rejects: load(&self.pubkey_rejects),
            store_failures: load(&self.store_failures),
            interactive_permits: load(&self.interactive_permits),
            interactive_denials: load(&self.interactive_denials),
            active_sessions: registry.len(),
        }
    }
}

#[derive(Clone)]
struct DiagnosticsState {
    stats: Arc<ServerStats>,
    registry: Arc<dyn SessionRegistry>,
}

async fn vars(State(state): State<DiagnosticsState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot(state.registry.as_ref()))
}

fn router(stats: Arc<ServerStats>, registry: Arc<dyn SessionRegistry>) -> Router {
    Router::new()
        .route("/debug/vars", get(vars))
        .with_state(DiagnosticsState { stats, registry })
}

/// Spawn the diagnostics listener on `addr`.
pub fn spawn(addr: String, stats: Arc<ServerStats>, registry: Arc<dyn SessionRegistry>) {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %addr, error = %e, "diagnostics bind failed");
                return;
            }
        };
        info!(addr = %addr, "diagnostics endpoint listening");
        if let Err(e) = axum::serve(listener, router(stats, registry)).await {
            error!(error = %e, "diagnostics endpoint stopped");
        }
    });
}
