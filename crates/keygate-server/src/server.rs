//! Core server: accepts connections and runs each one through the SSH
//! handshake.
//!
//! [`ServerContext`] is assembled once at startup and shared read-mostly by
//! every connection task. The accept loop only waits for the next client
//! and hands it off; all per-connection work happens in its own task.

use crate::auth::{AuthenticationGate, ServerRateLimits};
use crate::connection::ConnectionSession;
use crate::diagnostics::{bump, ServerStats};
use crate::handler::ConnectionHandler;
use crate::session::{ConnectionKey, SessionGuard, SessionRegistry};
use crate::store::IdentityStore;
use crate::verifier::IdentityVerifier;
use keygate_core::{GateError, GateResult};
use russh::keys::PrivateKey;
use russh::{Disconnect, MethodKind, MethodSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so resource exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How long to wait for a timed-out client to be disconnected.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// How often expired rate-limit windows are dropped.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Tunables for [`ServerContext::new`].
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub handshake_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub max_auth_attempts: usize,
    pub interactive_attempts: u32,
}

/// Process-wide state shared by all connections.
pub struct ServerContext {
    /// Decides every authentication attempt.
    pub gate: AuthenticationGate,
    /// Session state per live connection.
    pub registry: Arc<dyn SessionRegistry>,
    /// Consumes authenticated channels.
    pub handler: Arc<dyn ConnectionHandler>,
    /// Interactive attempt limits.
    pub rate_limits: Mutex<ServerRateLimits>,
    /// Counters for the diagnostics endpoint.
    pub stats: Arc<ServerStats>,
    /// Transport configuration (host key, methods, timeouts).
    pub russh_config: Arc<russh::server::Config>,
    /// Deadline for a client to finish authenticating.
    pub handshake_timeout: Duration,
    /// Monotonic connection sequence.
    next_seq: AtomicU64,
}

impl ServerContext {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        verifier: Arc<dyn IdentityVerifier>,
        registry: Arc<dyn SessionRegistry>,
        handler: Arc<dyn ConnectionHandler>,
        host_key: PrivateKey,
        settings: ContextSettings,
    ) -> Self {
        let stats = Arc::new(ServerStats::default());
        let gate = AuthenticationGate::new(store, verifier, registry.clone(), stats.clone());

        let russh_config = Arc::new(russh::server::Config {
            keys: vec![host_key],
            methods: MethodSet::from(&[MethodKind::PublicKey, MethodKind::KeyboardInteractive][..]),
            inactivity_timeout: Some(settings.inactivity_timeout),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            max_auth_attempts: settings.max_auth_attempts,
            ..Default::default()
        });

        Self {
            gate,
            registry,
            handler,
            rate_limits: Mutex::new(ServerRateLimits::new(settings.interactive_attempts)),
            stats,
            russh_config,
            handshake_timeout: settings.handshake_timeout,
            next_seq: AtomicU64::new(1),
        }
    }

    fn next_key(&self, remote: std::net::SocketAddr) -> ConnectionKey {
        ConnectionKey::new(remote, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }
}

/// Bind the SSH listener. Failure here is fatal to the caller.
pub async fn bind(addr: &str) -> GateResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GateError::Transport(format!("bind {addr} failed: {e}")))?;
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "SSH listener bound");
    }
    Ok(listener)
}

/// Accept connections forever, one task per connection.
pub async fn run(ctx: Arc<ServerContext>, listener: TcpListener) {
    let gc_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(GC_INTERVAL);
        loop {
            interval.tick().await;
            let mut limits = gc_ctx.rate_limits.lock().await;
            limits.gc();
            debug!(tracked_ips = limits.interactive.tracked(), "rate limit windows collected");
        }
    });

    info!(
        handshake_timeout_secs = ctx.handshake_timeout.as_secs(),
        "keygate-server ready"
    );

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                bump(&ctx.stats.connections_accepted);
                let key = ctx.next_key(remote);
                debug!(conn = %key, "connection accepted");
                tokio::spawn(serve_connection(ctx.clone(), stream, key));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                bump(&ctx.stats.accept_errors);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Run one connection and record how it ended.
///
/// The session guard is held for the whole task, so the connection's
/// registry entry is removed on every exit path.
async fn serve_connection(ctx: Arc<ServerContext>, stream: TcpStream, key: ConnectionKey) {
    let _guard = SessionGuard::new(ctx.registry.clone(), key.clone());

    match drive_connection(&ctx, stream, &key).await {
        Ok(()) => debug!(conn = %key, "connection closed"),
        Err(e @ GateError::Timeout(_)) => {
            warn!(conn = %key, error = %e, "handshake timed out");
            bump(&ctx.stats.handshake_timeouts);
        }
        Err(e) => debug!(conn = %key, error = %e, "connection ended with error"),
    }
}

/// Drive one connection from handshake to close.
async fn drive_connection(
    ctx: &Arc<ServerContext>,
    stream: TcpStream,
    key: &ConnectionKey,
) -> GateResult<()> {
    let deadline = Instant::now() + ctx.handshake_timeout;
    let timed_out = || {
        GateError::Timeout(format!(
            "not authenticated within {}s",
            ctx.handshake_timeout.as_secs_f32()
        ))
    };

    let (auth_tx, auth_rx) = oneshot::channel();
    let handler = ConnectionSession::new(ctx.clone(), key.clone(), auth_tx);

    let running = tokio::time::timeout_at(
        deadline,
        russh::server::run_stream(ctx.russh_config.clone(), stream, handler),
    )
    .await
    .map_err(|_| timed_out())?
    .map_err(|e| GateError::Transport(format!("protocol exchange failed: {e}")))?;

    let handle = running.handle();
    tokio::pin!(running);

    tokio::select! {
        result = &mut running => {
            return result.map_err(|e| GateError::Transport(e.to_string()));
        }
        _ = auth_rx => {}
        _ = tokio::time::sleep_until(deadline) => {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication timeout".into(), "en".into())
                .await;
            let _ = tokio::time::timeout(DISCONNECT_GRACE, &mut running).await;
            return Err(timed_out());
        }
    }

    running
        .await
        .map_err(|e| GateError::Transport(e.to_string()))
}
