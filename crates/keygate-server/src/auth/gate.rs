//! Authentication gate.
//!
//! Turns a credential presented on a connection into a [`Verdict`]. The
//! gate holds no per-connection state of its own; the only thing it
//! writes is the connection's entry in the session registry.
//!
//! Two strategies, tried by the transport in this order:
//! 1. Public key: exact lookup of the key in the identity store.
//! 2. Interactive: the client names an account and the identity verifier
//!    confirms that account owns a key the client holds.

use crate::diagnostics::{bump, ServerStats};
use crate::session::{AuthMethod, ConnectionKey, SessionRegistry, SessionState};
use crate::store::IdentityStore;
use crate::verifier::IdentityVerifier;
use keygate_core::{algorithm_of, fingerprint, short_fingerprint, GateError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Credential material offered by a client.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Wire encoding of a key whose signature the transport verified.
    PublicKey(&'a [u8]),
    /// Account named in the interactive challenge, with the keys the
    /// client proved possession of earlier on this connection.
    Interactive {
        login: &'a str,
        offered_keys: &'a [Vec<u8>],
    },
}

/// Outcome of one strategy invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Authenticated; the login is recorded in the registry.
    Permit(String),
    /// This credential is unknown. The client may try another.
    Reject,
    /// This credential could not be checked, or verification failed.
    /// Never falls through to another strategy.
    Deny,
}

impl Verdict {
    pub fn is_permit(&self) -> bool {
        matches!(self, Verdict::Permit(_))
    }
}

/// Decides whether a connection may proceed.
pub struct AuthenticationGate {
    store: Arc<dyn IdentityStore>,
    verifier: Arc<dyn IdentityVerifier>,
    registry: Arc<dyn SessionRegistry>,
    stats: Arc<ServerStats>,
}

impl AuthenticationGate {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        verifier: Arc<dyn IdentityVerifier>,
        registry: Arc<dyn SessionRegistry>,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            store,
            verifier,
            registry,
            stats,
        }
    }

    /// Evaluate a credential for a connection.
    pub async fn authenticate(&self, conn: &ConnectionKey, credential: Credential<'_>) -> Verdict {
        match credential {
            Credential::PublicKey(key) => self.public_key(conn, key).await,
            Credential::Interactive {
                login,
                offered_keys,
            } => self.interactive(conn, login, offered_keys).await,
        }
    }

    async fn public_key(&self, conn: &ConnectionKey, key: &[u8]) -> Verdict {
        let fp = fingerprint(key);
        let fp = short_fingerprint(&fp);
        let algorithm = algorithm_of(key).unwrap_or("unknown");

        match self.store.lookup(key).await {
            Ok(Some(login)) => {
                info!(conn = %conn, login = %login, algorithm, fingerprint = %fp, "publickey auth OK");
                self.registry
                    .set(conn.clone(), SessionState::new(login.clone(), AuthMethod::PublicKey));
                bump(&self.stats.pubkey_permits);
                Verdict::Permit(login)
            }
            Ok(None) => {
                debug!(conn = %conn, algorithm, fingerprint = %fp, "no login for key");
                bump(&self.stats.pubkey_rejects);
                Verdict::Reject
            }
            Err(e) => {
                warn!(conn = %conn, fingerprint = %fp, error = %e, "identity store lookup failed");
                bump(&self.stats.store_failures);
                Verdict::Deny
            }
        }
    }

    async fn interactive(&self, conn: &ConnectionKey, login: &str, offered_keys: &[Vec<u8>]) -> Verdict {
        if let Some(existing) = self.registry.get(conn) {
            debug!(conn = %conn, login = %existing.login, "already authenticated, skipping verifier");
            return Verdict::Permit(existing.login);
        }

        // GitHub logins are case-insensitive; one account maps to one login.
        let login = login.trim().to_ascii_lowercase();
        let login = login.as_str();
        if login.is_empty() {
            debug!(conn = %conn, "empty interactive response");
            return self.interactive_denied();
        }
        if offered_keys.is_empty() {
            info!(conn = %conn, login, "no proven keys to verify, denying");
            return self.interactive_denied();
        }

        match self.verifier.verify(login, offered_keys).await {
            Ok(true) => {
                info!(conn = %conn, login, keys = offered_keys.len(), "interactive auth OK");
                self.registry
                    .set(conn.clone(), SessionState::new(login, AuthMethod::Interactive));
                bump(&self.stats.interactive_permits);
                Verdict::Permit(login.to_string())
            }
            Ok(false) => {
                info!(conn = %conn, login, "account owns none of the offered keys");
                self.interactive_denied()
            }
            Err(GateError::RateLimited(reason)) => {
                warn!(conn = %conn, login, reason = %reason, "identity verifier rate limited");
                self.interactive_denied()
            }
            Err(e) => {
                warn!(conn = %conn, login, error = %e, "identity verifier failed");
                self.interactive_denied()
            }
        }
    }

    fn interactive_denied(&self) -> Verdict {
        bump(&self.stats.interactive_denials);
        Verdict::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryRegistry;
    use crate::testing::{MockStore, MockVerifier};
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;

    const K1: &[u8] = b"key-one";
    const K2: &[u8] = b"key-two";
    const K3: &[u8] = b"key-three";

    struct Fixture {
        gate: AuthenticationGate,
        store: Arc<MockStore>,
        verifier: Arc<MockVerifier>,
        registry: Arc<MemoryRegistry>,
        stats: Arc<ServerStats>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MockStore::new().with_key(K1, "alice"));
        let verifier = Arc::new(MockVerifier::new().with_owner("bob", K2));
        let registry = Arc::new(MemoryRegistry::new());
        let stats = Arc::new(ServerStats::default());
        let gate = AuthenticationGate::new(
            store.clone(),
            verifier.clone(),
            registry.clone(),
            stats.clone(),
        );
        Fixture {
            gate,
            store,
            verifier,
            registry,
            stats,
        }
    }

    fn conn(seq: u64) -> ConnectionKey {
        ConnectionKey::new(SocketAddr::from(([198, 51, 100, 7], 50000)), seq)
    }

    #[tokio::test]
    async fn registered_key_is_permitted() {
        let f = fixture();
        let verdict = f.gate.authenticate(&conn(1), Credential::PublicKey(K1)).await;
        assert_eq!(verdict, Verdict::Permit("alice".into()));

        let state = f.registry.get(&conn(1)).unwrap();
        assert_eq!(state.login, "alice");
        assert_eq!(state.method, AuthMethod::PublicKey);
        assert_eq!(f.stats.pubkey_permits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected_without_state() {
        let f = fixture();
        let verdict = f.gate.authenticate(&conn(1), Credential::PublicKey(K2)).await;
        assert_eq!(verdict, Verdict::Reject);
        assert!(f.registry.get(&conn(1)).is_none());
        assert_eq!(f.stats.pubkey_rejects.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn store_outage_denies_even_registered_key() {
        let f = fixture();
        f.store.set_failing(true);
        let verdict = f.gate.authenticate(&conn(1), Credential::PublicKey(K1)).await;
        assert_eq!(verdict, Verdict::Deny);
        assert!(f.registry.get(&conn(1)).is_none());
        assert_eq!(f.stats.store_failures.load(Ordering::Relaxed), 1);
        assert_eq!(f.stats.pubkey_rejects.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn every_key_costs_one_lookup() {
        let f = fixture();
        f.gate.authenticate(&conn(1), Credential::PublicKey(K1)).await;
        f.gate.authenticate(&conn(2), Credential::PublicKey(K1)).await;
        f.gate.authenticate(&conn(2), Credential::PublicKey(K3)).await;
        assert_eq!(f.store.lookups(), 3);
    }

    #[tokio::test]
    async fn interactive_success_records_login() {
        let f = fixture();
        let offered = vec![K2.to_vec()];
        let verdict = f
            .gate
            .authenticate(
                &conn(2),
                Credential::Interactive {
                    login: " bob ",
                    offered_keys: &offered,
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Permit("bob".into()));

        let state = f.registry.get(&conn(2)).unwrap();
        assert_eq!(state.login, "bob");
        assert_eq!(state.method, AuthMethod::Interactive);
    }

    #[tokio::test]
    async fn interactive_login_is_case_folded() {
        let f = fixture();
        let offered = vec![K2.to_vec()];
        let verdict = f
            .gate
            .authenticate(
                &conn(4),
                Credential::Interactive {
                    login: "BoB",
                    offered_keys: &offered,
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Permit("bob".into()));
        assert_eq!(f.registry.get(&conn(4)).unwrap().login, "bob");
        assert_eq!(f.verifier.calls(), 1);
    }

    #[tokio::test]
    async fn interactive_failure_denies_without_state() {
        let f = fixture();
        let offered = vec![K3.to_vec()];
        let verdict = f
            .gate
            .authenticate(
                &conn(3),
                Credential::Interactive {
                    login: "bob",
                    offered_keys: &offered,
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Deny);
        assert!(f.registry.get(&conn(3)).is_none());
        assert_eq!(f.stats.interactive_denials.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn interactive_without_keys_skips_verifier() {
        let f = fixture();
        let verdict = f
            .gate
            .authenticate(
                &conn(3),
                Credential::Interactive {
                    login: "bob",
                    offered_keys: &[],
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Deny);
        assert_eq!(f.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn interactive_verifier_error_denies() {
        let f = fixture();
        f.verifier.set_failing(true);
        let offered = vec![K2.to_vec()];
        let verdict = f
            .gate
            .authenticate(
                &conn(4),
                Credential::Interactive {
                    login: "bob",
                    offered_keys: &offered,
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Deny);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn interactive_after_publickey_success_never_calls_verifier() {
        let f = fixture();
        assert!(f
            .gate
            .authenticate(&conn(5), Credential::PublicKey(K1))
            .await
            .is_permit());

        let offered = vec![K2.to_vec()];
        let verdict = f
            .gate
            .authenticate(
                &conn(5),
                Credential::Interactive {
                    login: "bob",
                    offered_keys: &offered,
                },
            )
            .await;
        assert_eq!(verdict, Verdict::Permit("alice".into()));
        assert_eq!(f.verifier.calls(), 0);
        assert_eq!(f.registry.get(&conn(5)).unwrap().login, "alice");
    }

    #[tokio::test]
    async fn concurrent_connections_do_not_cross_contaminate() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut store = MockStore::new();
        for i in 0..32u64 {
            store = store.with_key(format!("key-{i}").as_bytes(), &format!("user-{i}"));
        }
        let gate = Arc::new(AuthenticationGate::new(
            Arc::new(store),
            Arc::new(MockVerifier::new()),
            registry.clone(),
            Arc::new(ServerStats::default()),
        ));

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("key-{i}").into_bytes();
                gate.authenticate(&conn(i), Credential::PublicKey(&key)).await
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), Verdict::Permit(format!("user-{i}")));
        }

        assert_eq!(registry.len(), 32);
        for i in 0..32u64 {
            assert_eq!(registry.get(&conn(i)).unwrap().login, format!("user-{i}"));
        }
    }
}
