//! Per-connection SSH handler.
//!
//! russh drives the handshake and calls into this handler for each
//! authentication attempt. Decisions are delegated to the
//! [`AuthenticationGate`](crate::auth::AuthenticationGate); this type only
//! translates verdicts into SSH responses and remembers what the transport
//! needs across attempts on the same connection.

use crate::auth::{Credential, Verdict};
use crate::server::ServerContext;
use crate::session::ConnectionKey;
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Prompt shown by the interactive challenge.
pub const INTERACTIVE_PROMPT: &str = "GitHub username: ";

/// Handler state for one connection.
pub struct ConnectionSession {
    ctx: Arc<ServerContext>,
    key: ConnectionKey,
    /// Keys whose signature verified but which had no store match.
    /// Candidates for the interactive fallback.
    proven_keys: Vec<Vec<u8>>,
    /// Set after an identity store failure; disables the fallback.
    store_failed: bool,
    authenticated: bool,
    /// Fired once authentication succeeds, ending the handshake deadline.
    auth_tx: Option<oneshot::Sender<()>>,
}

impl ConnectionSession {
    pub fn new(ctx: Arc<ServerContext>, key: ConnectionKey, auth_tx: oneshot::Sender<()>) -> Self {
        Self {
            ctx,
            key,
            proven_keys: Vec::new(),
            store_failed: false,
            authenticated: false,
            auth_tx: Some(auth_tx),
        }
    }

    /// Methods the client may continue with after a rejected attempt.
    fn remaining_methods(&self) -> MethodSet {
        if self.store_failed {
            MethodSet::from(&[MethodKind::PublicKey][..])
        } else {
            MethodSet::from(&[MethodKind::PublicKey, MethodKind::KeyboardInteractive][..])
        }
    }

    fn reject(&self) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(self.remaining_methods()),
            partial_success: false,
        }
    }

    /// Reject with nothing left to try; the client gives up.
    fn deny_all() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::empty()),
            partial_success: false,
        }
    }

    async fn serve_channel(
        &mut self,
        channel: ChannelId,
        command: Option<String>,
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        let Some(state) = self.ctx.registry.get(&self.key) else {
            warn!(conn = %self.key, "channel request without session state");
            let _ = session.channel_failure(channel);
            return Ok(());
        };

        let _ = session.channel_success(channel);
        let handler = self.ctx.handler.clone();
        let handle = session.handle();
        let conn = self.key.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.serve(state, channel, command, handle).await {
                debug!(conn = %conn, error = %e, "connection handler ended with error");
            }
        });
        Ok(())
    }
}

impl russh::server::Handler for ConnectionSession {
    type Error = russh::Error;

    /// Called after the client's signature over the session has verified.
    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        if self.authenticated {
            return Ok(Auth::Accept);
        }

        let wire = match public_key.to_bytes() {
            Ok(w) => w,
            Err(e) => {
                debug!(conn = %self.key, error = %e, "cannot encode offered key");
                return Ok(self.reject());
            }
        };
        debug!(conn = %self.key, user, algorithm = %public_key.algorithm(), "public key presented");

        match self
            .ctx
            .gate
            .authenticate(&self.key, Credential::PublicKey(&wire))
            .await
        {
            Verdict::Permit(_) => {
                self.authenticated = true;
                Ok(Auth::Accept)
            }
            Verdict::Reject => {
                if !self.proven_keys.contains(&wire) {
                    self.proven_keys.push(wire);
                }
                Ok(self.reject())
            }
            Verdict::Deny => {
                self.store_failed = true;
                Ok(self.reject())
            }
        }
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        _submethods: &str,
        response: Option<russh::server::Response<'_>>,
    ) -> Result<Auth, Self::Error> {
        if self.authenticated {
            return Ok(Auth::Accept);
        }
        if self.store_failed {
            debug!(conn = %self.key, "interactive fallback disabled after store failure");
            return Ok(Self::deny_all());
        }

        let Some(response) = response else {
            debug!(conn = %self.key, user, "issuing interactive challenge");
            return Ok(Auth::Partial {
                name: "keygate".into(),
                instructions: "No registered key matched. Enter the GitHub account that owns one of your keys.".into(),
                prompts: vec![(INTERACTIVE_PROMPT.into(), true)].into(),
            });
        };

        let answers: Vec<String> = response
            .into_iter()
            .map(|r| String::from_utf8_lossy(&r).to_string())
            .collect();
        let Some(login) = answers.first() else {
            return Ok(Self::deny_all());
        };

        let allowed = {
            let mut limits = self.ctx.rate_limits.lock().await;
            limits.check_interactive(&self.key.remote.ip())
        };
        if !allowed {
            warn!(conn = %self.key, "interactive attempt rate limited");
            return Ok(Self::deny_all());
        }

        let verdict = self
            .ctx
            .gate
            .authenticate(
                &self.key,
                Credential::Interactive {
                    login,
                    offered_keys: &self.proven_keys,
                },
            )
            .await;

        if verdict.is_permit() {
            self.authenticated = true;
            Ok(Auth::Accept)
        } else {
            Ok(Self::deny_all())
        }
    }

    async fn auth_succeeded(&mut self, _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.ctx.registry.get(&self.key) {
            info!(conn = %self.key, login = %state.login, method = %state.method, "authenticated");
        }
        if let Some(tx) = self.auth_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(conn = %self.key, channel = ?channel.id(), "session channel opened");
        Ok(self.authenticated)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.serve_channel(channel, None, session).await
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        self.serve_channel(channel, Some(command), session).await
    }
}
