//! Post-authentication connection handling.
//!
//! Once a connection is authenticated and the client asks for a shell or
//! a command, the session state resolved by the gate is handed to a
//! [`ConnectionHandler`] together with the channel.

use crate::session::SessionState;
use keygate_core::{GateError, GateResult};
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Consumes an authenticated channel.
pub trait ConnectionHandler: Send + Sync {
    /// Serve one session channel. `command` is set for exec requests.
    fn serve(
        &self,
        state: SessionState,
        channel: ChannelId,
        command: Option<String>,
        handle: Handle,
    ) -> Pin<Box<dyn Future<Output = GateResult<()>> + Send + 'static>>;
}

/// Tells the client who it authenticated as, then closes the channel.
#[derive(Debug, Default)]
pub struct GreetingHandler;

/// Greeting text for a login.
pub fn greeting(login: &str) -> String {
    format!("Hi {login}! You've successfully authenticated with keygate.\r\n")
}

impl ConnectionHandler for GreetingHandler {
    fn serve(
        &self,
        state: SessionState,
        channel: ChannelId,
        command: Option<String>,
        handle: Handle,
    ) -> Pin<Box<dyn Future<Output = GateResult<()>> + Send + 'static>> {
        Box::pin(async move {
            if let Some(cmd) = command {
                debug!(login = %state.login, command = %cmd, "ignoring exec command");
            }

            handle
                .data(channel, CryptoVec::from_slice(greeting(&state.login).as_bytes()))
                .await
                .map_err(|_| GateError::Transport("channel closed before greeting".into()))?;
            // The client may already be gone; nothing to do if these fail.
            let _ = handle.exit_status_request(channel, 0).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
            Ok(())
        })
    }
}
