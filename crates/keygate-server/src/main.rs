//! keygate-server: SSH authentication front end.
//!
//! Maps client public keys to user logins through an identity store, falls
//! back to a GitHub-backed interactive check for unregistered keys, and
//! hands authenticated connections to a connection handler.

mod auth;
mod config;
mod connection;
mod diagnostics;
mod handler;
mod hostkey;
mod server;
mod session;
mod store;
mod verifier;

#[cfg(test)]
mod testing;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use handler::GreetingHandler;
use server::{ContextSettings, ServerContext};
use session::MemoryRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use store::MySqlIdentityStore;
use tracing::{error, info};
use verifier::GitHubVerifier;

/// keygate-server: SSH authentication front end
#[derive(Parser, Debug)]
#[command(name = "keygate-server", version, about = "SSH authentication front end")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.keygate/config.toml")]
    config: String,

    /// SSH listen address (overrides server.listen)
    #[arg(long)]
    listen: Option<String>,

    /// Diagnostics listen address (overrides debug.listen)
    #[arg(long)]
    debug_listen: Option<String>,

    /// Seconds a client has to authenticate
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Generate an Ed25519 host key at the configured path if none exists
    #[arg(long)]
    generate_host_key: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting keygate-server");

    let overrides = CliOverrides {
        listen: cli.listen.clone(),
        debug_listen: cli.debug_listen.clone(),
        handshake_timeout: cli.handshake_timeout,
    };
    let config = match ServerConfig::load(&PathBuf::from(&cli.config), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    if cli.generate_host_key && config.host_key_pem.is_none() {
        if let Err(e) = hostkey::generate_if_missing(&config.host_key_path) {
            error!(error = %e, "failed to generate host key");
            std::process::exit(1);
        }
    }

    let host_key = match hostkey::load(config.host_key_pem.as_deref(), &config.host_key_path) {
        Ok(k) => k,
        Err(e) => {
            error!(error = %e, "failed to load host key");
            std::process::exit(1);
        }
    };

    let store = match MySqlIdentityStore::connect(
        &config.database_url,
        config.database_max_connections,
        config.database_connect_timeout,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to connect identity store");
            std::process::exit(1);
        }
    };

    let verifier = match GitHubVerifier::new(config.github.clone()) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "failed to create GitHub verifier");
            std::process::exit(1);
        }
    };

    let ctx = Arc::new(ServerContext::new(
        Arc::new(store),
        Arc::new(verifier),
        Arc::new(MemoryRegistry::new()),
        Arc::new(GreetingHandler),
        host_key,
        ContextSettings {
            handshake_timeout: config.handshake_timeout,
            inactivity_timeout: config.inactivity_timeout,
            max_auth_attempts: config.max_auth_attempts,
            interactive_attempts: config.interactive_attempts,
        },
    ));

    if let Some(addr) = config.debug_listen.clone() {
        diagnostics::spawn(addr, ctx.stats.clone(), ctx.registry.clone());
    }

    let listener = match server::bind(&config.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind SSH listener");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = server::run(ctx, listener) => {}
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("keygate-server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
