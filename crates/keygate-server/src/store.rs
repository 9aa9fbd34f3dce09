//! Identity store: maps a presented public key to a login.
//!
//! Lookups are exact matches on the SSH wire encoding of the key. There is
//! no caching; every presented key costs one query.

use keygate_core::{GateError, GateResult};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Lookup query: one login, filtered by exact key material.
pub const LOOKUP_SQL: &str = "SELECT `login` FROM `user` LEFT JOIN `pub_key` ON `user_id` = `user`.`id` WHERE `pub_key` = ? LIMIT 1";

/// Read-only key → login lookup.
///
/// `Ok(None)` means the key is unknown. `Err` means the store could not
/// answer; callers must not treat it as a miss.
pub trait IdentityStore: Send + Sync {
    fn lookup<'a>(
        &'a self,
        public_key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = GateResult<Option<String>>> + Send + 'a>>;
}

/// MySQL-backed identity store.
pub struct MySqlIdentityStore {
    pool: MySqlPool,
}

impl MySqlIdentityStore {
    /// Connect eagerly so an unreachable database fails startup.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> GateResult<Self> {
        let options = connect_options(url)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| GateError::Store(format!("failed to connect to database: {e}")))?;

        info!(max_connections, "identity store connected");
        Ok(Self { pool })
    }
}

impl IdentityStore for MySqlIdentityStore {
    fn lookup<'a>(
        &'a self,
        public_key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = GateResult<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, String>(LOOKUP_SQL)
                .bind(public_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| GateError::Store(e.to_string()))
        })
    }
}

/// Parse a `mysql://` URL into connect options, forcing a UTF-8 session
/// character set.
fn connect_options(url: &str) -> GateResult<MySqlConnectOptions> {
    let options = MySqlConnectOptions::from_str(url)
        .map_err(|e| GateError::Config(format!("invalid database url: {e}")))?;
    Ok(options.charset("utf8mb4"))
}
