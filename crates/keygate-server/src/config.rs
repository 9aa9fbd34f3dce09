//! Server configuration: TOML file + CLI overrides.

use crate::verifier::GitHubSettings;
use keygate_core::{GateError, GateResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub debug: DebugSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_host_key_path")]
    pub host_key: String,
    /// Inline private key; wins over `host_key`.
    #[serde(default)]
    pub host_key_pem: Option<String>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u64,
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            host_key: default_host_key_path(),
            host_key_pem: None,
            handshake_timeout: default_handshake_timeout(),
            inactivity_timeout: default_inactivity_timeout(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

/// `[database]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// `[github]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_github_timeout")]
    pub timeout: u64,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            client_id: None,
            client_secret: None,
            timeout: default_github_timeout(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Interactive verification attempts per remote IP per minute.
    #[serde(default = "default_interactive_attempts")]
    pub interactive_attempts: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            interactive_attempts: default_interactive_attempts(),
        }
    }
}

/// `[debug]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugSection {
    #[serde(default)]
    pub listen: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:2222".to_string()
}
fn default_host_key_path() -> String {
    "~/.keygate/host_key".to_string()
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_inactivity_timeout() -> u64 {
    600
}
fn default_max_auth_attempts() -> usize {
    6
}
fn default_max_connections() -> u32 {
    10
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_user_agent() -> String {
    format!("keygate/{}", env!("CARGO_PKG_VERSION"))
}
fn default_github_timeout() -> u64 {
    10
}
fn default_interactive_attempts() -> u32 {
    5
}

/// Values from the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub debug_listen: Option<String>,
    pub handshake_timeout: Option<u64>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub host_key_path: PathBuf,
    pub host_key_pem: Option<String>,
    pub handshake_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub max_auth_attempts: usize,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_connect_timeout: Duration,
    pub github: GitHubSettings,
    pub interactive_attempts: u32,
    pub debug_listen: Option<String>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: &Path, overrides: &CliOverrides) -> GateResult<Self> {
        let expanded = expand_tilde(config_path);
        let file_config = if expanded.exists() {
            info!(path = %expanded.display(), "loading config file");
            let content = std::fs::read_to_string(&expanded)?;
            parse(&content)?
        } else {
            info!(path = %expanded.display(), "config file not found, using defaults");
            ConfigFile::default()
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge a parsed file with CLI overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: &CliOverrides) -> GateResult<Self> {
        let listen = overrides.listen.clone().unwrap_or(file.server.listen);
        let debug_listen = overrides
            .debug_listen
            .clone()
            .or(file.debug.listen)
            .filter(|s| !s.trim().is_empty());
        let handshake_timeout = overrides
            .handshake_timeout
            .unwrap_or(file.server.handshake_timeout);

        let database_url = file
            .database
            .url
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GateError::Config("database.url is required".into()))?;

        if debug_listen.as_deref() == Some(listen.as_str()) {
            return Err(GateError::Config(format!(
                "debug.listen must differ from server.listen ({listen})"
            )));
        }
        if handshake_timeout == 0 {
            return Err(GateError::Config(
                "server.handshake_timeout must be positive".into(),
            ));
        }

        Ok(Self {
            listen,
            host_key_path: expand_tilde_str(&file.server.host_key),
            host_key_pem: file.server.host_key_pem.filter(|s| !s.trim().is_empty()),
            handshake_timeout: Duration::from_secs(handshake_timeout),
            inactivity_timeout: Duration::from_secs(file.server.inactivity_timeout),
            max_auth_attempts: file.server.max_auth_attempts,
            database_url,
            database_max_connections: file.database.max_connections,
            database_connect_timeout: Duration::from_secs(file.database.connect_timeout),
            github: GitHubSettings {
                api_base: file.github.api_base,
                user_agent: file.github.user_agent,
                client_id: file.github.client_id,
                client_secret: file.github.client_secret,
                timeout: Duration::from_secs(file.github.timeout),
            },
            interactive_attempts: file.auth.interactive_attempts,
            debug_listen,
        })
    }
}

fn parse(content: &str) -> GateResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| GateError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[server]
listen = "127.0.0.1:2200"
host_key = "/etc/keygate/host_key"
handshake_timeout = 15
max_auth_attempts = 3

[database]
url = "mysql://keygate:pw@db/keygate"
max_connections = 4

[github]
user_agent = "keygate-test"
client_id = "id"
client_secret = "secret"

[auth]
interactive_attempts = 2

[debug]
listen = "127.0.0.1:6060"
"#;

    #[test]
    fn parse_full_file() {
        let cfg = ServerConfig::resolve(parse(FULL).unwrap(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:2200");
        assert_eq!(cfg.host_key_path, PathBuf::from("/etc/keygate/host_key"));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(15));
        assert_eq!(cfg.max_auth_attempts, 3);
        assert_eq!(cfg.database_url, "mysql://keygate:pw@db/keygate");
        assert_eq!(cfg.database_max_connections, 4);
        assert_eq!(cfg.github.user_agent, "keygate-test");
        assert_eq!(cfg.github.client_id.as_deref(), Some("id"));
        assert_eq!(cfg.github.api_base, "https://api.github.com");
        assert_eq!(cfg.interactive_attempts, 2);
        assert_eq!(cfg.debug_listen.as_deref(), Some("127.0.0.1:6060"));
    }

    #[test]
    fn defaults_apply() {
        let file = parse("[database]\nurl = \"mysql://localhost/keygate\"\n").unwrap();
        let cfg = ServerConfig::resolve(file, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:2222");
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_auth_attempts, 6);
        assert_eq!(cfg.interactive_attempts, 5);
        assert!(cfg.debug_listen.is_none());
        assert!(cfg.host_key_pem.is_none());
        assert!(cfg.github.user_agent.starts_with("keygate/"));
    }

    #[test]
    fn cli_overrides_win() {
        let overrides = CliOverrides {
            listen: Some("127.0.0.1:9022".into()),
            debug_listen: Some("127.0.0.1:9060".into()),
            handshake_timeout: Some(5),
        };
        let cfg = ServerConfig::resolve(parse(FULL).unwrap(), &overrides).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9022");
        assert_eq!(cfg.debug_listen.as_deref(), Some("127.0.0.1:9060"));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let err = ServerConfig::resolve(ConfigFile::default(), &CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }

    #[test]
    fn debug_must_not_share_listener() {
        let file = parse(
            "[server]\nlisten = \"127.0.0.1:2222\"\n[database]\nurl = \"mysql://x/y\"\n[debug]\nlisten = \"127.0.0.1:2222\"\n",
        )
        .unwrap();
        assert!(ServerConfig::resolve(file, &CliOverrides::default()).is_err());
    }

    #[test]
    fn zero_handshake_timeout_rejected() {
        let overrides = CliOverrides {
            handshake_timeout: Some(0),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(parse(FULL).unwrap(), &overrides).is_err());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(parse("[server\nlisten ="), Err(GateError::Config(_))));
    }

    #[test]
    fn tilde_expands() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde_str("~/.keygate/key"), home.join(".keygate/key"));
        }
        assert_eq!(expand_tilde_str("/abs/key"), PathBuf::from("/abs/key"));
    }
}
