//! Identity verifier: confirms key ownership against GitHub.
//!
//! Used only on the interactive fallback path. The client names a GitHub
//! account and the verifier checks whether that account publishes one of
//! the keys the client proved possession of during the handshake.

use keygate_core::{parse_public_key_line, GateError, GateResult, PublicKeyLine};
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum GitHub username length.
const MAX_LOGIN_LEN: usize = 39;

/// Independent confirmation that `login` owns one of `public_keys`.
pub trait IdentityVerifier: Send + Sync {
    /// `public_keys` are SSH wire encodings. Returns `Ok(false)` when the
    /// account exists but owns none of them, or does not exist.
    fn verify<'a>(
        &'a self,
        login: &'a str,
        public_keys: &'a [Vec<u8>],
    ) -> Pin<Box<dyn Future<Output = GateResult<bool>> + Send + 'a>>;
}

/// Settings for [`GitHubVerifier`].
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_base: String,
    pub user_agent: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: Duration,
}

/// One entry of `GET /users/{login}/keys`.
#[derive(Debug, Deserialize)]
struct GitHubKey {
    key: String,
}

/// GitHub REST API verifier.
///
/// Without client credentials GitHub applies the unauthenticated rate
/// limit, which is per source IP and small.
pub struct GitHubVerifier {
    http_client: reqwest::Client,
    api_base: String,
    credentials: Option<(String, String)>,
}

impl GitHubVerifier {
    pub fn new(settings: GitHubSettings) -> GateResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(settings.user_agent)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GateError::Config(format!("cannot build HTTP client: {e}")))?;

        let credentials = match (settings.client_id, settings.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        };

        Ok(Self {
            http_client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn fetch_keys(&self, login: &str) -> GateResult<Option<Vec<PublicKeyLine>>> {
        let url = format!("{}/users/{}/keys", self.api_base, login);
        debug!(url = %url, "fetching published keys");

        let mut req = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some((ref id, ref secret)) = self.credentials {
            req = req.basic_auth(id, Some(secret));
        }

        let response = req
            .send()
            .await
            .map_err(|e| GateError::Verifier(format!("request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                let keys: Vec<GitHubKey> = response
                    .json()
                    .await
                    .map_err(|e| GateError::Verifier(format!("malformed keys response: {e}")))?;
                let published = keys
                    .iter()
                    .filter_map(|k| match parse_public_key_line(&k.key) {
                        Ok(parsed) => Some(parsed),
                        Err(e) => {
                            debug!(login, error = %e, "skipping unparsable published key");
                            None
                        }
                    })
                    .collect();
                Ok(Some(published))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limit_exhausted(&response) => {
                warn!(login, "GitHub rate limit exhausted");
                Err(GateError::RateLimited("GitHub API quota exhausted".into()))
            }
            status => Err(GateError::Verifier(format!(
                "unexpected status {status} from GitHub"
            ))),
        }
    }
}

impl IdentityVerifier for GitHubVerifier {
    fn verify<'a>(
        &'a self,
        login: &'a str,
        public_keys: &'a [Vec<u8>],
    ) -> Pin<Box<dyn Future<Output = GateResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            validate_login(login)?;
            match self.fetch_keys(login).await? {
                Some(published) => {
                    let matched = published
                        .iter()
                        .find(|p| public_keys.iter().any(|k| *k == p.wire));
                    if let Some(key) = matched {
                        debug!(login, algorithm = %key.algorithm, "published key matches");
                    }
                    Ok(matched.is_some())
                }
                None => {
                    debug!(login, "GitHub account not found");
                    Ok(false)
                }
            }
        })
    }
}

fn rate_limit_exhausted(response: &reqwest::Response) -> bool {
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

/// Check a GitHub username: 1-39 chars, ASCII alphanumerics or hyphens,
/// no leading, trailing, or doubled hyphen.
pub fn validate_login(login: &str) -> GateResult<()> {
    let invalid = |why: &str| GateError::Verifier(format!("invalid GitHub username {login:?}: {why}"));

    if login.is_empty() || login.len() > MAX_LOGIN_LEN {
        return Err(invalid("bad length"));
    }
    if !login.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid("bad character"));
    }
    if login.starts_with('-') || login.ends_with('-') || login.contains("--") {
        return Err(invalid("bad hyphen placement"));
    }
    Ok(())
}
