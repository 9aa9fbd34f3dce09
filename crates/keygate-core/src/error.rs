use thiserror::Error;

/// Errors produced by keygate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("identity store error: {0}")]
    Store(String),

    #[error("identity verifier error: {0}")]
    Verifier(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ssh_key::Error> for GateError {
    fn from(e: ssh_key::Error) -> Self {
        GateError::InvalidKey(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
