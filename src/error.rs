use thiserror::Error;

use crate::FailureReason;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os rng error: {message}")]
    OsRng { message: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid redirect uri: {0}")]
    InvalidRedirectUri(String),

    #[error("failed to launch user agent: {message}")]
    Launch { message: String },

    #[cfg(feature = "local-server")]
    #[error("local server timed out after {timeout:?}")]
    LocalServerTimeout { timeout: std::time::Duration },

    #[cfg(feature = "local-server")]
    #[error("local server failed: {message}")]
    LocalServer { message: String },
}

/// Failure of a single code-for-token exchange. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Connectivity problem or a non-2xx status from the token endpoint.
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The endpoint answered 2xx but the body was not a token response.
    #[error("{message}")]
    Protocol { message: String, body: String },
}

impl ExchangeError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Transport { .. } => FailureReason::TransportFailure,
            Self::Protocol { .. } => FailureReason::ProtocolFailure,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}
