use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AuthConfig, AuthError};

const FLOW_ID_BYTES: usize = 16;

pub(crate) const MALFORMED_REDIRECT_MESSAGE: &str = "no code or error received";

/// Identifier issued for every started flow. Doubles as the OAuth `state`
/// parameter when redirects are correlated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowId(String);

impl FlowId {
    pub fn generate() -> Result<Self, AuthError> {
        crate::pkce::random_url_safe::<FLOW_ID_BYTES>().map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FlowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider redirected back with an `error` parameter.
    UserDenied,
    /// The redirect carried neither `code` nor `error`.
    MalformedRedirect,
    TransportFailure,
    ProtocolFailure,
    /// The user agent could not be launched.
    LaunchFailed,
    Cancelled,
    Expired,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserDenied => "user_denied",
            Self::MalformedRedirect => "malformed_redirect",
            Self::TransportFailure => "transport_failure",
            Self::ProtocolFailure => "protocol_failure",
            Self::LaunchFailed => "launch_failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `on_error` receives. `detail` is the human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl FlowFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Success(AccessToken),
    Failure(FlowFailure),
}

impl FlowOutcome {
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::Failure(FlowFailure::new(reason, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Parsed view of the redirect the user agent delivered back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectPayload {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: Option<String>,
}

impl RedirectPayload {
    pub fn from_url(redirect_uri: &str) -> Result<Self, AuthError> {
        let url = Url::parse(redirect_uri)?;
        Ok(Self::from_parsed(&url))
    }

    pub fn from_parsed(url: &Url) -> Self {
        let mut payload = Self::default();
        for (key, value) in url.query_pairs() {
            // Empty values are treated as absent.
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "code" => &mut payload.code,
                "error" => &mut payload.error,
                "error_description" => &mut payload.error_description,
                "state" => &mut payload.state,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        payload
    }
}

/// Code plus optional PKCE verifier for one exchange.
#[derive(Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub code_verifier: Option<String>,
}

impl AuthorizationGrant {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            code_verifier: None,
        }
    }

    pub fn with_code_verifier(mut self, code_verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(code_verifier.into());
        self
    }
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("code", &"<redacted>")
            .field("pkce", &self.code_verifier.is_some())
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<&'a str>,
}

impl<'a> TokenRequest<'a> {
    pub fn new(grant: &'a AuthorizationGrant, config: &'a AuthConfig) -> Self {
        Self {
            client_id: &config.client_id,
            client_secret: &config.client_secret,
            code: &grant.code,
            redirect_uri: &config.redirect_uri,
            code_verifier: grant.code_verifier.as_deref(),
        }
    }

    pub fn form_pairs(&self) -> Vec<(&'static str, &'a str)> {
        let mut pairs = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id),
            ("client_secret", self.client_secret),
            ("code", self.code),
            ("redirect_uri", self.redirect_uri),
        ];
        if let Some(verifier) = self.code_verifier {
            pairs.push(("code_verifier", verifier));
        }
        pairs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: AccessToken,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}
