use std::time::Duration;

pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

pub const DEFAULT_REDIRECT_URI: &str = "gitwispr://callback";
pub const DEFAULT_SCOPE: &str = "repo,read:user";

/// Body encoding used when posting to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenRequestFormat {
    /// `{"clientId", "clientSecret", "code", "redirectUri"}` as a JSON body.
    #[default]
    Json,
    /// RFC 6749 `application/x-www-form-urlencoded` with snake_case keys.
    Form,
}

/// Immutable client registration used by one or more flow attempts.
///
/// The client secret is supplied by the host. Shipping it inside a publicly
/// distributed binary exposes it; production deployments should route the
/// exchange through a confidential backend and point `token_url` at it.
#[derive(Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub token_format: TokenRequestFormat,
    pub timeout: Option<Duration>,
    pub use_pkce: bool,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scope: DEFAULT_SCOPE.to_string(),
            authorize_url: GITHUB_AUTHORIZE_URL.to_string(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            token_format: TokenRequestFormat::default(),
            timeout: None,
            use_pkce: false,
        }
    }

    /// GitHub registration using the app's deep-link redirect and scopes.
    pub fn github(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::new(client_id, client_secret, DEFAULT_REDIRECT_URI)
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_authorize_url(mut self, authorize_url: impl Into<String>) -> Self {
        self.authorize_url = authorize_url.into();
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_token_format(mut self, token_format: TokenRequestFormat) -> Self {
        self.token_format = token_format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Scheme of the redirect URI, lowercased. Redirects arriving under any
    /// other scheme are not ours.
    pub fn redirect_scheme(&self) -> Option<String> {
        url::Url::parse(&self.redirect_uri)
            .ok()
            .map(|url| url.scheme().to_ascii_lowercase())
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("token_format", &self.token_format)
            .field("timeout", &self.timeout)
            .field("use_pkce", &self.use_pkce)
            .finish()
    }
}
