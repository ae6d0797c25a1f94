use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::ACCEPT};
use serde::Deserialize;
use tracing::debug;

use crate::{
    AuthConfig, AuthError, AuthorizationGrant, ExchangeError, TokenRequest, TokenRequestFormat,
    TokenResponse,
};

/// Trades an authorization code for an access token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        grant: &AuthorizationGrant,
        config: &AuthConfig,
    ) -> Result<TokenResponse, ExchangeError>;
}

/// OAuth error body some providers (GitHub included) return with a 200.
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenExchangeClient {
    http: Client,
}

impl TokenExchangeClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, AuthError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(config.timeout)
    }

    pub fn with_http_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenExchange for TokenExchangeClient {
    async fn exchange(
        &self,
        grant: &AuthorizationGrant,
        config: &AuthConfig,
    ) -> Result<TokenResponse, ExchangeError> {
        let request = TokenRequest::new(grant, config);
        let builder = self
            .http
            .post(&config.token_url)
            .header(ACCEPT, "application/json");

        let response = match config.token_format {
            TokenRequestFormat::Json => builder.json(&request).send().await?,
            TokenRequestFormat::Form => builder.form(&request.form_pairs()).send().await?,
        };

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), "token endpoint responded");

        if !status.is_success() {
            return Err(ExchangeError::Transport {
                status: Some(status.as_u16()),
                message: format!("http status {}: {}", status.as_u16(), body),
            });
        }

        parse_token_body(body)
    }
}

fn parse_token_body(body: String) -> Result<TokenResponse, ExchangeError> {
    match serde_json::from_str::<TokenResponse>(&body) {
        Ok(token) => Ok(token),
        Err(err) => {
            let message = match serde_json::from_str::<ProviderErrorBody>(&body) {
                Ok(provider) => match provider.error_description {
                    Some(description) => format!("{}: {}", provider.error, description),
                    None => provider.error,
                },
                Err(_) => format!("unexpected token response: {err}"),
            };
            Err(ExchangeError::Protocol { message, body })
        }
    }
}
