use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Router, routing::get};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{AuthError, RedirectDisposition, RedirectIngress, TokenExchange};

use super::config::{DEFAULT_ERROR_HTML, DEFAULT_SUCCESS_HTML, LocalServerConfig};
use super::handler::{ReceiverState, ServeResult, callback_handler, fallback_handler, send_result};
use super::target::RedirectTarget;

#[derive(Debug, Clone)]
pub struct LocalServer {
    target: RedirectTarget,
    success_html: String,
    error_html: String,
    timeout: Option<Duration>,
}

impl LocalServer {
    pub fn new(redirect_uri: impl Into<String>) -> Result<Self, AuthError> {
        let redirect_uri = redirect_uri.into();
        Ok(Self {
            target: RedirectTarget::parse(&redirect_uri)?,
            success_html: DEFAULT_SUCCESS_HTML.to_string(),
            error_html: DEFAULT_ERROR_HTML.to_string(),
            timeout: None,
        })
    }

    pub fn from_config(config: LocalServerConfig) -> Result<Self, AuthError> {
        let redirect_uri = config.redirect_uri();
        Ok(Self {
            target: RedirectTarget::parse(&redirect_uri)?,
            success_html: config.success_html,
            error_html: config.error_html,
            timeout: config.timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Binds the listener up front so the port is taken before the browser
    /// is sent anywhere.
    pub fn bind(&self) -> Result<TcpListener, AuthError> {
        TcpListener::bind((self.target.host.as_str(), self.target.port)).map_err(AuthError::from)
    }

    /// Serves redirects until one reaches a terminal disposition, then shuts
    /// down.
    pub async fn serve<E: TokenExchange + 'static>(
        &self,
        listener: TcpListener,
        ingress: RedirectIngress<E>,
    ) -> Result<RedirectDisposition, AuthError> {
        let (result_tx, result_rx) = oneshot::channel::<ServeResult>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let result_tx = Arc::new(Mutex::new(Some(result_tx)));

        let state = ReceiverState {
            target: self.target.clone(),
            ingress,
            success_html: self.success_html.clone(),
            error_html: self.error_html.clone(),
            result_tx: result_tx.clone(),
        };

        let app = Router::new()
            .route(self.target.path(), get(callback_handler::<E>))
            .fallback(fallback_handler::<E>)
            .with_state(state);

        listener.set_nonblocking(true)?;
        let listener = TokioTcpListener::from_std(listener)?;
        info!(address = ?listener.local_addr().ok(), "loopback redirect receiver listening");

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let server_handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                send_result(
                    &result_tx,
                    Err(AuthError::LocalServer {
                        message: err.to_string(),
                    }),
                );
            }
        });

        let result = wait_for_result(result_rx, self.timeout).await;

        let _ = shutdown_tx.send(());
        let _ = server_handle.await;

        result
    }

    pub async fn serve_once<E: TokenExchange + 'static>(
        &self,
        ingress: RedirectIngress<E>,
    ) -> Result<RedirectDisposition, AuthError> {
        let listener = self.bind()?;
        self.serve(listener, ingress).await
    }
}

async fn wait_for_result(
    result_rx: oneshot::Receiver<ServeResult>,
    timeout: Option<Duration>,
) -> Result<RedirectDisposition, AuthError> {
    let received = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, result_rx).await.map_err(|_| {
            warn!(?timeout, "no redirect received before timeout");
            AuthError::LocalServerTimeout { timeout }
        })?,
        None => result_rx.await,
    };
    received.map_err(|_| AuthError::LocalServer {
        message: "receiver result channel closed".to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::{
        AccessToken, AuthConfig, AuthorizationCoordinator, AuthorizationGrant, ExchangeError,
        FlowOutcome, TokenResponse,
    };

    struct StaticExchange;

    #[async_trait]
    impl TokenExchange for StaticExchange {
        async fn exchange(
            &self,
            _grant: &AuthorizationGrant,
            _config: &AuthConfig,
        ) -> Result<TokenResponse, ExchangeError> {
            Ok(TokenResponse {
                access_token: AccessToken::new("T1"),
                token_type: None,
                scope: None,
            })
        }
    }

    fn get(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(
            stream,
            "GET {target} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_until_redirect_resolves_flow() {
        let server = LocalServer::new("http://127.0.0.1:0/callback").unwrap();
        let listener = server.bind().unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = AuthConfig::github("client-id", "secret")
            .with_redirect_uri(format!("http://127.0.0.1:{port}/callback"));
        let coordinator = AuthorizationCoordinator::with_exchange(
            config,
            StaticExchange,
            |_: &Url| -> Result<(), AuthError> { Ok(()) },
        );
        let (_handle, rx) = coordinator.start_flow_awaitable().unwrap();
        let ingress = RedirectIngress::new(coordinator);

        let serving = tokio::spawn(async move { server.serve(listener, ingress).await });

        let responses = tokio::task::spawn_blocking(move || {
            (get(port, "/favicon.ico"), get(port, "/callback?code=XYZ"))
        })
        .await
        .unwrap();

        assert!(responses.0.starts_with("HTTP/1.1 404"));
        assert!(responses.1.starts_with("HTTP/1.1 200"));
        assert!(responses.1.contains("authorization complete"));
        assert_eq!(serving.await.unwrap().unwrap(), RedirectDisposition::Authorized);
        assert_eq!(rx.await.unwrap(), FlowOutcome::Success(AccessToken::new("T1")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_pages_from_config() {
        let receiver = LocalServerConfig::from_redirect_uri("http://127.0.0.1:0/done")
            .unwrap()
            .with_success_html("<p>custom success</p>")
            .with_error_html("<p>custom error</p>");
        let server = LocalServer::from_config(receiver).unwrap();
        let listener = server.bind().unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = AuthConfig::github("client-id", "secret")
            .with_redirect_uri(format!("http://127.0.0.1:{port}/done"));
        let coordinator = AuthorizationCoordinator::with_exchange(
            config,
            StaticExchange,
            |_: &Url| -> Result<(), AuthError> { Ok(()) },
        );
        coordinator.start_flow(|_| {}, |_| {}).unwrap();
        let ingress = RedirectIngress::new(coordinator);

        let serving = tokio::spawn(async move { server.serve(listener, ingress).await });

        let responses = tokio::task::spawn_blocking(move || {
            (get(port, "/elsewhere"), get(port, "/done?code=XYZ"))
        })
        .await
        .unwrap();

        assert!(responses.0.contains("custom error"));
        assert!(responses.1.contains("custom success"));
        assert_eq!(serving.await.unwrap().unwrap(), RedirectDisposition::Authorized);
    }

    #[tokio::test]
    async fn times_out_without_redirect() {
        let server = LocalServer::new("http://127.0.0.1:0/callback")
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret")
                .with_redirect_uri("http://127.0.0.1:0/callback"),
            StaticExchange,
            |_: &Url| -> Result<(), AuthError> { Ok(()) },
        );

        let result = server.serve_once(RedirectIngress::new(coordinator)).await;

        assert!(matches!(result, Err(AuthError::LocalServerTimeout { .. })));
    }
}
