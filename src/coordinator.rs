use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    AccessToken, AuthConfig, AuthError, AuthorizationGrant, FailureReason, FlowFailure, FlowId,
    FlowOutcome, PendingFlow, PendingFlowRegistry, PkcePair, RoutingMode, TokenExchange,
    TokenExchangeClient, UserAgent,
};

/// Returned by `start_flow`; identifies the flow for cancellation.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    id: FlowId,
    authorization_url: Url,
}

impl FlowHandle {
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }
}

/// What [`AuthorizationCoordinator::complete_flow`] did with a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The token reached the flow's success callback.
    Authorized,
    /// The exchange failed and the flow's error callback ran.
    Failed(FailureReason),
    /// The flow was not pending, or another redirect is already exchanging
    /// its code. Nothing was sent to the token endpoint.
    NotPending,
    /// The flow was cancelled, expired or replaced while the exchange ran;
    /// the exchange result was discarded.
    Superseded,
}

/// Drives authorization attempts: starts them through the user agent and
/// finishes them once [`RedirectIngress`](crate::RedirectIngress) hands back a
/// code.
///
/// Cloning is cheap and every clone shares the same registry, so the clone
/// that handles the redirect may live on a different task than the one that
/// started the flow.
pub struct AuthorizationCoordinator<E = TokenExchangeClient> {
    config: Arc<AuthConfig>,
    exchange: Arc<E>,
    user_agent: Arc<dyn UserAgent>,
    registry: Arc<PendingFlowRegistry>,
    flow_timeout: Option<Duration>,
}

impl<E> Clone for AuthorizationCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            exchange: self.exchange.clone(),
            user_agent: self.user_agent.clone(),
            registry: self.registry.clone(),
            flow_timeout: self.flow_timeout,
        }
    }
}

impl AuthorizationCoordinator {
    pub fn new(
        config: AuthConfig,
        user_agent: impl UserAgent + 'static,
    ) -> Result<Self, AuthError> {
        let exchange = TokenExchangeClient::from_config(&config)?;
        Ok(Self::with_exchange(config, exchange, user_agent))
    }
}

impl<E: TokenExchange> AuthorizationCoordinator<E> {
    pub fn with_exchange(
        config: AuthConfig,
        exchange: E,
        user_agent: impl UserAgent + 'static,
    ) -> Self {
        Self {
            config: Arc::new(config),
            exchange: Arc::new(exchange),
            user_agent: Arc::new(user_agent),
            registry: Arc::new(PendingFlowRegistry::default()),
            flow_timeout: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<PendingFlowRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Fails flows that are still pending after `timeout`. Requires a tokio
    /// runtime when flows are started.
    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PendingFlowRegistry> {
        &self.registry
    }

    pub fn token_exchange(&self) -> &E {
        &self.exchange
    }

    pub fn authorization_url(
        &self,
        state: Option<&FlowId>,
        pkce: Option<&PkcePair>,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &self.config.scope);
            if let Some(state) = state {
                pairs.append_pair("state", state.as_str());
            }
            if let Some(pkce) = pkce {
                pairs
                    .append_pair("code_challenge", &pkce.code_challenge)
                    .append_pair("code_challenge_method", pkce.challenge_method());
            }
        }
        Ok(url)
    }

    /// Starts a flow and returns without waiting for the redirect. Exactly
    /// one of the callbacks runs later, unless the flow is displaced by a newer
    /// one in exclusive mode or never resolves.
    pub fn start_flow<S, F>(&self, on_success: S, on_error: F) -> Result<FlowHandle, AuthError>
    where
        S: FnOnce(AccessToken) + Send + 'static,
        F: FnOnce(FlowFailure) + Send + 'static,
    {
        self.begin(PendingFlow::new(on_success, on_error))
    }

    pub fn start_flow_awaitable(
        &self,
    ) -> Result<(FlowHandle, oneshot::Receiver<FlowOutcome>), AuthError> {
        let (tx, rx) = oneshot::channel();
        let handle = self.begin(PendingFlow::from_sender(tx))?;
        Ok((handle, rx))
    }

    fn begin(&self, mut flow: PendingFlow) -> Result<FlowHandle, AuthError> {
        let id = FlowId::generate()?;
        let pkce = if self.config.use_pkce {
            Some(PkcePair::generate()?)
        } else {
            None
        };
        let state = (self.registry.mode() == RoutingMode::Correlated).then_some(&id);
        let authorization_url = self.authorization_url(state, pkce.as_ref())?;

        if let Some(pkce) = pkce {
            flow = flow.with_code_verifier(pkce.code_verifier);
        }
        // Register before presenting so a fast redirect always finds the flow.
        self.registry.set(id.clone(), flow);
        info!(flow_id = %id, mode = ?self.registry.mode(), "authorization flow started");
        self.schedule_expiry(&id);

        if let Err(err) = self.user_agent.present(&authorization_url) {
            warn!(flow_id = %id, error = %err, "failed to present authorization url");
            self.registry.resolve(
                &id,
                FlowOutcome::failure(FailureReason::LaunchFailed, err.to_string()),
            );
        }

        Ok(FlowHandle {
            id,
            authorization_url,
        })
    }

    fn schedule_expiry(&self, id: &FlowId) {
        let Some(timeout) = self.flow_timeout else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(flow_id = %id, "no tokio runtime; flow timeout not scheduled");
            return;
        };
        let registry = self.registry.clone();
        let flow_id = id.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = FlowOutcome::failure(
                FailureReason::Expired,
                format!("authorization timed out after {timeout:?}"),
            );
            if registry.resolve(&flow_id, expired) {
                info!(flow_id = %flow_id, "authorization flow expired");
            }
        });
        self.registry.attach_expiry(id, task.abort_handle());
    }

    /// Exchanges `code` and resolves flow `id` with the result. The flow stays
    /// registered while the exchange is in flight but stops accepting
    /// redirects, so each flow's code is sent to the token endpoint at most
    /// once.
    pub async fn complete_flow(&self, id: &FlowId, code: &str) -> Completion {
        let Some(verifier) = self.registry.begin_exchange(id) else {
            debug!(flow_id = %id, "flow not pending or already exchanging; code not sent");
            return Completion::NotPending;
        };
        let mut grant = AuthorizationGrant::new(code);
        if let Some(verifier) = verifier {
            grant = grant.with_code_verifier(verifier);
        }

        let outcome = match self.exchange.exchange(&grant, &self.config).await {
            Ok(token) => {
                debug!(
                    flow_id = %id,
                    scope = token.scope.as_deref().unwrap_or_default(),
                    "token exchange succeeded"
                );
                FlowOutcome::Success(token.access_token)
            }
            Err(err) => {
                warn!(flow_id = %id, reason = %err.reason(), error = %err, "token exchange failed");
                FlowOutcome::failure(err.reason(), err.to_string())
            }
        };

        let completion = match &outcome {
            FlowOutcome::Success(_) => Completion::Authorized,
            FlowOutcome::Failure(failure) => Completion::Failed(failure.reason),
        };
        if self.registry.resolve(id, outcome) {
            completion
        } else {
            warn!(flow_id = %id, "flow resolved elsewhere during the exchange");
            Completion::Superseded
        }
    }

    pub fn cancel(&self, id: &FlowId) -> bool {
        self.registry.resolve(
            id,
            FlowOutcome::failure(FailureReason::Cancelled, "authorization cancelled"),
        )
    }
}

impl<E> std::fmt::Debug for AuthorizationCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCoordinator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("flow_timeout", &self.flow_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{ExchangeError, TokenResponse};

    struct FixedExchange {
        result: Result<TokenResponse, ExchangeError>,
        delay: Option<Duration>,
        grants: Mutex<Vec<(String, Option<String>)>>,
    }

    impl FixedExchange {
        fn token(token: &str) -> Self {
            Self {
                result: Ok(TokenResponse {
                    access_token: AccessToken::new(token),
                    token_type: Some("bearer".to_string()),
                    scope: Some("repo".to_string()),
                }),
                delay: None,
                grants: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: ExchangeError) -> Self {
            Self {
                result: Err(err),
                delay: None,
                grants: Mutex::new(Vec::new()),
            }
        }

        fn slow(token: &str, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::token(token)
            }
        }
    }

    #[async_trait]
    impl TokenExchange for FixedExchange {
        async fn exchange(
            &self,
            grant: &AuthorizationGrant,
            _config: &AuthConfig,
        ) -> Result<TokenResponse, ExchangeError> {
            self.grants
                .lock()
                .unwrap()
                .push((grant.code.clone(), grant.code_verifier.clone()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn quiet_agent(_: &Url) -> Result<(), AuthError> {
        Ok(())
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn authorization_url_includes_escaped_params() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T"),
            quiet_agent,
        );
        let url = coordinator.authorization_url(None, None).unwrap();

        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(url.path(), "/login/oauth/authorize");
        let raw = url.query().unwrap();
        assert!(raw.contains("redirect_uri=gitwispr%3A%2F%2Fcallback"));
        assert!(raw.contains("scope=repo%2Cread%3Auser"));

        let pairs = query(&url);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["redirect_uri"], "gitwispr://callback");
        assert_eq!(pairs["scope"], "repo,read:user");
    }

    #[test]
    fn correlated_pkce_flow_adds_state_and_challenge() {
        let presented = Arc::new(Mutex::new(Vec::new()));
        let sink = presented.clone();
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret").with_pkce(true),
            FixedExchange::token("T"),
            move |url: &Url| {
                sink.lock().unwrap().push(url.clone());
                Ok(())
            },
        )
        .with_registry(Arc::new(PendingFlowRegistry::correlated()));

        let handle = coordinator.start_flow(|_| {}, |_| {}).unwrap();
        let presented = presented.lock().unwrap();
        assert_eq!(presented.as_slice(), &[handle.authorization_url().clone()]);

        let pairs = query(handle.authorization_url());
        assert_eq!(pairs["state"], handle.id().as_str());
        assert_eq!(pairs["code_challenge_method"], "S256");
        let verifier = coordinator.registry().code_verifier(handle.id()).unwrap();
        assert_eq!(
            pairs["code_challenge"],
            PkcePair::from_verifier(verifier).code_challenge
        );
    }

    #[tokio::test]
    async fn complete_flow_delivers_token_and_clears_slot() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret").with_pkce(true),
            FixedExchange::token("T1"),
            quiet_agent,
        );
        let (handle, rx) = coordinator.start_flow_awaitable().unwrap();
        let verifier = coordinator.registry().code_verifier(handle.id());

        let result = coordinator.complete_flow(handle.id(), "XYZ").await;

        assert_eq!(result, Completion::Authorized);
        assert_eq!(rx.await.unwrap(), FlowOutcome::Success(AccessToken::new("T1")));
        assert!(coordinator.registry().is_empty());
        let grants = coordinator.token_exchange().grants.lock().unwrap();
        assert_eq!(grants.as_slice(), &[("XYZ".to_string(), verifier)]);
    }

    #[tokio::test]
    async fn complete_flow_reports_exchange_failure() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::failing(ExchangeError::Protocol {
                message: "unexpected token response".to_string(),
                body: "{}".to_string(),
            }),
            quiet_agent,
        );
        let (handle, rx) = coordinator.start_flow_awaitable().unwrap();

        let result = coordinator.complete_flow(handle.id(), "XYZ").await;

        assert_eq!(result, Completion::Failed(FailureReason::ProtocolFailure));
        assert_eq!(
            rx.await.unwrap(),
            FlowOutcome::failure(FailureReason::ProtocolFailure, "unexpected token response")
        );
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn complete_flow_without_pending_flow_sends_nothing() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T1"),
            quiet_agent,
        );

        let result = coordinator.complete_flow(&FlowId::from("gone"), "XYZ").await;

        assert_eq!(result, Completion::NotPending);
        assert!(coordinator.token_exchange().grants.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_exchange_supersedes_the_result() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::slow("T1", Duration::from_millis(100)),
            quiet_agent,
        );
        let (handle, rx) = coordinator.start_flow_awaitable().unwrap();
        let completing = {
            let coordinator = coordinator.clone();
            let id = handle.id().clone();
            tokio::spawn(async move { coordinator.complete_flow(&id, "XYZ").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(coordinator.registry().is_pending(handle.id()));
        assert_eq!(
            coordinator.complete_flow(handle.id(), "XYZ").await,
            Completion::NotPending
        );
        assert!(coordinator.cancel(handle.id()));

        assert_eq!(completing.await.unwrap(), Completion::Superseded);
        assert_eq!(
            rx.await.unwrap(),
            FlowOutcome::failure(FailureReason::Cancelled, "authorization cancelled")
        );
        assert_eq!(coordinator.token_exchange().grants.lock().unwrap().len(), 1);
    }

    #[test]
    fn launch_failure_resolves_through_on_error() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T"),
            |_: &Url| {
                Err(AuthError::Launch {
                    message: "no browser".to_string(),
                })
            },
        );
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        coordinator
            .start_flow(
                |_| panic!("no token expected"),
                move |failure| sink.lock().unwrap().push(failure),
            )
            .unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, FailureReason::LaunchFailed);
        assert!(failures[0].detail.contains("no browser"));
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn cancel_resolves_once() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T"),
            quiet_agent,
        );
        let (handle, rx) = coordinator.start_flow_awaitable().unwrap();

        assert!(coordinator.cancel(handle.id()));
        assert!(!coordinator.cancel(handle.id()));
        assert_eq!(
            rx.await.unwrap(),
            FlowOutcome::failure(FailureReason::Cancelled, "authorization cancelled")
        );
    }

    #[tokio::test]
    async fn pending_flow_expires_after_timeout() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T"),
            quiet_agent,
        )
        .with_flow_timeout(Duration::from_millis(20));
        let (_handle, rx) = coordinator.start_flow_awaitable().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            outcome,
            FlowOutcome::Failure(FlowFailure { reason: FailureReason::Expired, .. })
        ));
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn resolved_flow_releases_its_expiry_task() {
        let coordinator = AuthorizationCoordinator::with_exchange(
            AuthConfig::github("client-id", "secret"),
            FixedExchange::token("T"),
            quiet_agent,
        )
        .with_flow_timeout(Duration::from_secs(3600));
        let (handle, _rx) = coordinator.start_flow_awaitable().unwrap();
        assert_eq!(Arc::strong_count(coordinator.registry()), 2);

        assert!(coordinator.cancel(handle.id()));

        // The aborted expiry task drops its registry handle.
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(coordinator.registry()) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
