use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::types::MALFORMED_REDIRECT_MESSAGE;
use crate::{
    AuthorizationCoordinator, Completion, FailureReason, FlowOutcome, RedirectPayload,
    RoutingMode, TokenExchange, TokenExchangeClient,
};

/// Terminal state reached by one redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDisposition {
    /// Code exchanged and the token delivered.
    Authorized,
    ExchangeFailed(FailureReason),
    /// Provider reported an `error`.
    Denied,
    /// Neither `code` nor `error` was present.
    Malformed,
    /// The code was exchanged, but the flow had already been cancelled,
    /// expired or replaced, so nothing was delivered.
    Superseded,
    /// Not ours, unparsable, no pending flow to route to, or the flow's code
    /// is already being exchanged.
    Ignored,
}

impl RedirectDisposition {
    /// Whether this redirect settled a flow. `Superseded` and `Ignored` left
    /// every pending flow as it was.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Superseded | Self::Ignored)
    }
}

/// Entry point the host calls when the user agent redirects back.
///
/// `handle` always returns a disposition; the host should treat its return as
/// the signal to tear down whatever surface received the redirect.
pub struct RedirectIngress<E = TokenExchangeClient> {
    coordinator: AuthorizationCoordinator<E>,
    scheme: Option<String>,
}

impl<E> Clone for RedirectIngress<E> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            scheme: self.scheme.clone(),
        }
    }
}

impl<E: TokenExchange + 'static> RedirectIngress<E> {
    pub fn new(coordinator: AuthorizationCoordinator<E>) -> Self {
        let scheme = coordinator.config().redirect_scheme();
        Self {
            coordinator,
            scheme,
        }
    }

    pub fn coordinator(&self) -> &AuthorizationCoordinator<E> {
        &self.coordinator
    }

    pub async fn handle(&self, redirect_uri: &str) -> RedirectDisposition {
        let url = match Url::parse(redirect_uri) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "ignoring unparsable redirect");
                return RedirectDisposition::Ignored;
            }
        };
        if let Some(expected) = &self.scheme {
            if url.scheme() != expected {
                debug!(scheme = url.scheme(), "ignoring redirect for another scheme");
                return RedirectDisposition::Ignored;
            }
        }
        self.handle_payload(RedirectPayload::from_parsed(&url)).await
    }

    pub async fn handle_payload(&self, payload: RedirectPayload) -> RedirectDisposition {
        let registry = self.coordinator.registry();
        let Some(flow_id) = registry.route(payload.state.as_deref()) else {
            warn!(
                correlated = registry.mode() == RoutingMode::Correlated,
                has_state = payload.state.is_some(),
                "redirect does not match a pending flow"
            );
            return RedirectDisposition::Ignored;
        };

        // A code wins over an `error` sent alongside it.
        match payload {
            RedirectPayload {
                code: Some(code), ..
            } => match self.coordinator.complete_flow(&flow_id, &code).await {
                Completion::Authorized => RedirectDisposition::Authorized,
                Completion::Failed(reason) => RedirectDisposition::ExchangeFailed(reason),
                Completion::Superseded => RedirectDisposition::Superseded,
                Completion::NotPending => RedirectDisposition::Ignored,
            },
            RedirectPayload {
                error: Some(error),
                error_description,
                ..
            } => {
                info!(
                    flow_id = %flow_id,
                    error = %error,
                    description = error_description.as_deref().unwrap_or_default(),
                    "provider denied authorization"
                );
                let denied = FlowOutcome::failure(FailureReason::UserDenied, error);
                Self::settled(registry.resolve(&flow_id, denied), RedirectDisposition::Denied)
            }
            _ => {
                warn!(flow_id = %flow_id, "redirect carried neither code nor error");
                let malformed = FlowOutcome::failure(
                    FailureReason::MalformedRedirect,
                    MALFORMED_REDIRECT_MESSAGE,
                );
                Self::settled(
                    registry.resolve(&flow_id, malformed),
                    RedirectDisposition::Malformed,
                )
            }
        }
    }

    /// `Ignored` when another path resolved the flow between routing and
    /// delivery.
    fn settled(delivered: bool, disposition: RedirectDisposition) -> RedirectDisposition {
        if delivered {
            disposition
        } else {
            RedirectDisposition::Ignored
        }
    }

    /// Handles the redirect on a fresh tokio task.
    pub fn dispatch(&self, redirect_uri: impl Into<String>) -> JoinHandle<RedirectDisposition> {
        let ingress = self.clone();
        let redirect_uri = redirect_uri.into();
        tokio::spawn(async move { ingress.handle(&redirect_uri).await })
    }
}

impl<E> std::fmt::Debug for RedirectIngress<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectIngress")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}
