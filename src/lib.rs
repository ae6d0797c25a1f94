//! GitHub OAuth 2.0 authorization-code flow coordination.
//!
//! A flow is started by [`AuthorizationCoordinator::start_flow`], which hands
//! the authorization URL to a host-supplied [`UserAgent`] and returns at once.
//! The provider's redirect later arrives at [`RedirectIngress`], possibly on a
//! different task or thread, which exchanges the code and resolves the flow
//! through the shared [`PendingFlowRegistry`]. Each flow delivers at most one
//! outcome.

mod config;
mod coordinator;
mod error;
mod exchange;
mod ingress;
#[cfg(feature = "local-server")]
mod local_server;
mod pkce;
mod registry;
mod types;
mod user_agent;

pub use config::{
    AuthConfig, DEFAULT_REDIRECT_URI, DEFAULT_SCOPE, GITHUB_AUTHORIZE_URL, GITHUB_TOKEN_URL,
    TokenRequestFormat,
};
pub use coordinator::{AuthorizationCoordinator, Completion, FlowHandle};
pub use error::{AuthError, ExchangeError};
pub use exchange::{TokenExchange, TokenExchangeClient};
pub use ingress::{RedirectDisposition, RedirectIngress};
#[cfg(feature = "local-server")]
pub use local_server::{LocalServer, LocalServerConfig};
pub use pkce::PkcePair;
pub use registry::{PendingFlow, PendingFlowRegistry, RoutingMode};
pub use types::{
    AccessToken, AuthorizationGrant, FailureReason, FlowFailure, FlowId, FlowOutcome,
    RedirectPayload, TokenRequest, TokenResponse,
};
#[cfg(feature = "browser")]
pub use user_agent::SystemBrowser;
pub use user_agent::UserAgent;
