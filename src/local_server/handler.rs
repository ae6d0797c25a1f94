use std::sync::{Arc, Mutex};

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse},
};
use tokio::sync::oneshot;
use tracing::debug;

use crate::{AuthError, RedirectDisposition, RedirectIngress, TokenExchange};

use super::target::RedirectTarget;

pub(super) type ServeResult = Result<RedirectDisposition, AuthError>;
pub(super) type SharedResultSender = Arc<Mutex<Option<oneshot::Sender<ServeResult>>>>;

pub(super) struct ReceiverState<E> {
    pub(super) target: RedirectTarget,
    pub(super) ingress: RedirectIngress<E>,
    pub(super) success_html: String,
    pub(super) error_html: String,
    pub(super) result_tx: SharedResultSender,
}

impl<E> Clone for ReceiverState<E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            ingress: self.ingress.clone(),
            success_html: self.success_html.clone(),
            error_html: self.error_html.clone(),
            result_tx: self.result_tx.clone(),
        }
    }
}

/// Sends the first result only; later ones are dropped.
pub(super) fn send_result(result_tx: &SharedResultSender, result: ServeResult) {
    let sender = result_tx
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

pub(super) async fn callback_handler<E: TokenExchange + 'static>(
    State(state): State<ReceiverState<E>>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let callback_url = state.target.callback_url(&query.unwrap_or_default());
    let disposition = state.ingress.handle(&callback_url).await;
    debug!(?disposition, "loopback redirect handled");

    if disposition.is_terminal() {
        send_result(&state.result_tx, Ok(disposition));
    }

    match disposition {
        RedirectDisposition::Authorized => (StatusCode::OK, Html(state.success_html)),
        RedirectDisposition::Superseded => (StatusCode::GONE, Html(state.error_html)),
        RedirectDisposition::Ignored => (StatusCode::BAD_REQUEST, Html(state.error_html)),
        _ => (StatusCode::OK, Html(state.error_html)),
    }
}

pub(super) async fn fallback_handler<E>(State(state): State<ReceiverState<E>>) -> impl IntoResponse
where
    E: Send + Sync + 'static,
{
    (StatusCode::NOT_FOUND, Html(state.error_html))
}
