//! `POST /api/chat`

use bytes::Bytes;
use hyper::Request;
use tracing::debug;

use crate::chat::ChatRequest;
use crate::metrics::Metrics;
use crate::routes::common::{ok, parse_valid, HandlerResult};
use crate::routes::courses;
use crate::server::AppState;

/// Answer a visitor question; never fails once the input is valid
pub async fn chat(req: &Request<Bytes>, state: &AppState) -> HandlerResult {
    let body: ChatRequest = parse_valid(req)?;
    Metrics::incr(&state.metrics.chat_requests);

    let catalogue = courses::summaries(state).await.unwrap_or_else(|e| {
        debug!(error = %e, "Chat without course catalogue");
        Vec::new()
    });

    let reply = state.chat.reply(&body, &catalogue).await;
    if reply.fallback {
        Metrics::incr(&state.metrics.chat_fallbacks);
    }
    ok(&reply)
}
