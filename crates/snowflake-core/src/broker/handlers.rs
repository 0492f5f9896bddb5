//! HTTP handlers for the broker endpoints.
//!
//! Errors are settled here at the handler boundary; the core below never
//! panics on input. See [`BrokerError`] for the status mapping.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info};

use super::messages::{
    decode_answer_request, decode_poll_request, encode_answer_response, encode_poll_response,
};
use super::{prometheus, BrokerContext, ClientOffer, NatType, READ_LIMIT};
use crate::error::BrokerError;

/// Header a client uses to report its own NAT class.
pub const NAT_TYPE_HEADER: &str = "Snowflake-NAT-Type";

/// Shared handler state.
#[derive(Clone)]
pub struct BrokerState {
    pub ctx: Arc<BrokerContext>,
    /// Path of the metrics log served on `/metrics`, if configured.
    pub metrics_log: Option<PathBuf>,
}

async fn read_body(body: Body) -> Result<Bytes, BrokerError> {
    axum::body::to_bytes(body, READ_LIMIT)
        .await
        .map_err(|_| BrokerError::BadRequest)
}

/// `POST /proxy` - snowflake proxies request a client offer, blocking
/// until one arrives or the proxy timeout passes.
pub async fn proxy_polls(
    State(state): State<BrokerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Result<Response, BrokerError> {
    let body = read_body(request.into_body()).await?;
    let poll = decode_poll_request(&body)?;
    let nat_type = NatType::parse(&poll.nat_type);

    state.ctx.metrics().update_country_stats(remote.ip());

    match state
        .ctx
        .request_offer(&poll.sid, &poll.proxy_type, nat_type)
        .await
    {
        Some(offer) => {
            state.ctx.metrics().record_proxy_matched(nat_type);
            let bytes = encode_poll_response(&offer.sdp, true, offer.nat_type.as_str())?;
            Ok(bytes.into_response())
        }
        None => {
            state.ctx.metrics().record_proxy_idle(nat_type);
            let bytes = encode_poll_response(b"", false, "")?;
            Ok(bytes.into_response())
        }
    }
}

/// `POST /client` - a client offers its SDP and waits for the matched
/// proxy's answer.
pub async fn client_offers(
    State(state): State<BrokerState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, BrokerError> {
    let start = Instant::now();
    let sdp = read_body(request.into_body()).await?;
    let nat_type = headers
        .get(NAT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(NatType::parse)
        .unwrap_or(NatType::Unknown);

    // The match runs on its own task so slot teardown happens even when
    // the requesting client disconnects mid-wait; a dropped handler future
    // must not strand a popped slot.
    let ctx = Arc::clone(&state.ctx);
    let answer = tokio::spawn(async move {
        let Some(snowflake) = ctx.match_snowflake(nat_type) else {
            ctx.metrics().record_client_denied(nat_type);
            return Err(BrokerError::NoProxyAvailable);
        };

        let offer = ClientOffer { sdp, nat_type };
        // The send fails only when the waiter raced us out between pop and
        // here; the slot is ours either way and is torn down below.
        let sent = snowflake
            .offer_tx
            .lock()
            .take()
            .map(|tx| tx.send(offer).is_ok())
            .unwrap_or(false);
        let answer_rx = snowflake.answer_rx.lock().take();

        let result = match (sent, answer_rx) {
            (true, Some(rx)) => match timeout(ctx.config().client_timeout, rx).await {
                Ok(Ok(answer)) => Ok(answer),
                _ => Err(BrokerError::MatchTimeout),
            },
            _ => Err(BrokerError::MatchTimeout),
        };

        ctx.finalize_snowflake(&snowflake);

        match result {
            Ok(answer) => {
                ctx.metrics()
                    .record_client_matched(nat_type, start.elapsed().as_millis() as u64);
                Ok(answer)
            }
            Err(err) => {
                info!(id = %snowflake.id(), "client timed out waiting for answer");
                Err(err)
            }
        }
    })
    .await
    .map_err(|_| BrokerError::Io(std::io::Error::other("client match task failed")))??;

    Ok(answer.into_response())
}

/// `POST /answer` - a previously matched proxy returns its SDP answer,
/// which is routed by snowflake id to the waiting client.
pub async fn proxy_answers(
    State(state): State<BrokerState>,
    request: Request,
) -> Result<Response, BrokerError> {
    let body = read_body(request.into_body()).await?;
    let answer = decode_answer_request(&body)?;

    let sender = state.ctx.take_answer_sender(&answer.id);
    let success = sender.is_some();
    if let Some(tx) = sender {
        // Non-blocking by construction; if the client already timed out
        // the answer is discarded silently.
        let _ = tx.send(Bytes::from(answer.answer_sdp));
    } else {
        debug!(id = %answer.id, "answer for unknown or already-served snowflake");
    }

    let bytes = encode_answer_response(success)?;
    Ok(bytes.into_response())
}

/// `GET /debug` - plain-text registry snapshot.
pub async fn debug_handler(State(state): State<BrokerState>) -> String {
    state.ctx.snapshot()
}

/// `GET /robots.txt`
pub async fn robots_txt() -> &'static str {
    "User-agent: *\nDisallow: /\n"
}

/// `GET /metrics` - contents of the metrics log file, 404 when none is
/// configured.
pub async fn metrics_file(State(state): State<BrokerState>) -> Response {
    let Some(path) = state.metrics_log else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /prometheus` - standard Prometheus text exposition.
pub async fn prometheus_handler() -> String {
    prometheus::render_metrics()
}
