//! Unified error types for the broker.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for broker operations.
///
/// Request-path errors map onto an HTTP status at the handler boundary via
/// [`IntoResponse`]; idle polls and unknown-slot answers are not errors and
/// travel inside their response envelopes instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokerError {
    /// Malformed, oversize, or undecodable request payload.
    #[error("bad request")]
    BadRequest,

    /// No compatible proxy at the instant of the client offer.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// The offer was delivered but no answer arrived in time, or the offer
    /// could not be delivered to the popped proxy at all.
    #[error("timed out waiting for answer")]
    MatchTimeout,

    /// The codec refused a well-formed logical value.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// GeoIP database loading or parsing failed.
    #[error("geoip error: {0}")]
    Geoip(String),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        match self {
            BrokerError::BadRequest => StatusCode::BAD_REQUEST.into_response(),
            BrokerError::NoProxyAvailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            BrokerError::MatchTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, "timed out waiting for answer!").into_response()
            }
            BrokerError::Encode(_) | BrokerError::Geoip(_) | BrokerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
