//! Wire codec for broker signaling payloads.
//!
//! JSON envelopes exchanged with proxies on `/proxy` and `/answer`.
//! Clients speak raw SDP bytes plus the `Snowflake-NAT-Type` header and do
//! not go through this codec. Any decode failure maps to HTTP 400 at the
//! handler boundary; encode failures map to 500.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};

/// Proxy poll body: `{sid, proxyType, natType}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub sid: String,
    #[serde(default)]
    pub proxy_type: String,
    #[serde(default)]
    pub nat_type: String,
}

/// Poll response: `{sdp, natType, matched}`. An idle poll carries empty
/// strings and `matched=false`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub sdp: String,
    pub nat_type: String,
    pub matched: bool,
}

/// Proxy answer body: `{id, answerSdp}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub id: String,
    pub answer_sdp: String,
}

/// Answer response envelope: `{success}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub success: bool,
}

pub fn decode_poll_request(body: &[u8]) -> BrokerResult<PollRequest> {
    let request: PollRequest =
        serde_json::from_slice(body).map_err(|_| BrokerError::BadRequest)?;
    if request.sid.is_empty() {
        return Err(BrokerError::BadRequest);
    }
    Ok(request)
}

pub fn encode_poll_response(sdp: &[u8], matched: bool, nat_type: &str) -> BrokerResult<Vec<u8>> {
    let response = PollResponse {
        sdp: String::from_utf8_lossy(sdp).into_owned(),
        nat_type: nat_type.to_owned(),
        matched,
    };
    Ok(serde_json::to_vec(&response)?)
}

/// Decode an answer request. An empty id or empty answer is malformed: an
/// empty answer would read as a successful match delivering nothing.
pub fn decode_answer_request(body: &[u8]) -> BrokerResult<AnswerRequest> {
    let request: AnswerRequest =
        serde_json::from_slice(body).map_err(|_| BrokerError::BadRequest)?;
    if request.id.is_empty() || request.answer_sdp.is_empty() {
        return Err(BrokerError::BadRequest);
    }
    Ok(request)
}

pub fn encode_answer_response(success: bool) -> BrokerResult<Vec<u8>> {
    Ok(serde_json::to_vec(&AnswerResponse { success })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_poll_request_accepts_full_body() {
        let body = br#"{"sid":"p1","proxyType":"standalone","natType":"unrestricted"}"#;
        let request = decode_poll_request(body).expect("valid poll request");
        assert_eq!(request.sid, "p1");
        assert_eq!(request.proxy_type, "standalone");
        assert_eq!(request.nat_type, "unrestricted");
    }

    #[test]
    fn decode_poll_request_rejects_garbage_and_empty_sid() {
        assert!(decode_poll_request(b"not json").is_err());
        assert!(decode_poll_request(br#"{"sid":""}"#).is_err());
        assert!(decode_poll_request(br#"{"proxyType":"badge"}"#).is_err());
    }

    #[test]
    fn decode_answer_request_rejects_empty_answer() {
        assert!(decode_answer_request(br#"{"id":"p1","answerSdp":""}"#).is_err());
        assert!(decode_answer_request(br#"{"id":"","answerSdp":"sdp"}"#).is_err());
        let ok = decode_answer_request(br#"{"id":"p1","answerSdp":"ANSWER"}"#)
            .expect("valid answer request");
        assert_eq!(ok.id, "p1");
        assert_eq!(ok.answer_sdp, "ANSWER");
    }

    #[test]
    fn encode_poll_response_idle_shape() {
        let bytes = encode_poll_response(b"", false, "").expect("encode");
        let response: PollResponse = serde_json::from_slice(&bytes).expect("self-decode");
        assert!(!response.matched);
        assert!(response.sdp.is_empty());
        assert!(response.nat_type.is_empty());
    }
}
