//! JSON-RPC payloads exchanged with the peer over the message channel.
//!
//! Inbound envelopes are decoded by the channel into [`RpcRequest`] /
//! [`RpcResponse`]; dispatch happens on the closed [`Method`] enumeration.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorReason, PairLinkError, Result};
use crate::types::{
    AuthPayload, Cacao, Metadata, Namespaces, Participant, RelayProtocolOptions,
    RequiredNamespaces, SessionProperties,
};

/// Every protocol method this engine sends or handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "wc_pairingPing")]
    PairingPing,
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete,
    #[serde(rename = "wc_sessionPropose")]
    SessionPropose,
    #[serde(rename = "wc_sessionSettle")]
    SessionSettle,
    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate,
    #[serde(rename = "wc_sessionExtend")]
    SessionExtend,
    #[serde(rename = "wc_sessionPing")]
    SessionPing,
    #[serde(rename = "wc_sessionDelete")]
    SessionDelete,
    #[serde(rename = "wc_sessionEvent")]
    SessionEvent,
    #[serde(rename = "wc_sessionAuthenticate")]
    SessionAuthenticate,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::PairingPing,
        Method::PairingDelete,
        Method::SessionPropose,
        Method::SessionSettle,
        Method::SessionUpdate,
        Method::SessionExtend,
        Method::SessionPing,
        Method::SessionDelete,
        Method::SessionEvent,
        Method::SessionAuthenticate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::PairingPing => "wc_pairingPing",
            Method::PairingDelete => "wc_pairingDelete",
            Method::SessionPropose => "wc_sessionPropose",
            Method::SessionSettle => "wc_sessionSettle",
            Method::SessionUpdate => "wc_sessionUpdate",
            Method::SessionExtend => "wc_sessionExtend",
            Method::SessionPing => "wc_sessionPing",
            Method::SessionDelete => "wc_sessionDelete",
            Method::SessionEvent => "wc_sessionEvent",
            Method::SessionAuthenticate => "wc_sessionAuthenticate",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PairLinkError;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| PairLinkError::Validation(format!("unsupported method {s}")))
    }
}

// ---------------------------------------------------------------------------
// Request params
// ---------------------------------------------------------------------------

/// Params for methods that carry no payload (pings, extend).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    pub relays: Vec<RelayProtocolOptions>,
    pub proposer: Participant,
    pub required_namespaces: RequiredNamespaces,
    #[serde(default)]
    pub optional_namespaces: RequiredNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    pub relay: RelayProtocolOptions,
    pub controller: Participant,
    pub namespaces: Namespaces,
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<SessionProperties>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: Namespaces,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventParams {
    pub event: EventData,
    pub chain_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAuthenticateParams {
    pub requester: Participant,
    pub auth_payload: AuthPayload,
    pub expiry_timestamp: i64,
}

/// Typed request params, tagged by the JSON-RPC method name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RequestParams {
    #[serde(rename = "wc_pairingPing")]
    PairingPing(EmptyParams),
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete(ErrorReason),
    #[serde(rename = "wc_sessionPropose")]
    SessionPropose(SessionProposeParams),
    #[serde(rename = "wc_sessionSettle")]
    SessionSettle(SessionSettleParams),
    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate(SessionUpdateParams),
    #[serde(rename = "wc_sessionExtend")]
    SessionExtend(EmptyParams),
    #[serde(rename = "wc_sessionPing")]
    SessionPing(EmptyParams),
    #[serde(rename = "wc_sessionDelete")]
    SessionDelete(ErrorReason),
    #[serde(rename = "wc_sessionEvent")]
    SessionEvent(SessionEventParams),
    #[serde(rename = "wc_sessionAuthenticate")]
    SessionAuthenticate(SessionAuthenticateParams),
}

impl RequestParams {
    pub fn method(&self) -> Method {
        match self {
            RequestParams::PairingPing(_) => Method::PairingPing,
            RequestParams::PairingDelete(_) => Method::PairingDelete,
            RequestParams::SessionPropose(_) => Method::SessionPropose,
            RequestParams::SessionSettle(_) => Method::SessionSettle,
            RequestParams::SessionUpdate(_) => Method::SessionUpdate,
            RequestParams::SessionExtend(_) => Method::SessionExtend,
            RequestParams::SessionPing(_) => Method::SessionPing,
            RequestParams::SessionDelete(_) => Method::SessionDelete,
            RequestParams::SessionEvent(_) => Method::SessionEvent,
            RequestParams::SessionAuthenticate(_) => Method::SessionAuthenticate,
        }
    }
}

/// An inbound request addressed to this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    #[serde(flatten)]
    pub params: RequestParams,
}

impl RpcRequest {
    pub fn new(id: u64, params: RequestParams) -> Self {
        Self { id, params }
    }

    pub fn method(&self) -> Method {
        self.params.method()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcOutcome {
    Result(Value),
    Error(ErrorReason),
}

/// A peer's reply to a request this engine sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub method: Method,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    pub fn result(id: u64, method: Method, value: Value) -> Self {
        Self {
            id,
            method,
            outcome: RpcOutcome::Result(value),
        }
    }

    pub fn error(id: u64, method: Method, reason: ErrorReason) -> Self {
        Self {
            id,
            method,
            outcome: RpcOutcome::Error(reason),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Error(_))
    }

    /// Decode the result payload, or surface the peer's error as `Protocol`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.outcome {
            RpcOutcome::Result(value) => serde_json::from_value(value.clone()).map_err(|e| {
                PairLinkError::Validation(format!("malformed {} result: {e}", self.method))
            }),
            RpcOutcome::Error(reason) => Err(PairLinkError::Protocol(reason.clone())),
        }
    }
}

/// Responder's answer to `wc_sessionPropose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResponse {
    pub relay: RelayProtocolOptions,
    pub responder_public_key: String,
}

/// Responder's answer to `wc_sessionAuthenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub cacaos: Vec<Cacao>,
    pub responder: Participant,
}

impl AuthenticateResponse {
    pub fn responder_metadata(&self) -> &Metadata {
        &self.responder.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_names_round_trip_through_from_str() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
            let serialized = serde_json::to_value(method).unwrap();
            assert_eq!(serialized, json!(method.as_str()));
        }
        assert!("wc_sessionRequest".parse::<Method>().is_err());
    }

    #[test]
    fn request_is_tagged_by_method() {
        let request = RpcRequest::new(7, RequestParams::SessionDelete(ErrorReason::user_disconnected()));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "wc_sessionDelete");
        assert_eq!(value["params"]["code"], 6000);
        assert_eq!(request.method(), Method::SessionDelete);
    }

    #[test]
    fn inbound_request_decodes_into_typed_params() {
        let raw = json!({
            "id": 3,
            "method": "wc_sessionUpdate",
            "params": {"namespaces": {}}
        });
        let request: RpcRequest = serde_json::from_value(raw).unwrap();
        assert!(matches!(request.params, RequestParams::SessionUpdate(_)));
    }

    #[test]
    fn error_response_decodes_as_protocol_error() {
        let response = RpcResponse::error(1, Method::SessionPropose, ErrorReason::user_rejected());
        assert!(response.is_error());
        let err = response.decode::<SessionProposeResponse>().unwrap_err();
        assert!(matches!(err, PairLinkError::Protocol(r) if r.code == 5000));
    }

    #[test]
    fn result_response_decodes_payload() {
        let response = RpcResponse::result(
            1,
            Method::SessionPropose,
            json!({"relay": {"protocol": "irn"}, "responderPublicKey": "abc"}),
        );
        let decoded: SessionProposeResponse = response.decode().unwrap();
        assert_eq!(decoded.responder_public_key, "abc");
    }
}
