//! JSON-RPC 2.0 framing.
//!
//! Every websocket text frame holds one JSON object. Inbound frames are
//! decoded once into [`Inbound`]; handlers never touch raw JSON.

use super::messages::{Join, Negotiation, SessionDescription, SignalRequest, Trickle};
use crate::errors::{ProtocolError, SfError};
use common::types::SessionId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Correlation id of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(u64),
    Str(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Num(id)
    }
}

/// Error object of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<&SfError> for RpcError {
    fn from(err: &SfError) -> Self {
        Self {
            code: err.error_code(),
            message: err.client_message(),
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    sid: Option<SessionId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Request (with `id`) or notification (without).
    Request {
        id: Option<RequestId>,
        sid: Option<SessionId>,
        request: SignalRequest,
    },
    /// Reply to a request this node sent.
    Response {
        id: Option<RequestId>,
        sid: Option<SessionId>,
        outcome: Result<SessionDescription, RpcError>,
    },
}

/// A frame that failed to decode, with whatever correlation could be
/// recovered so the caller can still reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub id: Option<RequestId>,
    pub sid: Option<SessionId>,
    pub error: ProtocolError,
}

impl Inbound {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| DecodeError {
            id: None,
            sid: None,
            error: ProtocolError::Parse(e.to_string()),
        })?;

        let RawFrame {
            id,
            sid,
            method,
            params,
            result,
            error,
        } = raw;

        if let Some(method) = method {
            return match decode_request(&method, params.unwrap_or(Value::Null)) {
                Ok(request) => Ok(Inbound::Request { id, sid, request }),
                Err(error) => Err(DecodeError { id, sid, error }),
            };
        }

        if let Some(rpc_error) = error {
            return Ok(Inbound::Response {
                id,
                sid,
                outcome: Err(rpc_error),
            });
        }

        match result {
            Some(result) => match serde_json::from_value::<SessionDescription>(result) {
                Ok(desc) => Ok(Inbound::Response {
                    id,
                    sid,
                    outcome: Ok(desc),
                }),
                Err(e) => Err(DecodeError {
                    id,
                    sid,
                    error: ProtocolError::Parse(format!("invalid result: {e}")),
                }),
            },
            None => Err(DecodeError {
                id,
                sid,
                error: ProtocolError::Parse("frame has neither method nor result".to_string()),
            }),
        }
    }

    /// Session id carried by the frame (federation link only).
    #[must_use]
    pub fn sid(&self) -> Option<&SessionId> {
        match self {
            Inbound::Request { sid, .. } | Inbound::Response { sid, .. } => sid.as_ref(),
        }
    }
}

fn decode_request(method: &str, params: Value) -> Result<SignalRequest, ProtocolError> {
    match method {
        "join" => parse_params::<Join>("join", params).map(SignalRequest::Join),
        "offer" => parse_params::<Negotiation>("offer", params).map(SignalRequest::Offer),
        "answer" => parse_params::<Negotiation>("answer", params).map(SignalRequest::Answer),
        "trickle" => parse_params::<Trickle>("trickle", params).map(SignalRequest::Trickle),
        other => Err(ProtocolError::UnknownMethod(other.to_string())),
    }
}

fn parse_params<T: DeserializeOwned>(
    method: &'static str,
    params: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams {
        method,
        reason: e.to_string(),
    })
}

/// A frame this node writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Request {
        id: RequestId,
        request: SignalRequest,
    },
    Notification(SignalRequest),
    Reply {
        id: RequestId,
        desc: SessionDescription,
    },
    Error {
        id: Option<RequestId>,
        error: RpcError,
    },
}

impl OutboundMessage {
    /// Error reply for a failed request.
    #[must_use]
    pub fn error(id: Option<RequestId>, err: &SfError) -> Self {
        OutboundMessage::Error {
            id,
            error: RpcError::from(err),
        }
    }

    /// Encode as a text frame, tagging it with `sid` when given.
    pub fn encode(&self, sid: Option<&SessionId>) -> Result<String, serde_json::Error> {
        let mut frame = Map::new();
        frame.insert("jsonrpc".to_string(), Value::from("2.0"));
        if let Some(sid) = sid {
            frame.insert("sid".to_string(), Value::from(sid.as_str()));
        }

        match self {
            OutboundMessage::Request { id, request } => {
                frame.insert("id".to_string(), serde_json::to_value(id)?);
                frame.insert("method".to_string(), Value::from(request.method()));
                frame.insert("params".to_string(), request.params()?);
            }
            OutboundMessage::Notification(request) => {
                frame.insert("method".to_string(), Value::from(request.method()));
                frame.insert("params".to_string(), request.params()?);
            }
            OutboundMessage::Reply { id, desc } => {
                frame.insert("id".to_string(), serde_json::to_value(id)?);
                frame.insert("result".to_string(), serde_json::to_value(desc)?);
            }
            OutboundMessage::Error { id, error } => {
                frame.insert("id".to_string(), serde_json::to_value(id)?);
                frame.insert("error".to_string(), serde_json::to_value(error)?);
            }
        }

        serde_json::to_string(&Value::Object(frame))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::messages::{IceCandidateInit, Target};
    use serde_json::json;

    #[test]
    fn test_decode_join_request() {
        let text = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "join",
            "params": {
                "sid": "room-1",
                "uid": "alice",
                "offer": {"type": "offer", "sdp": "v=0"},
                "config": {"NoPublish": false}
            }
        })
        .to_string();

        let inbound = Inbound::decode(&text).unwrap();
        let Inbound::Request { id, sid, request } = inbound else {
            panic!("expected request");
        };
        assert_eq!(id, Some(RequestId::Num(1)));
        assert_eq!(sid, None);
        let SignalRequest::Join(join) = request else {
            panic!("expected join");
        };
        assert_eq!(join.sid.as_str(), "room-1");
        assert_eq!(join.uid.as_str(), "alice");
        assert_eq!(join.offer.sdp, "v=0");
    }

    #[test]
    fn test_decode_trickle_notification_with_sid() {
        let text = json!({
            "jsonrpc": "2.0",
            "sid": "room-9",
            "method": "trickle",
            "params": {"target": 1, "candidate": {"candidate": "candidate:1"}}
        })
        .to_string();

        let inbound = Inbound::decode(&text).unwrap();
        assert_eq!(inbound.sid().map(SessionId::as_str), Some("room-9"));
        let Inbound::Request { id, request, .. } = inbound else {
            panic!("expected request");
        };
        assert_eq!(id, None);
        assert_eq!(
            request,
            SignalRequest::Trickle(Trickle {
                target: Target::Subscriber,
                candidate: IceCandidateInit::new("candidate:1"),
            })
        );
    }

    #[test]
    fn test_decode_rejects_out_of_range_target() {
        let text = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "trickle",
            "params": {"target": 2, "candidate": {"candidate": "candidate:1"}}
        })
        .to_string();

        let err = Inbound::decode(&text).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Num(4)));
        assert!(matches!(
            err.error,
            ProtocolError::InvalidParams {
                method: "trickle",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_unknown_method_keeps_id() {
        let text = r#"{"jsonrpc":"2.0","id":"abc","method":"leave","params":{}}"#;

        let err = Inbound::decode(text).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Str("abc".to_string())));
        assert_eq!(err.error, ProtocolError::UnknownMethod("leave".to_string()));
    }

    #[test]
    fn test_decode_garbage_is_parse_error() {
        let err = Inbound::decode("not json").unwrap_err();
        assert_eq!(err.id, None);
        assert!(matches!(err.error, ProtocolError::Parse(_)));
    }

    #[test]
    fn test_decode_success_and_error_responses() {
        let ok = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "sid": "room-1",
            "result": {"type": "answer", "sdp": "v=0 answer"}
        })
        .to_string();
        let Inbound::Response { outcome, .. } = Inbound::decode(&ok).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(outcome, Ok(SessionDescription::answer("v=0 answer")));

        let failed = json!({
            "jsonrpc": "2.0",
            "id": 8,
            "error": {"code": 500, "message": "negotiation failed"}
        })
        .to_string();
        let Inbound::Response { outcome, .. } = Inbound::decode(&failed).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(outcome.unwrap_err().code, 500);
    }

    #[test]
    fn test_encode_request_tagged_with_sid() {
        let message = OutboundMessage::Request {
            id: RequestId::Num(3),
            request: SignalRequest::Offer(Negotiation {
                desc: SessionDescription::offer("v=0"),
            }),
        };

        let value: Value =
            serde_json::from_str(&message.encode(Some(&SessionId::from("room-1"))).unwrap())
                .unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 3);
        assert_eq!(value["sid"], "room-1");
        assert_eq!(value["method"], "offer");
        assert_eq!(value["params"]["desc"]["type"], "offer");
    }

    #[test]
    fn test_encode_notification_has_no_id() {
        let message = OutboundMessage::Notification(SignalRequest::Trickle(Trickle {
            target: Target::Publisher,
            candidate: IceCandidateInit::new("candidate:1"),
        }));

        let value: Value = serde_json::from_str(&message.encode(None).unwrap()).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("sid").is_none());
        assert_eq!(value["params"]["target"], 0);
    }

    #[test]
    fn test_encode_error_reply() {
        let err = SfError::Negotiation("bad offer".to_string());
        let message = OutboundMessage::error(Some(RequestId::Num(2)), &err);

        let value: Value = serde_json::from_str(&message.encode(None).unwrap()).unwrap();
        assert_eq!(value["id"], 2);
        assert_eq!(value["error"]["code"], 500);
        assert_eq!(value["error"]["message"], "bad offer");
    }
}
