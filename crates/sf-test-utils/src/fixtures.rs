//! Frame and config builders.

use serde_json::{json, Value};
use signal_federation::federation::FederationConfig;
use std::time::Duration;

/// Federation settings with test-sized backoff and join timeout.
#[must_use]
pub fn federation_config(upstream_url: &str) -> FederationConfig {
    FederationConfig {
        join_timeout: Some(Duration::from_secs(5)),
        backoff_base: Duration::from_millis(20),
        backoff_max: Duration::from_millis(200),
        ..FederationConfig::new(upstream_url)
    }
}

#[must_use]
pub fn join_request(id: u64, sid: &str, uid: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "join",
        "params": {
            "sid": sid,
            "uid": uid,
            "offer": {"type": "offer", "sdp": format!("v=0 {uid}-offer")}
        }
    })
}

#[must_use]
pub fn offer_request(id: u64, sdp: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "offer",
        "params": {"desc": {"type": "offer", "sdp": sdp}}
    })
}

#[must_use]
pub fn offer_notification(sdp: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "offer",
        "params": {"desc": {"type": "offer", "sdp": sdp}}
    })
}

#[must_use]
pub fn answer_notification(sdp: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "answer",
        "params": {"desc": {"type": "answer", "sdp": sdp}}
    })
}

/// `target` is the wire index: 0 publisher, 1 subscriber.
#[must_use]
pub fn trickle_notification(target: u8, candidate: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "trickle",
        "params": {
            "target": target,
            "candidate": {"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0}
        }
    })
}

/// Successful reply carrying an SDP answer.
#[must_use]
pub fn answer_reply(id: u64, sdp: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"type": "answer", "sdp": sdp}
    })
}

/// Add a top-level `sid`, as on the federation link.
#[must_use]
pub fn tagged(mut frame: Value, sid: &str) -> Value {
    frame["sid"] = Value::from(sid);
    frame
}
