//! Typed signaling payloads.
//!
//! Field names follow the browser WebRTC dictionaries (`sdpMid`,
//! `sdpMLineIndex`, ...) so frames from web clients decode without
//! translation.

use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SDP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Join options forwarded to the media engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(rename = "NoPublish", default)]
    pub no_publish: bool,
    #[serde(rename = "NoSubscribe", default)]
    pub no_subscribe: bool,
    #[serde(rename = "NoAutoSubscribe", default)]
    pub no_auto_subscribe: bool,
}

/// Which of a peer's two transports a candidate belongs to.
///
/// Encoded on the wire as `0` (publisher) or `1` (subscriber).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Target {
    Publisher,
    Subscriber,
}

impl Target {
    /// The same transport as seen from the other end of a relay link.
    ///
    /// A pull peer subscribes to what the remote peer publishes, so roles
    /// swap when a candidate crosses nodes.
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Target::Publisher => Target::Subscriber,
            Target::Subscriber => Target::Publisher,
        }
    }

    #[must_use]
    pub fn index(self) -> u8 {
        u8::from(self)
    }
}

impl From<Target> for u8 {
    fn from(target: Target) -> Self {
        match target {
            Target::Publisher => 0,
            Target::Subscriber => 1,
        }
    }
}

impl TryFrom<u8> for Target {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Target::Publisher),
            1 => Ok(Target::Subscriber),
            other => Err(format!("target must be 0 or 1, got {other}")),
        }
    }
}

/// `join` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub sid: SessionId,
    #[serde(default)]
    pub uid: UserId,
    pub offer: SessionDescription,
    #[serde(default)]
    pub config: JoinConfig,
}

/// `offer` and `answer` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub desc: SessionDescription,
}

/// `trickle` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trickle {
    pub target: Target,
    pub candidate: IceCandidateInit,
}

/// One variant per signaling method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalRequest {
    Join(Join),
    Offer(Negotiation),
    Answer(Negotiation),
    Trickle(Trickle),
}

impl SignalRequest {
    /// Wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            SignalRequest::Join(_) => "join",
            SignalRequest::Offer(_) => "offer",
            SignalRequest::Answer(_) => "answer",
            SignalRequest::Trickle(_) => "trickle",
        }
    }

    pub(crate) fn params(&self) -> Result<Value, serde_json::Error> {
        match self {
            SignalRequest::Join(join) => serde_json::to_value(join),
            SignalRequest::Offer(negotiation) | SignalRequest::Answer(negotiation) => {
                serde_json::to_value(negotiation)
            }
            SignalRequest::Trickle(trickle) => serde_json::to_value(trickle),
        }
    }
}
