//! Signaling wire protocol.
//!
//! JSON-RPC 2.0 frames carrying `join`, `offer`, `answer` and `trickle`.
//! Frames on the federation link also carry a top-level `sid` so one socket
//! can multiplex many sessions.

pub mod envelope;
pub mod messages;

pub use envelope::{DecodeError, Inbound, OutboundMessage, RequestId, RpcError};
pub use messages::{
    IceCandidateInit, Join, JoinConfig, Negotiation, SdpType, SessionDescription, SignalRequest,
    Target, Trickle,
};
