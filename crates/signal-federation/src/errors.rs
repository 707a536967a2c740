//! Signal federation error types.
//!
//! Errors map to JSON-RPC error codes for replies on the signaling link.
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// JSON-RPC code for a frame that is not valid JSON.
pub const CODE_PARSE_ERROR: i32 = -32700;
/// JSON-RPC code for a request that is not valid in the current state.
pub const CODE_INVALID_REQUEST: i32 = -32600;
/// JSON-RPC code for an unknown method.
pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC code for params that do not match the method.
pub const CODE_INVALID_PARAMS: i32 = -32602;
/// Code used for negotiation and internal failures.
pub const CODE_INTERNAL: i32 = 500;

/// Signal federation error type.
///
/// Maps to wire error codes:
/// - `Protocol`: JSON-RPC codes (-32700, -32601, -32602)
/// - `InvalidState`: `-32600`
/// - Negotiation, Engine, Registry, Relay, Config, Internal, Closed: `500`
#[derive(Debug, Error)]
pub enum SfError {
    /// Session registry read failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Relay connection to the upstream node failed.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Inbound message was malformed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Message is not valid in the current signaling state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// SDP negotiation failed in the media engine.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Any other media engine failure.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Join referenced a session the registry does not recognize.
    #[error("Session not recognized: {0}")]
    SessionNotRecognized(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The signaling connection is closed.
    #[error("Connection closed")]
    Closed,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors decoding an inbound protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object of the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Method tag is not one of join, offer, answer, trickle.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Params do not match the method.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        method: &'static str,
        reason: String,
    },

    /// Federation frame without a session id.
    #[error("missing session id")]
    MissingSessionId,
}

impl SfError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SfError::Protocol(ProtocolError::Parse(_)) => CODE_PARSE_ERROR,
            SfError::Protocol(ProtocolError::UnknownMethod(_)) => CODE_METHOD_NOT_FOUND,
            SfError::Protocol(
                ProtocolError::InvalidParams { .. } | ProtocolError::MissingSessionId,
            ) => CODE_INVALID_PARAMS,
            SfError::InvalidState(_) => CODE_INVALID_REQUEST,
            SfError::Registry(_)
            | SfError::Relay(_)
            | SfError::Negotiation(_)
            | SfError::Engine(_)
            | SfError::SessionNotRecognized(_)
            | SfError::Config(_)
            | SfError::Closed
            | SfError::Internal(_) => CODE_INTERNAL,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SfError::Registry(_)
            | SfError::Relay(_)
            | SfError::Config(_)
            | SfError::Internal(_) => "An internal error occurred".to_string(),
            SfError::Protocol(e) => e.to_string(),
            SfError::InvalidState(reason) => (*reason).to_string(),
            SfError::Negotiation(msg) | SfError::Engine(msg) => msg.clone(),
            SfError::SessionNotRecognized(_) => "Session not recognized".to_string(),
            SfError::Closed => "Connection closed".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            SfError::from(ProtocolError::Parse("eof".to_string())).error_code(),
            -32700
        );
        assert_eq!(
            SfError::from(ProtocolError::UnknownMethod("leave".to_string())).error_code(),
            -32601
        );
        assert_eq!(
            SfError::from(ProtocolError::InvalidParams {
                method: "trickle",
                reason: "target out of range".to_string(),
            })
            .error_code(),
            -32602
        );
        assert_eq!(SfError::from(ProtocolError::MissingSessionId).error_code(), -32602);
        assert_eq!(SfError::InvalidState("not joined").error_code(), -32600);

        assert_eq!(SfError::Negotiation("bad sdp".to_string()).error_code(), 500);
        assert_eq!(SfError::Registry("down".to_string()).error_code(), 500);
        assert_eq!(SfError::Relay("refused".to_string()).error_code(), 500);
        assert_eq!(SfError::Closed.error_code(), 500);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let registry_err = SfError::Registry("connection refused at 10.0.0.7:6379".to_string());
        assert!(!registry_err.client_message().contains("10.0.0.7"));
        assert_eq!(registry_err.client_message(), "An internal error occurred");

        let relay_err = SfError::Relay("ws://upstream:7070/pull reset".to_string());
        assert_eq!(relay_err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_negotiation_message_is_surfaced() {
        let err = SfError::Negotiation("offer has no media sections".to_string());
        assert_eq!(err.client_message(), "offer has no media sections");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SfError::Registry("timeout".to_string())),
            "Registry error: timeout"
        );
        assert_eq!(
            format!(
                "{}",
                SfError::from(ProtocolError::InvalidParams {
                    method: "join",
                    reason: "missing field `sid`".to_string(),
                })
            ),
            "Protocol error: invalid params for join: missing field `sid`"
        );
    }
}
