//! Media engine contract.
//!
//! The engine owns sessions, RTP forwarding and ICE. This crate drives it only
//! through [`MediaEngine`] and [`MediaPeer`]; the concrete SFU is supplied by
//! the embedding process.

use crate::errors::SfError;
use crate::protocol::{IceCandidateInit, JoinConfig, SessionDescription, Target};
use async_trait::async_trait;
use common::types::{SessionId, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Invoked when the engine needs to renegotiate and has produced an offer
/// that must reach the remote end.
pub type OfferCallback = Arc<dyn Fn(SessionDescription) + Send + Sync>;

/// Invoked for every locally gathered ICE candidate.
pub type IceCandidateCallback = Arc<dyn Fn(IceCandidateInit, Target) + Send + Sync>;

/// Failure reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// SDP could not be applied or produced.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The peer has been closed.
    #[error("peer closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for SfError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Negotiation(msg) => SfError::Negotiation(msg),
            EngineError::Closed => SfError::Closed,
            EngineError::Other(msg) => SfError::Engine(msg),
        }
    }
}

/// One media-engine peer connection (publisher and subscriber transports).
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Join the session, creating it if this is its first peer.
    async fn join(
        &self,
        sid: &SessionId,
        uid: &UserId,
        config: JoinConfig,
    ) -> Result<(), EngineError>;

    /// Apply a remote offer and return the local answer.
    async fn answer(&self, offer: SessionDescription) -> Result<SessionDescription, EngineError>;

    /// Apply a remote answer to the outstanding local offer.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Add a remote ICE candidate to the given transport.
    async fn trickle(&self, candidate: IceCandidateInit, target: Target)
        -> Result<(), EngineError>;

    /// Create an offer and set it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Leave the session. Calling it more than once has no further effect.
    async fn close(&self);

    fn on_offer(&self, callback: OfferCallback);

    fn on_ice_candidate(&self, callback: IceCandidateCallback);
}

/// Session-level access to the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a peer that has not joined any session yet.
    fn new_peer(&self) -> Arc<dyn MediaPeer>;

    /// Sessions with at least one peer on this node.
    fn session_ids(&self) -> Vec<SessionId>;

    /// Close every peer of a session.
    async fn remove_all_peers(&self, sid: &SessionId);
}
