//! Per-connection signaling state machine.
//!
//! ```text
//! New --join--> Joined <--answer-- Renegotiating
//!                 |   --engine offer-->    |
//!                 +--------> Closed <------+   (from any state)
//! ```
//!
//! Messages are handled one at a time in arrival order. `Renegotiating` means
//! a locally generated offer has been sent and its answer is outstanding.
//! Everything received after `Closed` is ignored.
//!
//! If the offer carried by `join` cannot be answered, the peer stays in the
//! session and the client may retry with the same `join` or with `offer`.

use super::OutboundSink;
use crate::engine::MediaPeer;
use crate::errors::SfError;
use crate::federation::FederationConnector;
use crate::protocol::{
    Inbound, Join, Negotiation, OutboundMessage, RequestId, SessionDescription, SignalRequest,
    Trickle,
};
use crate::registry::{read_registry, SessionRegistry};
use common::types::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How a handler admits `join`.
#[derive(Clone)]
pub enum JoinPolicy {
    /// End-user connection: the registry must list the session, and remote
    /// sessions are federated in on first join.
    Federating {
        registry: Arc<dyn SessionRegistry>,
        connector: FederationConnector,
    },
    /// Federation ingress: the downstream node already checked the registry,
    /// and the session is never federated onward.
    Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    New,
    Joined,
    Renegotiating,
    Closed,
}

/// What the connection loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    Continue,
    Close,
}

pub struct SignalHandler {
    peer: Arc<dyn MediaPeer>,
    sink: OutboundSink,
    policy: JoinPolicy,
    joined: Option<SessionId>,
    /// Set once the join offer has been answered.
    join_answered: bool,
    closed: bool,
    /// Set by the engine's offer callback, cleared when the answer lands.
    pending_local_offer: Arc<AtomicBool>,
}

impl SignalHandler {
    #[must_use]
    pub fn new(peer: Arc<dyn MediaPeer>, sink: OutboundSink, policy: JoinPolicy) -> Self {
        Self {
            peer,
            sink,
            policy,
            joined: None,
            join_answered: false,
            closed: false,
            pending_local_offer: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn state(&self) -> SignalState {
        if self.closed {
            SignalState::Closed
        } else if self.joined.is_none() {
            SignalState::New
        } else if self.pending_local_offer.load(Ordering::SeqCst) {
            SignalState::Renegotiating
        } else {
            SignalState::Joined
        }
    }

    /// Session joined by this connection, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.joined.as_ref()
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> HandlerFlow {
        if self.closed {
            return HandlerFlow::Close;
        }

        match Inbound::decode(text) {
            Ok(inbound) => self.handle(inbound).await,
            Err(e) => {
                warn!(
                    target: "sf.signal.handler",
                    error = %e.error,
                    "Malformed signaling message"
                );
                if let Some(id) = e.id {
                    self.reply_error(Some(id), &SfError::Protocol(e.error));
                }
                HandlerFlow::Continue
            }
        }
    }

    /// Handle one decoded message.
    pub async fn handle(&mut self, inbound: Inbound) -> HandlerFlow {
        if self.closed {
            debug!(
                target: "sf.signal.handler",
                "Ignoring message after close"
            );
            return HandlerFlow::Close;
        }

        match inbound {
            Inbound::Request { id, request, .. } => match request {
                SignalRequest::Join(join) => self.join(id, join).await,
                SignalRequest::Offer(negotiation) => {
                    self.offer(id, negotiation).await;
                    HandlerFlow::Continue
                }
                SignalRequest::Answer(negotiation) => {
                    self.answer(negotiation).await;
                    HandlerFlow::Continue
                }
                SignalRequest::Trickle(trickle) => {
                    self.trickle(trickle).await;
                    HandlerFlow::Continue
                }
            },
            Inbound::Response { id, .. } => {
                debug!(
                    target: "sf.signal.handler",
                    request_id = ?id,
                    "Ignoring unsolicited response"
                );
                HandlerFlow::Continue
            }
        }
    }

    #[instrument(skip_all, fields(sid = %join.sid, uid = %join.uid))]
    async fn join(&mut self, id: Option<RequestId>, join: Join) -> HandlerFlow {
        if let Some(current) = self.joined.clone() {
            if self.join_answered || current != join.sid {
                self.reply_error(id, &SfError::InvalidState("already joined"));
                return HandlerFlow::Continue;
            }
            debug!(
                target: "sf.signal.handler",
                sid = %join.sid,
                "Retrying join negotiation"
            );
            self.answer_join(id, join.offer).await;
            return HandlerFlow::Continue;
        }

        if let JoinPolicy::Federating {
            registry,
            connector,
        } = self.policy.clone()
        {
            let view = read_registry(registry.as_ref()).await;
            if !view.recognizes(&join.sid) {
                let err = SfError::SessionNotRecognized(join.sid.to_string());
                warn!(
                    target: "sf.signal.handler",
                    sid = %join.sid,
                    error = %err,
                    "Join rejected, closing connection"
                );
                self.close().await;
                return HandlerFlow::Close;
            }
            connector.ensure_federated(&join.sid).await;
        }

        self.register_callbacks();

        if let Err(e) = self.peer.join(&join.sid, &join.uid, join.config).await {
            let err = SfError::from(e);
            warn!(
                target: "sf.signal.handler",
                sid = %join.sid,
                error = %err,
                "Peer failed to join session"
            );
            self.reply_error(id, &err);
            return HandlerFlow::Continue;
        }

        info!(
            target: "sf.signal.handler",
            sid = %join.sid,
            uid = %join.uid,
            "Peer joined session"
        );
        self.joined = Some(join.sid);
        self.answer_join(id, join.offer).await;
        HandlerFlow::Continue
    }

    async fn answer_join(&mut self, id: Option<RequestId>, offer: SessionDescription) {
        match self.peer.answer(offer).await {
            Ok(answer) => {
                self.join_answered = true;
                self.reply(id, answer);
            }
            Err(e) => {
                let err = SfError::from(e);
                warn!(
                    target: "sf.signal.handler",
                    error = %err,
                    "Failed to answer join offer"
                );
                self.reply_error(id, &err);
            }
        }
    }

    async fn offer(&mut self, id: Option<RequestId>, negotiation: Negotiation) {
        if self.joined.is_none() {
            self.reply_error(id, &SfError::InvalidState("offer before join"));
            return;
        }

        match self.peer.answer(negotiation.desc).await {
            Ok(answer) => self.reply(id, answer),
            Err(e) => {
                let err = SfError::from(e);
                warn!(
                    target: "sf.signal.handler",
                    error = %err,
                    "Failed to answer renegotiation offer"
                );
                self.reply_error(id, &err);
            }
        }
    }

    async fn answer(&mut self, negotiation: Negotiation) {
        if self.joined.is_none() {
            warn!(
                target: "sf.signal.handler",
                "Ignoring answer before join"
            );
            return;
        }

        match self.peer.set_remote_description(negotiation.desc).await {
            Ok(()) => self.pending_local_offer.store(false, Ordering::SeqCst),
            Err(e) => {
                warn!(
                    target: "sf.signal.handler",
                    error = %e,
                    "Failed to apply remote answer"
                );
            }
        }
    }

    async fn trickle(&mut self, trickle: Trickle) {
        if self.joined.is_none() {
            warn!(
                target: "sf.signal.handler",
                "Ignoring candidate before join"
            );
            return;
        }

        if let Err(e) = self.peer.trickle(trickle.candidate, trickle.target).await {
            warn!(
                target: "sf.signal.handler",
                target_index = trickle.target.index(),
                error = %e,
                "Failed to add remote candidate"
            );
        }
    }

    /// Close the peer and, for a direct connection, the socket.
    ///
    /// Idempotent; reachable from every state.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.peer.close().await;
        self.sink.close_transport();
        debug!(
            target: "sf.signal.handler",
            sid = ?self.joined,
            "Signal handler closed"
        );
    }

    fn register_callbacks(&self) {
        let sink = self.sink.clone();
        let pending = Arc::clone(&self.pending_local_offer);
        self.peer.on_offer(Arc::new(move |desc| {
            pending.store(true, Ordering::SeqCst);
            let message =
                OutboundMessage::Notification(SignalRequest::Offer(Negotiation { desc }));
            if let Err(e) = sink.send(&message) {
                debug!(
                    target: "sf.signal.handler",
                    error = %e,
                    "Offer notification not delivered"
                );
            }
        }));

        let sink = self.sink.clone();
        self.peer
            .on_ice_candidate(Arc::new(move |candidate, target| {
                let message =
                    OutboundMessage::Notification(SignalRequest::Trickle(Trickle {
                        target,
                        candidate,
                    }));
                if let Err(e) = sink.send(&message) {
                    debug!(
                        target: "sf.signal.handler",
                        error = %e,
                        "Candidate notification not delivered"
                    );
                }
            }));
    }

    fn reply(&self, id: Option<RequestId>, desc: SessionDescription) {
        let Some(id) = id else {
            return;
        };
        if let Err(e) = self.sink.send(&OutboundMessage::Reply { id, desc }) {
            debug!(
                target: "sf.signal.handler",
                error = %e,
                "Reply not delivered"
            );
        }
    }

    fn reply_error(&self, id: Option<RequestId>, err: &SfError) {
        if id.is_none() {
            return;
        }
        if let Err(e) = self.sink.send(&OutboundMessage::error(id, err)) {
            debug!(
                target: "sf.signal.handler",
                error = %e,
                "Error reply not delivered"
            );
        }
    }
}
