//! In-memory media engine for tests.
//!
//! Every peer the engine hands out is kept so tests can inspect what the code
//! under test asked of it, and can fire the engine-side callbacks (renegotiation
//! offers, gathered candidates) by hand.

use async_trait::async_trait;
use common::types::{SessionId, UserId};
use signal_federation::engine::{
    EngineError, IceCandidateCallback, MediaEngine, MediaPeer, OfferCallback,
};
use signal_federation::federation::connector::PULL_PEER_UID;
use signal_federation::protocol::{IceCandidateInit, JoinConfig, SessionDescription, Target};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Failure switches applied to peers created after they are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerBehavior {
    pub fail_join: bool,
    pub fail_answer: bool,
    pub fail_create_offer: bool,
    pub fail_remote_description: bool,
    /// Emit one publisher candidate from inside `create_offer`, before the
    /// offer is returned.
    pub gather_on_offer: bool,
}

/// Mock [`MediaEngine`].
///
/// Cheap to clone; clones share the same peers.
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<EngineInner>>,
}

#[derive(Default)]
struct EngineInner {
    peers: Vec<Arc<MockPeer>>,
    removed: Vec<SessionId>,
    behavior: PeerBehavior,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the behaviour of peers created from now on.
    pub fn set_behavior(&self, behavior: PeerBehavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    /// Create a peer already joined to `sid`, as if a local user were in it.
    pub fn seed_session(&self, sid: &str, uid: &str) -> Arc<MockPeer> {
        let peer = self.create_peer();
        peer.state.lock().unwrap().joined = Some((
            SessionId::from(sid),
            UserId::from(uid),
            JoinConfig::default(),
        ));
        peer
    }

    /// Every peer ever created, in creation order.
    #[must_use]
    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.inner.lock().unwrap().peers.clone()
    }

    /// Open peers joined to `sid`.
    #[must_use]
    pub fn peers_in(&self, sid: &str) -> Vec<Arc<MockPeer>> {
        self.peers()
            .into_iter()
            .filter(|peer| !peer.is_closed() && peer.session_id().as_deref() == Some(sid))
            .collect()
    }

    /// Peers (open or closed) that joined `sid` as a pull peer.
    #[must_use]
    pub fn pull_peers_for(&self, sid: &str) -> Vec<Arc<MockPeer>> {
        self.peers()
            .into_iter()
            .filter(|peer| {
                peer.session_id().as_deref() == Some(sid)
                    && peer.user_id().as_deref() == Some(PULL_PEER_UID)
            })
            .collect()
    }

    /// Sessions passed to `remove_all_peers`, in call order.
    #[must_use]
    pub fn removed_sessions(&self) -> Vec<SessionId> {
        self.inner.lock().unwrap().removed.clone()
    }

    fn create_peer(&self) -> Arc<MockPeer> {
        let mut inner = self.inner.lock().unwrap();
        let peer = Arc::new(MockPeer::new(inner.behavior));
        inner.peers.push(Arc::clone(&peer));
        peer
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    fn new_peer(&self) -> Arc<dyn MediaPeer> {
        self.create_peer()
    }

    fn session_ids(&self) -> Vec<SessionId> {
        let sessions: BTreeSet<SessionId> = self
            .peers()
            .iter()
            .filter(|peer| !peer.is_closed())
            .filter_map(|peer| peer.session_id().map(SessionId::from))
            .collect();
        sessions.into_iter().collect()
    }

    async fn remove_all_peers(&self, sid: &SessionId) {
        for peer in self.peers_in(sid.as_str()) {
            peer.close().await;
        }
        self.inner.lock().unwrap().removed.push(sid.clone());
    }
}

/// Mock [`MediaPeer`] recording every call.
pub struct MockPeer {
    behavior: PeerBehavior,
    state: Mutex<PeerState>,
    offer_callback: Mutex<Option<OfferCallback>>,
    ice_callback: Mutex<Option<IceCandidateCallback>>,
}

#[derive(Default)]
struct PeerState {
    joined: Option<(SessionId, UserId, JoinConfig)>,
    answered_offers: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    trickles: Vec<(IceCandidateInit, Target)>,
    offers_created: usize,
    close_count: usize,
}

impl MockPeer {
    fn new(behavior: PeerBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(PeerState::default()),
            offer_callback: Mutex::new(None),
            ice_callback: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.joined.as_ref().map(|(sid, _, _)| sid.to_string())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.joined.as_ref().map(|(_, uid, _)| uid.to_string())
    }

    #[must_use]
    pub fn join_config(&self) -> Option<JoinConfig> {
        let state = self.state.lock().unwrap();
        state.joined.as_ref().map(|(_, _, config)| *config)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().close_count > 0
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    /// Remote offers this peer answered.
    #[must_use]
    pub fn answered_offers(&self) -> Vec<SessionDescription> {
        self.state.lock().unwrap().answered_offers.clone()
    }

    /// Remote answers applied to this peer's offers.
    #[must_use]
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().unwrap().remote_descriptions.clone()
    }

    #[must_use]
    pub fn trickles(&self) -> Vec<(IceCandidateInit, Target)> {
        self.state.lock().unwrap().trickles.clone()
    }

    #[must_use]
    pub fn offers_created(&self) -> usize {
        self.state.lock().unwrap().offers_created
    }

    /// Fire the engine's renegotiation callback. Returns false if none is set.
    pub fn emit_offer(&self, desc: SessionDescription) -> bool {
        let callback = self.offer_callback.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(desc);
                true
            }
            None => false,
        }
    }

    /// Fire the candidate callback. Returns false if none is set.
    pub fn emit_ice_candidate(&self, candidate: IceCandidateInit, target: Target) -> bool {
        let callback = self.ice_callback.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(candidate, target);
                true
            }
            None => false,
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaPeer for MockPeer {
    async fn join(
        &self,
        sid: &SessionId,
        uid: &UserId,
        config: JoinConfig,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.behavior.fail_join {
            return Err(EngineError::Other("mock join failure".to_string()));
        }
        self.state.lock().unwrap().joined = Some((sid.clone(), uid.clone(), config));
        Ok(())
    }

    async fn answer(&self, offer: SessionDescription) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        if self.behavior.fail_answer {
            return Err(EngineError::Negotiation("mock answer failure".to_string()));
        }
        self.state.lock().unwrap().answered_offers.push(offer);
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.behavior.fail_remote_description {
            return Err(EngineError::Negotiation(
                "mock remote description failure".to_string(),
            ));
        }
        self.state.lock().unwrap().remote_descriptions.push(desc);
        Ok(())
    }

    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.state.lock().unwrap().trickles.push((candidate, target));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        if self.behavior.fail_create_offer {
            return Err(EngineError::Negotiation("mock offer failure".to_string()));
        }
        let n = {
            let mut state = self.state.lock().unwrap();
            state.offers_created += 1;
            state.offers_created
        };
        if self.behavior.gather_on_offer {
            self.emit_ice_candidate(
                IceCandidateInit::new(format!("candidate:gathered-{n}")),
                Target::Publisher,
            );
        }
        Ok(SessionDescription::offer(format!("v=0 mock-offer-{n}")))
    }

    async fn close(&self) {
        self.state.lock().unwrap().close_count += 1;
    }

    fn on_offer(&self, callback: OfferCallback) {
        *self.offer_callback.lock().unwrap() = Some(callback);
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        *self.ice_callback.lock().unwrap() = Some(callback);
    }
}
