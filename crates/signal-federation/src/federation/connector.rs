//! Federation connector.
//!
//! Bridges a session hosted on the upstream node into this node. The first
//! local join for a session creates a pull peer, which joins the local
//! session and negotiates with the upstream over the shared relay link.
//!
//! # Tasks
//!
//! - One pull-peer task per federated session (join, offer, send `join`).
//! - One relay supervisor: reads frames, dispatches them by `sid`, and on
//!   disconnect reconnects with exponential backoff and re-drives every
//!   pull peer's join on the new link.
//! - One watchdog per join attempt when a join timeout is configured.
//!
//! A join that finds no relay link is parked. It is re-sent when any task
//! opens a link, or when the session is referenced again.
//!
//! Only the response to a pull peer's latest join is applied; replies that
//! belong to an earlier attempt or to an evicted predecessor are dropped.
//!
//! # Candidate targets
//!
//! The pull peer's subscriber faces the upstream peer's publisher and vice
//! versa, so targets are flipped in both directions on the relay link.

use super::pull_peers::{PullPeer, PullPeerTable};
use super::relay::{RelayConnection, RelayHandle, RelaySource};
use crate::config::Config;
use crate::engine::MediaEngine;
use crate::errors::SfError;
use crate::observability::metrics;
use crate::protocol::{
    Inbound, Join, JoinConfig, Negotiation, OutboundMessage, RequestId, SessionDescription,
    SignalRequest, Trickle,
};
use common::types::{SessionId, UserId};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Base delay for exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum backoff delay.
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// User id a pull peer joins its local session with.
pub const PULL_PEER_UID: &str = "pull";

/// Connector settings.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Upstream federation endpoint, e.g. `ws://origin:7070/pull`.
    pub upstream_url: String,
    /// How long a join may wait for the upstream answer. `None` waits forever.
    pub join_timeout: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl FederationConfig {
    #[must_use]
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            join_timeout: Some(Duration::from_secs(
                crate::config::DEFAULT_FEDERATION_JOIN_TIMEOUT_SECONDS,
            )),
            backoff_base: BACKOFF_BASE,
            backoff_max: BACKOFF_MAX,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            join_timeout: config.federation_join_timeout(),
            ..Self::new(config.upstream_url())
        }
    }
}

/// Lazily federates remote sessions over one shared relay link.
///
/// Cheap to clone; clones share the same table and relay.
#[derive(Clone)]
pub struct FederationConnector {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn MediaEngine>,
    pull_peers: PullPeerTable,
    relay: RelayHandle,
    /// Held while dialing so only one task connects at a time.
    connect_lock: Mutex<()>,
    next_request_id: AtomicU64,
    config: FederationConfig,
    cancel_token: CancellationToken,
}

enum Reconnect {
    Connected(Arc<RelayConnection>, RelaySource),
    /// Another task installed a connection (and owns its reader).
    Superseded,
    Cancelled,
}

impl FederationConnector {
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: FederationConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                pull_peers: PullPeerTable::new(),
                relay: RelayHandle::new(),
                connect_lock: Mutex::new(()),
                next_request_id: AtomicU64::new(1),
                config,
                cancel_token,
            }),
        }
    }

    #[must_use]
    pub fn pull_peers(&self) -> &PullPeerTable {
        &self.inner.pull_peers
    }

    #[must_use]
    pub fn relay(&self) -> &RelayHandle {
        &self.inner.relay
    }

    /// Make sure `sid` has a pull peer.
    ///
    /// Returns true if this call created it. The handshake runs in the
    /// background; this never waits for the upstream.
    #[instrument(skip_all, fields(sid = %sid))]
    pub async fn ensure_federated(&self, sid: &SessionId) -> bool {
        let engine = Arc::clone(&self.inner.engine);
        let (pull_peer, created) = self
            .inner
            .pull_peers
            .get_or_insert_with(sid, || PullPeer::new(sid.clone(), engine.new_peer()))
            .await;

        if !created {
            if pull_peer.take_awaiting_relay() {
                info!(
                    target: "sf.federation.connector",
                    sid = %sid,
                    "Retrying federation join parked without a relay link"
                );
                tokio::spawn(Arc::clone(&self.inner).drive_join(pull_peer));
            } else {
                debug!(
                    target: "sf.federation.connector",
                    sid = %sid,
                    "Session already federated"
                );
            }
            return false;
        }

        metrics::record_federation_started();
        info!(
            target: "sf.federation.connector",
            sid = %sid,
            "Federating remote session"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.start_pull_peer(pull_peer).await });
        true
    }

    /// Stop the supervisor and watchdogs and close the relay link.
    pub async fn shutdown(&self) {
        self.inner.cancel_token.cancel();
        self.inner.relay.shutdown().await;
        info!(
            target: "sf.federation.connector",
            "Federation connector stopped"
        );
    }
}

impl Inner {
    async fn start_pull_peer(self: Arc<Self>, pull_peer: Arc<PullPeer>) {
        let sid = pull_peer.session_id().clone();
        self.install_candidate_forwarding(&pull_peer);

        let uid = UserId::new(PULL_PEER_UID);
        if let Err(e) = pull_peer
            .peer()
            .join(&sid, &uid, JoinConfig::default())
            .await
        {
            warn!(
                target: "sf.federation.connector",
                sid = %sid,
                error = %e,
                "Pull peer failed to join local session"
            );
            self.arm_join_timeout(pull_peer, self.relay.generation());
            return;
        }

        Arc::clone(&self).drive_join(pull_peer).await;
    }

    /// Forward the pull peer's candidates upstream with the target flipped.
    fn install_candidate_forwarding(self: &Arc<Self>, pull_peer: &Arc<PullPeer>) {
        // Weak refs: the callback lives inside the peer, which the table owns.
        let inner = Arc::downgrade(self);
        let owner = Arc::downgrade(pull_peer);
        let runtime = tokio::runtime::Handle::current();

        pull_peer
            .peer()
            .on_ice_candidate(Arc::new(move |candidate, target| {
                let (Some(inner), Some(pull_peer)) = (inner.upgrade(), owner.upgrade()) else {
                    return;
                };
                let trickle = Trickle {
                    target: target.flip(),
                    candidate,
                };
                let Some(trickle) = pull_peer.hold_candidate(trickle) else {
                    return;
                };
                let sid = pull_peer.session_id().clone();
                runtime.spawn(async move {
                    let message = OutboundMessage::Notification(SignalRequest::Trickle(trickle));
                    if let Err(e) = inner.relay.send(&sid, &message).await {
                        debug!(
                            target: "sf.federation.connector",
                            sid = %sid,
                            error = %e,
                            "Candidate not forwarded"
                        );
                    }
                });
            }));
    }

    /// Send the pull peer's join on the current relay link.
    ///
    /// Boxed because the supervisor spawns it from inside its own task.
    fn drive_join(self: Arc<Self>, pull_peer: Arc<PullPeer>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let sid = pull_peer.session_id().clone();

            let relay = match self.ensure_relay().await {
                Ok(relay) => relay,
                Err(e) => {
                    warn!(
                        target: "sf.federation.connector",
                        sid = %sid,
                        error = %e,
                        "Relay unavailable, federation join pending"
                    );
                    pull_peer.mark_awaiting_relay();
                    self.arm_join_timeout(pull_peer, self.relay.generation());
                    return;
                }
            };

            let generation = relay.generation();
            if !pull_peer.claim_join(generation) {
                debug!(
                    target: "sf.federation.connector",
                    sid = %sid,
                    generation = generation,
                    "Join already sent on this relay link"
                );
                return;
            }
            self.arm_join_timeout(Arc::clone(&pull_peer), generation);

            let offer = match pull_peer.peer().create_offer().await {
                Ok(offer) => offer,
                Err(e) => {
                    warn!(
                        target: "sf.federation.connector",
                        sid = %sid,
                        error = %e,
                        "Pull peer failed to create offer"
                    );
                    return;
                }
            };

            let id = RequestId::from(self.next_request_id.fetch_add(1, Ordering::SeqCst));
            pull_peer.set_join_request(id.clone());
            let join = OutboundMessage::Request {
                id: id.clone(),
                request: SignalRequest::Join(Join {
                    sid: sid.clone(),
                    uid: UserId::default(),
                    offer,
                    config: JoinConfig::default(),
                }),
            };

            if let Err(e) = relay.send(&sid, &join).await {
                warn!(
                    target: "sf.federation.connector",
                    sid = %sid,
                    error = %e,
                    "Failed to send federation join"
                );
                return;
            }

            info!(
                target: "sf.federation.connector",
                sid = %sid,
                request_id = ?id,
                generation = generation,
                "Federation join sent"
            );

            for trickle in pull_peer.release_candidates() {
                let message = OutboundMessage::Notification(SignalRequest::Trickle(trickle));
                if let Err(e) = relay.send(&sid, &message).await {
                    debug!(
                        target: "sf.federation.connector",
                        sid = %sid,
                        error = %e,
                        "Held candidate not forwarded"
                    );
                    break;
                }
            }
        })
    }

    /// Evict the pull peer if its answer has not arrived in time.
    ///
    /// `generation` is the relay link of this attempt; a later join on a
    /// newer link has its own watchdog.
    fn arm_join_timeout(self: &Arc<Self>, pull_peer: Arc<PullPeer>, generation: u64) {
        let Some(timeout) = self.config.join_timeout else {
            return;
        };
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {}
                () = inner.cancel_token.cancelled() => return,
            }

            if pull_peer.is_answered() || pull_peer.join_generation() > generation {
                return;
            }

            let sid = pull_peer.session_id();
            if inner.pull_peers.remove_if_same(sid, &pull_peer).await {
                metrics::record_federation_join_timeout();
                warn!(
                    target: "sf.federation.connector",
                    sid = %sid,
                    timeout_seconds = timeout.as_secs(),
                    age_seconds = pull_peer.age_seconds(),
                    "Federation join timed out, pull peer evicted"
                );
                pull_peer.peer().close().await;
            }
        });
    }

    async fn ensure_relay(self: &Arc<Self>) -> Result<Arc<RelayConnection>, SfError> {
        if let Some(connection) = self.relay.current().await {
            return Ok(connection);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(connection) = self.relay.current().await {
            return Ok(connection);
        }

        let (connection, source) = self.connect_locked().await?;
        let inner = Arc::clone(self);
        let supervised = Arc::clone(&connection);
        tokio::spawn(async move { inner.supervise(supervised, source).await });
        self.redrive_parked().await;
        Ok(connection)
    }

    /// Dial and install a new connection. Caller holds `connect_lock`.
    async fn connect_locked(&self) -> Result<(Arc<RelayConnection>, RelaySource), SfError> {
        if self.cancel_token.is_cancelled() {
            return Err(SfError::Relay("federation connector shut down".to_string()));
        }

        let generation = self.relay.next_generation();
        let (connection, source) =
            RelayConnection::connect(&self.config.upstream_url, generation).await?;
        self.relay.install(Arc::clone(&connection)).await;

        info!(
            target: "sf.federation.relay",
            generation = generation,
            "Relay connection established"
        );
        Ok((connection, source))
    }

    /// Own the relay reader until shutdown, replacing the link when it drops.
    async fn supervise(
        self: Arc<Self>,
        mut connection: Arc<RelayConnection>,
        mut source: RelaySource,
    ) {
        loop {
            self.pump(&connection, &mut source).await;
            if self.cancel_token.is_cancelled() {
                break;
            }

            self.relay.clear(connection.generation()).await;
            warn!(
                target: "sf.federation.relay",
                generation = connection.generation(),
                "Relay connection lost, reconnecting"
            );

            match self.reconnect().await {
                Reconnect::Connected(next, next_source) => {
                    connection = next;
                    source = next_source;
                    self.rejoin_all().await;
                }
                Reconnect::Superseded => {
                    self.rejoin_all().await;
                    break;
                }
                Reconnect::Cancelled => break,
            }
        }

        debug!(
            target: "sf.federation.relay",
            "Relay supervisor exiting"
        );
    }

    /// Read frames until the link ends or shutdown.
    async fn pump(&self, connection: &RelayConnection, source: &mut RelaySource) {
        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(connection, &text).await,
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(
                            target: "sf.federation.relay",
                            generation = connection.generation(),
                            error = %e,
                            "Relay read failed"
                        );
                        return;
                    }
                },
                () = self.cancel_token.cancelled() => {
                    connection.close().await;
                    return;
                }
            }
        }
    }

    async fn reconnect(&self) -> Reconnect {
        let mut delay = self.config.backoff_base;

        loop {
            {
                let _guard = self.connect_lock.lock().await;
                if self.cancel_token.is_cancelled() {
                    return Reconnect::Cancelled;
                }
                if self.relay.current().await.is_some() {
                    return Reconnect::Superseded;
                }
                match self.connect_locked().await {
                    Ok((connection, source)) => {
                        metrics::record_relay_reconnect("success");
                        return Reconnect::Connected(connection, source);
                    }
                    Err(e) => {
                        metrics::record_relay_reconnect("error");
                        warn!(
                            target: "sf.federation.relay",
                            error = %e,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Relay reconnect failed"
                        );
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel_token.cancelled() => return Reconnect::Cancelled,
            }
            delay = (delay * 2).min(self.config.backoff_max);
        }
    }

    /// Re-send the join of every pull peer still in the table.
    async fn rejoin_all(self: &Arc<Self>) {
        let pull_peers = self.pull_peers.snapshot().await;
        info!(
            target: "sf.federation.relay",
            sessions = pull_peers.len(),
            "Re-driving federation joins on new relay link"
        );
        for pull_peer in pull_peers {
            tokio::spawn(Arc::clone(self).drive_join(pull_peer));
        }
    }

    /// Re-send the join of every pull peer that found no relay link.
    ///
    /// Peers whose join is still in flight reach the new link on their own.
    async fn redrive_parked(self: &Arc<Self>) {
        for pull_peer in self.pull_peers.snapshot().await {
            if pull_peer.take_awaiting_relay() {
                debug!(
                    target: "sf.federation.relay",
                    sid = %pull_peer.session_id(),
                    "Re-driving parked federation join"
                );
                tokio::spawn(Arc::clone(self).drive_join(pull_peer));
            }
        }
    }

    /// Route one inbound relay frame to its pull peer.
    async fn dispatch(&self, connection: &RelayConnection, text: &str) {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(
                    target: "sf.federation.relay",
                    error = %e.error,
                    "Dropping undecodable relay frame"
                );
                return;
            }
        };

        let Some(sid) = inbound.sid().cloned() else {
            warn!(
                target: "sf.federation.relay",
                "Dropping relay frame without sid"
            );
            return;
        };

        let Some(pull_peer) = self.pull_peers.get(&sid).await else {
            debug!(
                target: "sf.federation.relay",
                sid = %sid,
                "Dropping relay frame for unknown session"
            );
            return;
        };

        if let Inbound::Response { id, .. } = &inbound {
            if !pull_peer.is_join_response(id.as_ref()) {
                debug!(
                    target: "sf.federation.relay",
                    sid = %sid,
                    request_id = ?id,
                    "Dropping response to a superseded join"
                );
                return;
            }
        }

        match inbound {
            Inbound::Response {
                outcome: Ok(desc), ..
            } => apply_answer(&pull_peer, desc).await,
            Inbound::Response {
                outcome: Err(error),
                ..
            } => {
                warn!(
                    target: "sf.federation.relay",
                    sid = %sid,
                    code = error.code,
                    message = %error.message,
                    "Upstream rejected federation request"
                );
            }
            Inbound::Request {
                request: SignalRequest::Answer(negotiation),
                ..
            } => apply_answer(&pull_peer, negotiation.desc).await,
            Inbound::Request {
                id,
                request: SignalRequest::Offer(negotiation),
                ..
            } => match pull_peer.peer().answer(negotiation.desc).await {
                Ok(answer) => {
                    let reply = match id {
                        Some(id) => OutboundMessage::Reply { id, desc: answer },
                        None => OutboundMessage::Notification(SignalRequest::Answer(
                            Negotiation { desc: answer },
                        )),
                    };
                    if let Err(e) = connection.send(&sid, &reply).await {
                        warn!(
                            target: "sf.federation.relay",
                            sid = %sid,
                            error = %e,
                            "Failed to send renegotiation answer"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        target: "sf.federation.relay",
                        sid = %sid,
                        error = %e,
                        "Pull peer failed to answer upstream offer"
                    );
                }
            },
            Inbound::Request {
                request: SignalRequest::Trickle(trickle),
                ..
            } => {
                if let Err(e) = pull_peer
                    .peer()
                    .trickle(trickle.candidate, trickle.target.flip())
                    .await
                {
                    warn!(
                        target: "sf.federation.relay",
                        sid = %sid,
                        error = %e,
                        "Pull peer rejected candidate"
                    );
                }
            }
            Inbound::Request {
                request: SignalRequest::Join(_),
                ..
            } => {
                debug!(
                    target: "sf.federation.relay",
                    sid = %sid,
                    "Ignoring join on pull side of relay"
                );
            }
        }
    }
}

async fn apply_answer(pull_peer: &PullPeer, desc: SessionDescription) {
    let sid = pull_peer.session_id();
    match pull_peer.peer().set_remote_description(desc).await {
        Ok(()) => {
            pull_peer.mark_answered();
            info!(
                target: "sf.federation.relay",
                sid = %sid,
                "Federation answer applied"
            );
        }
        Err(e) => {
            warn!(
                target: "sf.federation.relay",
                sid = %sid,
                error = %e,
                "Pull peer rejected upstream answer"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_constants() {
        assert_eq!(BACKOFF_BASE, Duration::from_secs(1));
        assert_eq!(BACKOFF_MAX, Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_env_config() {
        let vars = std::collections::HashMap::from([
            (
                "REDIS_URL".to_string(),
                "redis://localhost:6379".to_string(),
            ),
            ("SF_UPSTREAM_ADDRESS".to_string(), "origin:7070".to_string()),
            (
                "SF_FEDERATION_JOIN_TIMEOUT_SECONDS".to_string(),
                "0".to_string(),
            ),
        ]);
        let config = Config::from_vars(&vars).unwrap();

        let federation = FederationConfig::from_config(&config);
        assert_eq!(federation.upstream_url, "ws://origin:7070/pull");
        assert_eq!(federation.join_timeout, None);
        assert_eq!(federation.backoff_base, BACKOFF_BASE);
    }
}
