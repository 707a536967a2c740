//! Two-node federation scenario.
//!
//! Node B serves an end user and pulls `room-1` from node A over a real
//! relay websocket. Both nodes run the full signaling server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use sf_test_utils::fixtures::{join_request, offer_request};
use sf_test_utils::{assert_eventually, MockPeer, MockRegistry, SignalClient, TestSfNode};
use signal_federation::protocol::{IceCandidateInit, SessionDescription, Target};
use signal_federation::tasks::{run_reconciliation, ReconcileOutcome};
use std::sync::Arc;

/// Upstream for the origin node; nothing listens there.
const UNUSED_UPSTREAM: &str = "ws://127.0.0.1:9/pull";

struct Cluster {
    origin: TestSfNode,
    edge: TestSfNode,
    client: SignalClient,
    pull_peer: Arc<MockPeer>,
    origin_peer: Arc<MockPeer>,
}

/// A user joins `room-1` on the edge node; wait until the pull handshake
/// with the origin has completed.
async fn federated_cluster() -> Result<Cluster, anyhow::Error> {
    let origin = TestSfNode::spawn(UNUSED_UPSTREAM, MockRegistry::with_sessions(&["room-1"])).await?;
    let edge = TestSfNode::spawn(&origin.pull_url(), MockRegistry::with_sessions(&["room-1"])).await?;

    let mut client = SignalClient::connect(&edge.ws_url()).await?;
    client.send(&join_request(1, "room-1", "alice")).await?;
    let reply = client.recv().await?.expect("join reply");
    assert_eq!(reply["result"]["type"], "answer");

    assert_eventually("federation answer applied", || {
        let done = edge
            .engine()
            .pull_peers_for("room-1")
            .first()
            .is_some_and(|peer| !peer.remote_descriptions().is_empty());
        async move { done }
    })
    .await;

    let pull_peer = edge.engine().pull_peers_for("room-1").remove(0);
    let origin_peers = origin.engine().peers_in("room-1");
    assert_eq!(origin_peers.len(), 1);
    let origin_peer = origin_peers.into_iter().next().unwrap();

    Ok(Cluster {
        origin,
        edge,
        client,
        pull_peer,
        origin_peer,
    })
}

#[tokio::test]
async fn test_edge_join_pulls_session_from_origin() -> Result<(), anyhow::Error> {
    let cluster = federated_cluster().await?;

    // The origin answered the pull peer's offer through an ordinary handler.
    assert_eq!(cluster.origin_peer.session_id().as_deref(), Some("room-1"));
    assert_eq!(
        cluster.origin_peer.answered_offers().first().unwrap().sdp,
        "v=0 mock-offer-1"
    );
    assert_eq!(
        cluster.pull_peer.remote_descriptions().first().unwrap().sdp,
        "v=0 mock-answer"
    );
    assert_eq!(cluster.edge.connector().pull_peers().len().await, 1);
    // The origin never federates onward.
    assert!(cluster.origin.connector().pull_peers().is_empty().await);
    assert!(cluster.origin.engine().pull_peers_for("room-1").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_candidates_cross_the_relay_flipped() -> Result<(), anyhow::Error> {
    let cluster = federated_cluster().await?;

    assert!(cluster
        .pull_peer
        .emit_ice_candidate(IceCandidateInit::new("candidate:edge"), Target::Publisher));
    assert_eventually("origin got edge candidate", || {
        let done = !cluster.origin_peer.trickles().is_empty();
        async move { done }
    })
    .await;
    let (candidate, target) = cluster.origin_peer.trickles().remove(0);
    assert_eq!(candidate.candidate, "candidate:edge");
    assert_eq!(target, Target::Subscriber);

    assert!(cluster
        .origin_peer
        .emit_ice_candidate(IceCandidateInit::new("candidate:origin"), Target::Publisher));
    assert_eventually("edge got origin candidate", || {
        let done = !cluster.pull_peer.trickles().is_empty();
        async move { done }
    })
    .await;
    let (candidate, target) = cluster.pull_peer.trickles().remove(0);
    assert_eq!(candidate.candidate, "candidate:origin");
    assert_eq!(target, Target::Subscriber);
    Ok(())
}

#[tokio::test]
async fn test_origin_renegotiation_reaches_pull_peer() -> Result<(), anyhow::Error> {
    let cluster = federated_cluster().await?;

    assert!(cluster
        .origin_peer
        .emit_offer(SessionDescription::offer("v=0 origin-renegotiate")));

    assert_eventually("origin applied pull answer", || {
        let done = !cluster.origin_peer.remote_descriptions().is_empty();
        async move { done }
    })
    .await;
    assert_eq!(
        cluster.pull_peer.answered_offers().last().unwrap().sdp,
        "v=0 origin-renegotiate"
    );
    assert_eq!(
        cluster.origin_peer.remote_descriptions().remove(0).sdp,
        "v=0 mock-answer"
    );
    Ok(())
}

#[tokio::test]
async fn test_edge_reconciliation_evicts_dropped_session() -> Result<(), anyhow::Error> {
    let mut cluster = federated_cluster().await?;
    let user = cluster.edge.engine().peers_in("room-1").remove(0);

    cluster.edge.registry().set_sessions(&[]);
    let outcome = run_reconciliation(
        cluster.edge.engine(),
        cluster.edge.registry(),
        cluster.edge.connector().pull_peers(),
    )
    .await;

    assert!(matches!(outcome, ReconcileOutcome::Completed { ref evicted } if evicted.len() == 1));
    assert!(cluster.pull_peer.is_closed());
    assert!(user.is_closed());
    assert!(cluster.edge.connector().pull_peers().is_empty().await);

    // The user's socket stays up; the engine has already dropped the peer.
    cluster
        .client
        .send(&offer_request(2, "v=0"))
        .await?;
    let reply = cluster.client.recv().await?.expect("offer reply");
    assert_eq!(reply["id"], 2);
    assert!(reply.get("error").is_some());
    Ok(())
}

#[tokio::test]
async fn test_session_federates_again_after_eviction() -> Result<(), anyhow::Error> {
    let cluster = federated_cluster().await?;

    cluster.edge.registry().set_sessions(&[]);
    run_reconciliation(
        cluster.edge.engine(),
        cluster.edge.registry(),
        cluster.edge.connector().pull_peers(),
    )
    .await;
    assert!(cluster.pull_peer.is_closed());

    cluster.edge.registry().set_sessions(&["room-1"]);
    let mut bob = SignalClient::connect(&cluster.edge.ws_url()).await?;
    bob.send(&join_request(1, "room-1", "bob")).await?;
    let reply = bob.recv().await?.expect("join reply");
    assert_eq!(reply["result"]["type"], "answer");

    let edge_engine = cluster.edge.engine().clone();
    assert_eventually("replacement pull peer answered", || {
        let done = edge_engine
            .pull_peers_for("room-1")
            .iter()
            .any(|peer| !peer.is_closed() && !peer.remote_descriptions().is_empty());
        async move { done }
    })
    .await;

    // Same relay link; the origin swapped its peer for the new join.
    assert_eq!(cluster.edge.connector().relay().generation(), 1);
    assert!(cluster.origin_peer.is_closed());
    let origin_peers = cluster.origin.engine().peers_in("room-1");
    assert_eq!(origin_peers.len(), 1);
    assert_eq!(
        origin_peers.first().unwrap().answered_offers().first().unwrap().sdp,
        "v=0 mock-offer-1"
    );
    Ok(())
}
