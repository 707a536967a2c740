//! Federation connector integration tests.
//!
//! Drives a `FederationConnector` against a `MockUpstream` over a real
//! loopback websocket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::SessionId;
use futures_util::future::join_all;
use sf_test_utils::fixtures::{
    answer_reply, federation_config, offer_notification, offer_request, tagged,
    trickle_notification,
};
use sf_test_utils::mock_engine::PeerBehavior;
use sf_test_utils::mock_upstream::UPSTREAM_ANSWER_SDP;
use sf_test_utils::{assert_eventually, MockEngine, MockPeer, MockUpstream};
use signal_federation::federation::{FederationConfig, FederationConnector, PullPeerTable};
use signal_federation::protocol::{IceCandidateInit, Target};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn connector(engine: &MockEngine, config: FederationConfig) -> FederationConnector {
    FederationConnector::new(Arc::new(engine.clone()), config, CancellationToken::new())
}

async fn wait_answered(table: &PullPeerTable, sid: &str) {
    let sid = SessionId::from(sid);
    assert_eventually("pull peer answered", || {
        let table = table.clone();
        let sid = sid.clone();
        async move { table.get(&sid).await.is_some_and(|p| p.is_answered()) }
    })
    .await;
}

fn only_pull_peer(engine: &MockEngine, sid: &str) -> Arc<MockPeer> {
    let peers = engine.pull_peers_for(sid);
    assert_eq!(peers.len(), 1, "expected exactly one pull peer for {sid}");
    peers.into_iter().next().unwrap()
}

/// Federate `room-1` and wait for the upstream answer.
async fn federated(upstream: &MockUpstream) -> (MockEngine, FederationConnector, Arc<MockPeer>) {
    let engine = MockEngine::new();
    let connector = connector(&engine, federation_config(&upstream.url()));
    assert!(connector.ensure_federated(&SessionId::from("room-1")).await);
    wait_answered(connector.pull_peers(), "room-1").await;
    let pull_peer = only_pull_peer(&engine, "room-1");
    (engine, connector, pull_peer)
}

#[tokio::test]
async fn test_first_join_sends_sid_tagged_join_and_applies_answer() {
    let upstream = MockUpstream::start().await;
    let (_engine, connector, pull_peer) = federated(&upstream).await;

    let joins = upstream.frames_with_method("join");
    assert_eq!(joins.len(), 1);
    let join = joins.first().unwrap();
    assert_eq!(join["sid"], "room-1");
    assert_eq!(join["params"]["sid"], "room-1");
    assert_eq!(join["params"]["offer"]["type"], "offer");
    assert_eq!(join["params"]["offer"]["sdp"], "v=0 mock-offer-1");
    assert!(join["id"].is_u64());

    // The pull peer joined the local session under the reserved uid.
    assert_eq!(pull_peer.session_id().as_deref(), Some("room-1"));
    assert_eq!(pull_peer.user_id().as_deref(), Some("pull"));

    let applied = pull_peer.remote_descriptions();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied.first().unwrap().sdp, UPSTREAM_ANSWER_SDP);
    assert_eq!(connector.relay().generation(), 1);
}

#[tokio::test]
async fn test_second_ensure_is_noop() {
    let upstream = MockUpstream::start().await;
    let (engine, connector, _pull_peer) = federated(&upstream).await;

    assert!(!connector.ensure_federated(&SessionId::from("room-1")).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(connector.pull_peers().len().await, 1);
    assert_eq!(engine.pull_peers_for("room-1").len(), 1);
    assert_eq!(upstream.frames_with_method("join").len(), 1);
}

#[tokio::test]
async fn test_concurrent_ensure_creates_one_pull_peer() {
    let upstream = MockUpstream::start().await;
    let engine = MockEngine::new();
    let connector = connector(&engine, federation_config(&upstream.url()));
    let sid = SessionId::from("room-1");

    let created = join_all((0..10).map(|_| {
        let connector = connector.clone();
        let sid = sid.clone();
        tokio::spawn(async move { connector.ensure_federated(&sid).await })
    }))
    .await;

    let created = created.into_iter().filter(|r| *r.as_ref().unwrap()).count();
    assert_eq!(created, 1);

    wait_answered(connector.pull_peers(), "room-1").await;
    assert_eq!(engine.pull_peers_for("room-1").len(), 1);
    assert_eq!(upstream.connection_count(), 1);
    assert_eq!(upstream.frames_with_method("join").len(), 1);
}

#[tokio::test]
async fn test_sessions_share_one_relay_link() {
    let upstream = MockUpstream::start().await;
    let engine = MockEngine::new();
    let connector = connector(&engine, federation_config(&upstream.url()));

    for sid in ["room-1", "room-2", "room-3"] {
        connector.ensure_federated(&SessionId::from(sid)).await;
    }
    for sid in ["room-1", "room-2", "room-3"] {
        wait_answered(connector.pull_peers(), sid).await;
    }

    assert_eq!(upstream.connection_count(), 1);
    let mut sids: Vec<String> = upstream
        .frames_with_method("join")
        .iter()
        .map(|frame| frame["sid"].as_str().unwrap().to_string())
        .collect();
    sids.sort();
    assert_eq!(sids, vec!["room-1", "room-2", "room-3"]);
}

#[tokio::test]
async fn test_outbound_candidate_target_is_flipped() {
    let upstream = MockUpstream::start().await;
    let (_engine, _connector, pull_peer) = federated(&upstream).await;

    assert!(pull_peer.emit_ice_candidate(IceCandidateInit::new("candidate:pub"), Target::Publisher));
    assert!(pull_peer.emit_ice_candidate(IceCandidateInit::new("candidate:sub"), Target::Subscriber));

    assert_eventually("two trickles upstream", || {
        let done = upstream.frames_with_method("trickle").len() == 2;
        async move { done }
    })
    .await;

    let trickles = upstream.frames_with_method("trickle");
    let mut sent: Vec<(String, u64)> = trickles
        .iter()
        .map(|frame| {
            assert_eq!(frame["sid"], "room-1");
            (
                frame["params"]["candidate"]["candidate"].as_str().unwrap().to_string(),
                frame["params"]["target"].as_u64().unwrap(),
            )
        })
        .collect();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            ("candidate:pub".to_string(), 1),
            ("candidate:sub".to_string(), 0)
        ]
    );
}

#[tokio::test]
async fn test_candidates_gathered_before_join_follow_it() {
    let upstream = MockUpstream::start().await;
    let engine = MockEngine::new();
    engine.set_behavior(PeerBehavior {
        gather_on_offer: true,
        ..PeerBehavior::default()
    });
    let connector = connector(&engine, federation_config(&upstream.url()));

    connector.ensure_federated(&SessionId::from("room-1")).await;
    assert_eventually("held candidate flushed", || {
        let done = upstream.frames_with_method("trickle").len() == 1;
        async move { done }
    })
    .await;

    let methods: Vec<String> = upstream
        .frames_on(0)
        .iter()
        .map(|frame| frame["method"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(methods, vec!["join", "trickle"]);

    let trickle = upstream.frames_with_method("trickle");
    let trickle = trickle.first().unwrap();
    assert_eq!(trickle["params"]["candidate"]["candidate"], "candidate:gathered-1");
    assert_eq!(trickle["params"]["target"], 1);
}

#[tokio::test]
async fn test_inbound_candidate_target_is_flipped() {
    let upstream = MockUpstream::start().await;
    let (_engine, _connector, pull_peer) = federated(&upstream).await;

    upstream.push(&tagged(trickle_notification(0, "candidate:up-pub"), "room-1"));
    upstream.push(&tagged(trickle_notification(1, "candidate:up-sub"), "room-1"));

    assert_eventually("candidates applied", || {
        let done = pull_peer.trickles().len() == 2;
        async move { done }
    })
    .await;

    let applied: Vec<(String, Target)> = pull_peer
        .trickles()
        .into_iter()
        .map(|(candidate, target)| (candidate.candidate, target))
        .collect();
    assert_eq!(
        applied,
        vec![
            ("candidate:up-pub".to_string(), Target::Subscriber),
            ("candidate:up-sub".to_string(), Target::Publisher),
        ]
    );
}

#[tokio::test]
async fn test_upstream_offer_is_answered() {
    let upstream = MockUpstream::start().await;
    let (_engine, _connector, pull_peer) = federated(&upstream).await;

    // Request form: answered with a reply carrying the same id.
    upstream.push(&tagged(offer_request(42, "v=0 upstream-renegotiate"), "room-1"));
    assert_eventually("renegotiation reply", || {
        let done = upstream.frames().iter().any(|frame| frame["id"] == 42);
        async move { done }
    })
    .await;
    let reply = upstream
        .frames()
        .into_iter()
        .find(|frame| frame["id"] == 42)
        .unwrap();
    assert_eq!(reply["sid"], "room-1");
    assert_eq!(reply["result"]["type"], "answer");
    assert!(reply.get("method").is_none());

    // Notification form: answered with an answer notification.
    upstream.push(&tagged(offer_notification("v=0 upstream-again"), "room-1"));
    assert_eventually("answer notification", || {
        let done = upstream.frames_with_method("answer").len() == 1;
        async move { done }
    })
    .await;
    let answer = upstream.frames_with_method("answer");
    let answer = answer.first().unwrap();
    assert_eq!(answer["sid"], "room-1");
    assert_eq!(answer["params"]["desc"]["type"], "answer");

    let offers: Vec<String> = pull_peer
        .answered_offers()
        .into_iter()
        .map(|desc| desc.sdp)
        .collect();
    assert_eq!(offers, vec!["v=0 upstream-renegotiate", "v=0 upstream-again"]);
}

#[tokio::test]
async fn test_frame_for_unknown_session_is_dropped() {
    let upstream = MockUpstream::start().await;
    let (engine, connector, pull_peer) = federated(&upstream).await;

    upstream.push(&tagged(trickle_notification(0, "candidate:stray"), "room-9"));
    upstream.push(&tagged(offer_request(7, "v=0 stray"), "room-9"));
    upstream.push(&trickle_notification(0, "candidate:untagged"));
    upstream.push(&tagged(trickle_notification(0, "candidate:ok"), "room-1"));

    // Frames are dispatched in order, so once the last one lands the stray
    // ones have been handled.
    assert_eventually("tagged candidate applied", || {
        let done = pull_peer.trickles().len() == 1;
        async move { done }
    })
    .await;

    assert_eq!(
        pull_peer.trickles().first().unwrap().0.candidate,
        "candidate:ok"
    );
    assert!(engine.pull_peers_for("room-9").is_empty());
    assert!(!connector.pull_peers().contains(&SessionId::from("room-9")).await);
    assert!(!upstream.frames().iter().any(|frame| frame["id"] == 7));
}

#[tokio::test]
async fn test_relay_reconnect_redrives_joins() {
    let upstream = MockUpstream::start().await;
    let (_engine, connector, pull_peer) = federated(&upstream).await;

    upstream.disconnect_all();

    assert_eventually("join re-sent on second link", || {
        let done = upstream
            .frames_on(1)
            .iter()
            .any(|frame| frame["method"] == "join" && frame["sid"] == "room-1");
        async move { done }
    })
    .await;
    assert_eventually("second answer applied", || {
        let done = pull_peer.remote_descriptions().len() == 2;
        async move { done }
    })
    .await;

    assert_eq!(upstream.connection_count(), 2);
    assert_eq!(connector.relay().generation(), 2);
    assert_eq!(pull_peer.offers_created(), 2);
    assert_eq!(connector.pull_peers().len().await, 1);
}

#[tokio::test]
async fn test_relay_reconnect_retries_until_upstream_accepts() {
    let upstream = MockUpstream::start().await;
    let (_engine, connector, _pull_peer) = federated(&upstream).await;

    upstream.set_refuse(true);
    upstream.disconnect_all();

    assert_eventually("reconnect retried", || {
        let done = upstream.refused_count() >= 2;
        async move { done }
    })
    .await;
    assert!(connector.relay().current().await.is_none());

    upstream.set_refuse(false);
    assert_eventually("join re-sent after recovery", || {
        let done = upstream
            .frames_on(1)
            .iter()
            .any(|frame| frame["method"] == "join");
        async move { done }
    })
    .await;
    wait_answered(connector.pull_peers(), "room-1").await;
}

#[tokio::test]
async fn test_unanswered_join_times_out_and_evicts() {
    let upstream = MockUpstream::start().await;
    upstream.set_answer_joins(false);
    let engine = MockEngine::new();
    let config = FederationConfig {
        join_timeout: Some(Duration::from_millis(200)),
        ..federation_config(&upstream.url())
    };
    let connector = connector(&engine, config);
    let sid = SessionId::from("room-1");

    assert!(connector.ensure_federated(&sid).await);
    let table = connector.pull_peers().clone();
    assert_eventually("pull peer evicted", || {
        let table = table.clone();
        async move { table.is_empty().await }
    })
    .await;

    let evicted = only_pull_peer(&engine, "room-1");
    assert!(evicted.is_closed());

    // A later join starts over with a fresh pull peer.
    assert!(connector.ensure_federated(&sid).await);
    assert_eventually("second join sent", || {
        let done = upstream.frames_with_method("join").len() == 2;
        async move { done }
    })
    .await;
}

#[tokio::test]
async fn test_late_reply_to_replaced_join_is_dropped() {
    let upstream = MockUpstream::start().await;
    upstream.set_answer_joins(false);
    let engine = MockEngine::new();
    let connector = connector(&engine, federation_config(&upstream.url()));
    let sid = SessionId::from("room-1");

    assert!(connector.ensure_federated(&sid).await);
    assert_eventually("first join sent", || {
        let done = upstream.frames_with_method("join").len() == 1;
        async move { done }
    })
    .await;
    let first = connector.pull_peers().remove(&sid).await.unwrap();
    first.peer().close().await;

    assert!(connector.ensure_federated(&sid).await);
    assert_eventually("second join sent", || {
        let done = upstream.frames_with_method("join").len() == 2;
        async move { done }
    })
    .await;

    let ids: Vec<u64> = upstream
        .frames_with_method("join")
        .iter()
        .map(|frame| frame["id"].as_u64().unwrap())
        .collect();
    let stale_id = *ids.first().unwrap();
    let current_id = *ids.last().unwrap();
    assert_ne!(stale_id, current_id);

    upstream.push(&tagged(answer_reply(stale_id, "v=0 stale-answer"), "room-1"));
    upstream.push(&tagged(answer_reply(current_id, "v=0 current-answer"), "room-1"));
    wait_answered(connector.pull_peers(), "room-1").await;

    let replacement = engine
        .pull_peers_for("room-1")
        .into_iter()
        .find(|peer| !peer.is_closed())
        .unwrap();
    let applied: Vec<String> = replacement
        .remote_descriptions()
        .into_iter()
        .map(|desc| desc.sdp)
        .collect();
    assert_eq!(applied, vec!["v=0 current-answer"]);
}

#[tokio::test]
async fn test_parked_join_sent_when_another_session_opens_relay() {
    let upstream = MockUpstream::start().await;
    upstream.set_refuse(true);
    let engine = MockEngine::new();
    let config = FederationConfig {
        join_timeout: None,
        ..federation_config(&upstream.url())
    };
    let connector = connector(&engine, config);

    assert!(connector.ensure_federated(&SessionId::from("room-1")).await);
    let table = connector.pull_peers().clone();
    assert_eventually("join parked", || {
        let table = table.clone();
        async move {
            table
                .get(&SessionId::from("room-1"))
                .await
                .is_some_and(|p| p.is_awaiting_relay())
        }
    })
    .await;

    upstream.set_refuse(false);
    assert!(connector.ensure_federated(&SessionId::from("room-2")).await);

    wait_answered(connector.pull_peers(), "room-2").await;
    wait_answered(connector.pull_peers(), "room-1").await;
    assert_eq!(upstream.connection_count(), 1);
    let mut sids: Vec<String> = upstream
        .frames_with_method("join")
        .iter()
        .map(|frame| frame["sid"].as_str().unwrap().to_string())
        .collect();
    sids.sort();
    assert_eq!(sids, vec!["room-1", "room-2"]);
}

#[tokio::test]
async fn test_parked_join_retried_when_session_referenced_again() {
    let upstream = MockUpstream::start().await;
    upstream.set_refuse(true);
    let engine = MockEngine::new();
    let config = FederationConfig {
        join_timeout: None,
        ..federation_config(&upstream.url())
    };
    let connector = connector(&engine, config);
    let sid = SessionId::from("room-1");

    assert!(connector.ensure_federated(&sid).await);
    let table = connector.pull_peers().clone();
    assert_eventually("join parked", || {
        let table = table.clone();
        let sid = sid.clone();
        async move { table.get(&sid).await.is_some_and(|p| p.is_awaiting_relay()) }
    })
    .await;

    upstream.set_refuse(false);
    assert!(!connector.ensure_federated(&sid).await);

    wait_answered(connector.pull_peers(), "room-1").await;
    assert_eq!(upstream.frames_with_method("join").len(), 1);
    assert_eq!(engine.pull_peers_for("room-1").len(), 1);
}

#[tokio::test]
async fn test_answered_join_is_not_evicted() {
    let upstream = MockUpstream::start().await;
    let engine = MockEngine::new();
    let config = FederationConfig {
        join_timeout: Some(Duration::from_millis(100)),
        ..federation_config(&upstream.url())
    };
    let connector = connector(&engine, config);

    connector.ensure_federated(&SessionId::from("room-1")).await;
    wait_answered(connector.pull_peers(), "room-1").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(connector.pull_peers().contains(&SessionId::from("room-1")).await);
    assert!(!only_pull_peer(&engine, "room-1").is_closed());
}

#[tokio::test]
async fn test_join_with_unreachable_upstream_times_out() {
    let upstream = MockUpstream::start().await;
    upstream.set_refuse(true);
    let engine = MockEngine::new();
    let config = FederationConfig {
        join_timeout: Some(Duration::from_millis(200)),
        ..federation_config(&upstream.url())
    };
    let connector = connector(&engine, config);

    connector.ensure_federated(&SessionId::from("room-1")).await;
    let table = connector.pull_peers().clone();
    assert_eventually("pull peer evicted", || {
        let table = table.clone();
        async move { table.is_empty().await }
    })
    .await;

    assert!(upstream.refused_count() >= 1);
    assert!(upstream.frames().is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_relay_without_reconnecting() {
    let upstream = MockUpstream::start().await;
    let (_engine, connector, _pull_peer) = federated(&upstream).await;

    connector.shutdown().await;
    assert!(connector.relay().current().await.is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.connection_count(), 1);
}
