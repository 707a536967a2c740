//! Session reconciliation background task.
//!
//! Every interval the registry is re-read and any session active on this node
//! but absent from the registry is evicted:
//! 1. Its pull peer is removed from the table and closed
//! 2. The engine drops every peer of the session
//!
//! Sessions still listed are left untouched. A failed registry read evicts
//! nothing for that tick and marks the node not ready until a read succeeds.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered; an in-progress
//! pass completes first.

use crate::engine::MediaEngine;
use crate::federation::PullPeerTable;
use crate::observability::{metrics, HealthState};
use crate::registry::{read_registry, RegistryView, SessionRegistry};
use common::types::SessionId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Registry unavailable; nothing was evicted.
    Skipped,
    Completed { evicted: Vec<SessionId> },
}

/// Start the reconciliation loop.
///
/// The first pass runs immediately, then once per `interval`. Each pass
/// records whether the registry could be read in `health`. Returns when the
/// cancellation token is triggered.
#[instrument(skip_all, name = "sf.task.reconcile")]
pub async fn start_session_reconciler(
    engine: Arc<dyn MediaEngine>,
    registry: Arc<dyn SessionRegistry>,
    pull_peers: PullPeerTable,
    health: Arc<HealthState>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sf.task.reconcile",
        interval_seconds = interval.as_secs(),
        "Starting session reconciliation task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome =
                    run_reconciliation(engine.as_ref(), registry.as_ref(), &pull_peers).await;
                health.set_registry_reachable(outcome != ReconcileOutcome::Skipped);
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sf.task.reconcile",
                    "Session reconciliation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "sf.task.reconcile",
        "Session reconciliation task stopped"
    );
}

/// Run a single reconciliation pass.
///
/// Separated from the loop so tests and operators can trigger it directly.
pub async fn run_reconciliation(
    engine: &dyn MediaEngine,
    registry: &dyn SessionRegistry,
    pull_peers: &PullPeerTable,
) -> ReconcileOutcome {
    let snapshot = match read_registry(registry).await {
        RegistryView::Available(snapshot) => snapshot,
        RegistryView::Unavailable => {
            warn!(
                target: "sf.task.reconcile",
                "Registry unavailable, skipping eviction this tick"
            );
            return ReconcileOutcome::Skipped;
        }
    };

    let active: BTreeSet<SessionId> = engine
        .session_ids()
        .into_iter()
        .chain(pull_peers.session_ids().await)
        .collect();

    let mut evicted = Vec::new();
    for sid in active {
        if snapshot.contains(&sid) {
            continue;
        }

        if let Some(pull_peer) = pull_peers.remove(&sid).await {
            pull_peer.peer().close().await;
            debug!(
                target: "sf.task.reconcile",
                sid = %sid,
                age_seconds = pull_peer.age_seconds(),
                answered = pull_peer.is_answered(),
                "Closed pull peer"
            );
        }
        engine.remove_all_peers(&sid).await;
        metrics::record_session_evicted();

        info!(
            target: "sf.task.reconcile",
            sid = %sid,
            "Evicted session no longer in registry"
        );
        evicted.push(sid);
    }

    debug!(
        target: "sf.task.reconcile",
        registry_sessions = snapshot.len(),
        evicted = evicted.len(),
        "Reconciliation pass complete"
    );

    ReconcileOutcome::Completed { evicted }
}
