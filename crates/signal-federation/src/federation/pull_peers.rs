//! Pull-peer table.
//!
//! Maps a session id to the single pull peer federating it. Written by the
//! connector (insert, join timeout) and by reconciliation (evict); read by
//! the relay dispatcher. All access goes through one async mutex.

use crate::engine::MediaPeer;
use crate::observability::metrics;
use crate::protocol::{RequestId, Trickle};
use chrono::{DateTime, Utc};
use common::types::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;

/// A local peer that pulls one remote session's media over the relay.
pub struct PullPeer {
    session_id: SessionId,
    peer: Arc<dyn MediaPeer>,
    /// Set once the remote answer has been applied for the current join.
    answered: AtomicBool,
    /// Relay generation the latest join was sent on. Zero until first join.
    join_generation: AtomicU64,
    /// Candidates gathered before the join went out. `None` once flushed.
    held_candidates: StdMutex<Option<Vec<Trickle>>>,
    /// Id of the latest join request; only its response is applied.
    join_request: StdMutex<Option<RequestId>>,
    /// Set when the last join attempt found no relay link.
    awaiting_relay: AtomicBool,
    created_at: DateTime<Utc>,
}

impl PullPeer {
    #[must_use]
    pub fn new(session_id: SessionId, peer: Arc<dyn MediaPeer>) -> Self {
        Self {
            session_id,
            peer,
            answered: AtomicBool::new(false),
            join_generation: AtomicU64::new(0),
            held_candidates: StdMutex::new(Some(Vec::new())),
            join_request: StdMutex::new(None),
            awaiting_relay: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<dyn MediaPeer> {
        &self.peer
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_answered(&self) {
        self.answered.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn join_generation(&self) -> u64 {
        self.join_generation.load(Ordering::SeqCst)
    }

    /// Claim the join for relay `generation`.
    ///
    /// Returns false if a join was already sent on this or a newer link.
    /// A successful claim resets the answered flag and starts holding
    /// candidates until [`PullPeer::release_candidates`].
    pub(crate) fn claim_join(&self, generation: u64) -> bool {
        if self.join_generation.fetch_max(generation, Ordering::SeqCst) >= generation {
            return false;
        }
        self.answered.store(false, Ordering::SeqCst);
        self.awaiting_relay.store(false, Ordering::SeqCst);
        let mut held = self.held();
        if held.is_none() {
            *held = Some(Vec::new());
        }
        true
    }

    /// Hold a candidate if the join has not been sent yet.
    ///
    /// Returns the candidate back when it can be sent immediately.
    pub(crate) fn hold_candidate(&self, trickle: Trickle) -> Option<Trickle> {
        match self.held().as_mut() {
            Some(held) => {
                held.push(trickle);
                None
            }
            None => Some(trickle),
        }
    }

    /// Stop holding candidates and return the ones gathered so far.
    pub(crate) fn release_candidates(&self) -> Vec<Trickle> {
        self.held().take().unwrap_or_default()
    }

    /// Record the id of the join request about to be sent.
    pub(crate) fn set_join_request(&self, id: RequestId) {
        *recover(&self.join_request) = Some(id);
    }

    /// True if a response with `id` answers the latest join.
    ///
    /// Replies to joins of an earlier attempt, or of a pull peer that used
    /// to hold this sid, fail this check.
    #[must_use]
    pub fn is_join_response(&self, id: Option<&RequestId>) -> bool {
        id.is_some() && recover(&self.join_request).as_ref() == id
    }

    pub(crate) fn mark_awaiting_relay(&self) {
        self.awaiting_relay.store(true, Ordering::SeqCst);
    }

    /// Clear the awaiting-relay flag, returning whether it was set.
    pub(crate) fn take_awaiting_relay(&self) -> bool {
        self.awaiting_relay.swap(false, Ordering::SeqCst)
    }

    /// True while the join is parked for lack of a relay link.
    #[must_use]
    pub fn is_awaiting_relay(&self) -> bool {
        self.awaiting_relay.load(Ordering::SeqCst)
    }

    /// Whole seconds since the pull peer was created.
    #[must_use]
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    fn held(&self) -> MutexGuard<'_, Option<Vec<Trickle>>> {
        recover(&self.held_candidates)
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn recover<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    // Holders never panic while locked.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl std::fmt::Debug for PullPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullPeer")
            .field("session_id", &self.session_id)
            .field("answered", &self.is_answered())
            .field("join_generation", &self.join_generation())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Shared session id to pull peer map. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct PullPeerTable {
    inner: Arc<Mutex<HashMap<SessionId, Arc<PullPeer>>>>,
}

impl PullPeerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, sid: &SessionId) -> Option<Arc<PullPeer>> {
        self.inner.lock().await.get(sid).cloned()
    }

    pub async fn contains(&self, sid: &SessionId) -> bool {
        self.inner.lock().await.contains_key(sid)
    }

    /// Return the existing entry for `sid`, or insert the one built by `make`.
    ///
    /// The check and the insert happen under one lock acquisition, so
    /// concurrent callers for the same sid get the same peer and exactly one
    /// of them sees `true`.
    pub async fn get_or_insert_with<F>(&self, sid: &SessionId, make: F) -> (Arc<PullPeer>, bool)
    where
        F: FnOnce() -> PullPeer,
    {
        let mut table = self.inner.lock().await;
        if let Some(existing) = table.get(sid) {
            return (Arc::clone(existing), false);
        }
        let pull_peer = Arc::new(make());
        table.insert(sid.clone(), Arc::clone(&pull_peer));
        metrics::set_pull_peers_active(table.len());
        (pull_peer, true)
    }

    pub async fn remove(&self, sid: &SessionId) -> Option<Arc<PullPeer>> {
        let mut table = self.inner.lock().await;
        let removed = table.remove(sid);
        metrics::set_pull_peers_active(table.len());
        removed
    }

    /// Remove `sid` only if it still maps to `expected`.
    pub async fn remove_if_same(&self, sid: &SessionId, expected: &Arc<PullPeer>) -> bool {
        let mut table = self.inner.lock().await;
        let same = table
            .get(sid)
            .is_some_and(|current| Arc::ptr_eq(current, expected));
        if same {
            table.remove(sid);
            metrics::set_pull_peers_active(table.len());
        }
        same
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// All current entries, cloned out of the lock.
    pub async fn snapshot(&self) -> Vec<Arc<PullPeer>> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
