//! Health endpoints for a signal federation node.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can the node admit joins?)
//!
//! # Readiness
//!
//! Every join is checked against the session registry, and a join is
//! rejected while the registry cannot be read. A node is therefore only
//! ready when both hold:
//! - the signaling listener is serving
//! - the most recent registry read succeeded
//!
//! The reconciliation task records the outcome of each registry read here.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared with the health router.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True while the signaling listener is serving.
    serving: AtomicBool,
    /// Outcome of the latest registry read. False until the first read.
    registry_reachable: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, not serving, registry unknown).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            serving: AtomicBool::new(false),
            registry_reachable: AtomicBool::new(false),
        }
    }

    /// Mark the signaling listener as serving.
    pub fn set_ready(&self) {
        self.serving.store(true, Ordering::SeqCst);
    }

    /// Mark the signaling listener as stopped (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.serving.store(false, Ordering::SeqCst);
    }

    pub fn set_registry_reachable(&self, reachable: bool) {
        self.registry_reachable.store(reachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_registry_reachable(&self) -> bool {
        self.registry_reachable.load(Ordering::SeqCst)
    }

    /// Serving, and the registry answered the last read.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.serving.load(Ordering::SeqCst) && self.is_registry_reachable()
    }
}

/// Create the health router with liveness and readiness endpoints.
///
/// `/ready` returns 503 until [`HealthState::is_ready`] holds.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
