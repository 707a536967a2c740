//! Metrics definitions for signal federation.
//!
//! Recorded through the `metrics` facade. Installing an exporter is left to
//! the embedding process; without one these calls are no-ops.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sf_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Session ids are never used as labels. The only label is `outcome` on
//! relay reconnects (2 values).

use metrics::{counter, gauge};

/// Record a new pull peer created for a remote session.
///
/// Metric: `sf_federations_started_total`
/// Labels: none
pub fn record_federation_started() {
    counter!("sf_federations_started_total").increment(1);
}

/// Record a pull peer evicted because its remote answer never arrived.
///
/// Metric: `sf_federation_join_timeouts_total`
/// Labels: none
pub fn record_federation_join_timeout() {
    counter!("sf_federation_join_timeouts_total").increment(1);
}

/// Record a relay reconnect attempt.
///
/// Metric: `sf_relay_reconnects_total`
/// Labels: `outcome` (success, error)
pub fn record_relay_reconnect(outcome: &'static str) {
    counter!("sf_relay_reconnects_total", "outcome" => outcome).increment(1);
}

/// Record a session evicted by reconciliation.
///
/// Metric: `sf_sessions_evicted_total`
/// Labels: none
pub fn record_session_evicted() {
    counter!("sf_sessions_evicted_total").increment(1);
}

/// Set the number of pull peers currently registered.
///
/// Metric: `sf_pull_peers_active`
/// Labels: none
pub fn set_pull_peers_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("sf_pull_peers_active").set(count as f64);
}
