//! Observability for signal federation.
//!
//! # Privacy by Default
//!
//! Instrumented entry points use `#[instrument(skip_all)]` and record only
//! session ids and request ids. SDP bodies and ICE candidates carry network
//! addresses and are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sf_federations_started_total` | Counter | none | Pull peers created |
//! | `sf_federation_join_timeouts_total` | Counter | none | Pull peers evicted waiting for an answer |
//! | `sf_relay_reconnects_total` | Counter | `outcome` | Relay reconnect attempts |
//! | `sf_sessions_evicted_total` | Counter | none | Sessions removed by reconciliation |
//! | `sf_pull_peers_active` | Gauge | none | Current pull peers |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "signal_federation=info,sf=info";

/// Install the global tracing subscriber.
///
/// Uses `RUST_LOG` when set, otherwise [`DEFAULT_LOG_FILTER`]. With `json`
/// the output is one JSON object per line.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    }
}
