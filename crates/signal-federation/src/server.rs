//! Embeddable server entrypoint.
//!
//! Wires the listeners, the federation connector and the reconciliation task
//! around an engine and registry supplied by the caller:
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let registry = RedisSessionRegistry::connect(&config.redis_url, &config.registry_key).await?;
//! server::run(config, engine, Arc::new(registry), CancellationToken::new()).await?;
//! ```

use crate::config::Config;
use crate::engine::MediaEngine;
use crate::errors::SfError;
use crate::federation::ingress::serve_federation_socket;
use crate::federation::{FederationConfig, FederationConnector};
use crate::observability::{health_router, HealthState};
use crate::registry::SessionRegistry;
use crate::signal::{serve_signal_socket, JoinPolicy};
use crate::tasks::start_session_reconciler;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared state for the signaling router.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn MediaEngine>,
    pub registry: Arc<dyn SessionRegistry>,
    pub connector: FederationConnector,
    pub cancel_token: CancellationToken,
}

/// Router with `/ws` (end users) and `/pull` (downstream nodes).
pub fn signal_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(signal_upgrade))
        .route("/pull", get(pull_upgrade))
        .with_state(state)
}

async fn signal_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        let policy = JoinPolicy::Federating {
            registry: state.registry,
            connector: state.connector,
        };
        serve_signal_socket(socket, state.engine.new_peer(), policy, state.cancel_token)
    })
}

async fn pull_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_federation_socket(socket, state.engine, state.cancel_token))
}

/// Serve the signaling router on an already-bound listener until cancelled.
///
/// # Errors
///
/// Returns `SfError::Internal` if the server fails.
pub async fn serve_signaling(listener: TcpListener, state: AppState) -> Result<(), SfError> {
    let shutdown = state.cancel_token.clone();
    axum::serve(listener, signal_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SfError::Internal(format!("Signaling server failed: {e}")))
}

/// Run the node until `cancel_token` is cancelled.
///
/// # Errors
///
/// Returns `SfError::Config` if a listener cannot be bound, or
/// `SfError::Internal` if the signaling server fails.
pub async fn run(
    config: Config,
    engine: Arc<dyn MediaEngine>,
    registry: Arc<dyn SessionRegistry>,
    cancel_token: CancellationToken,
) -> Result<(), SfError> {
    info!(
        target: "sf.server",
        node_id = %config.node_id,
        signal_bind_address = %config.signal_bind_address,
        upstream = %config.upstream_address,
        "Starting signal federation node"
    );

    let signal_listener = bind(&config.signal_bind_address).await?;
    let health_listener = bind(&config.health_bind_address).await?;

    let health_state = Arc::new(HealthState::new());
    let connector = FederationConnector::new(
        Arc::clone(&engine),
        FederationConfig::from_config(&config),
        cancel_token.child_token(),
    );

    let reconciler = tokio::spawn(start_session_reconciler(
        Arc::clone(&engine),
        Arc::clone(&registry),
        connector.pull_peers().clone(),
        Arc::clone(&health_state),
        config.reconcile_interval(),
        cancel_token.clone(),
    ));

    let health_shutdown = cancel_token.clone();
    let health_app = health_router(Arc::clone(&health_state));
    let health_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await })
            .await
        {
            error!(
                target: "sf.server",
                error = %e,
                "Health server failed"
            );
        }
    });

    health_state.set_ready();
    info!(
        target: "sf.server",
        "Signal federation node ready"
    );

    let state = AppState {
        engine,
        registry,
        connector: connector.clone(),
        cancel_token: cancel_token.clone(),
    };
    let result = serve_signaling(signal_listener, state).await;

    health_state.set_not_ready();
    cancel_token.cancel();
    connector.shutdown().await;
    let _ = reconciler.await;
    let _ = health_server.await;

    info!(
        target: "sf.server",
        "Signal federation node stopped"
    );
    result
}

async fn bind(address: &str) -> Result<TcpListener, SfError> {
    TcpListener::bind(address).await.map_err(|e| {
        error!(
            target: "sf.server",
            address = %address,
            error = %e,
            "Failed to bind listener"
        );
        SfError::Config(format!("Failed to bind {address}: {e}"))
    })
}
