//! Test server harness.
//!
//! Provides `TestSfNode` for running a real signaling server in tests.

use crate::fixtures::federation_config;
use crate::mock_engine::MockEngine;
use crate::mock_registry::MockRegistry;
use signal_federation::federation::FederationConnector;
use signal_federation::server::{serve_signaling, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One node: `/ws` and `/pull` served over a [`MockEngine`], with its
/// federation connector pointed at `upstream_url`.
///
/// # Example
/// ```rust,ignore
/// let upstream = MockUpstream::start().await;
/// let node = TestSfNode::spawn(&upstream.url(), MockRegistry::with_sessions(&["room-1"])).await?;
/// let mut client = SignalClient::connect(&node.ws_url()).await?;
/// ```
pub struct TestSfNode {
    addr: SocketAddr,
    engine: MockEngine,
    registry: MockRegistry,
    connector: FederationConnector,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestSfNode {
    /// Spawn a node on a random loopback port.
    pub async fn spawn(upstream_url: &str, registry: MockRegistry) -> Result<Self, anyhow::Error> {
        let engine = MockEngine::new();
        let cancel_token = CancellationToken::new();
        let connector = FederationConnector::new(
            Arc::new(engine.clone()),
            federation_config(upstream_url),
            cancel_token.child_token(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let state = AppState {
            engine: Arc::new(engine.clone()),
            registry: Arc::new(registry.clone()),
            connector: connector.clone(),
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(async move {
            if let Err(e) = serve_signaling(listener, state).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            engine,
            registry,
            connector,
            cancel_token,
            handle,
        })
    }

    /// End-user signaling endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Federation endpoint, for use as another node's upstream.
    pub fn pull_url(&self) -> String {
        format!("ws://{}/pull", self.addr)
    }

    pub fn engine(&self) -> &MockEngine {
        &self.engine
    }

    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    pub fn connector(&self) -> &FederationConnector {
        &self.connector
    }
}

impl Drop for TestSfNode {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}
