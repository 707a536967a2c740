//! Test utilities for signal federation.
//!
//! This crate provides:
//! - [`MockEngine`] / [`MockPeer`]: in-memory media engine that records every call
//! - [`MockRegistry`]: session registry with settable contents and failure mode
//! - [`MockUpstream`]: websocket origin node for relay-link tests
//! - [`SignalClient`]: websocket client speaking the signaling protocol
//! - [`TestSfNode`]: a real signaling server around the mocks, on a loopback port
//! - Frame and config builders in [`fixtures`]
//! - [`assert_eventually`] for conditions reached by background tasks

pub mod eventual;
pub mod fixtures;
pub mod mock_engine;
pub mod mock_registry;
pub mod mock_upstream;
pub mod server_harness;
pub mod signal_client;

pub use eventual::{assert_eventually, wait_for};
pub use mock_engine::{MockEngine, MockPeer};
pub use mock_registry::MockRegistry;
pub use mock_upstream::MockUpstream;
pub use server_harness::TestSfNode;
pub use signal_client::SignalClient;
