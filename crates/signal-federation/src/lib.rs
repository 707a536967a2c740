//! Signal federation library.
//!
//! Signaling and inter-node session federation for a multi-node SFU cluster.
//! Each node terminates end-user signaling, and a session hosted on another
//! node is pulled in over one shared relay websocket.
//!
//! # Components
//!
//! - [`signal`]: per-connection join/offer/answer/trickle state machine
//! - [`federation`]: pull peers, the relay link, and the origin-side ingress
//! - [`registry`]: read-only access to the authoritative session list
//! - [`tasks`]: periodic reconciliation against the registry
//!
//! The media engine itself is external and consumed through the traits in
//! [`engine`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod errors;
pub mod federation;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod signal;
pub mod tasks;

pub use config::{Config, ConfigError};
pub use errors::{ProtocolError, SfError};
