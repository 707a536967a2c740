//! Inter-node session federation.
//!
//! - [`connector`]: pull side. Creates pull peers and drives their joins.
//! - [`relay`]: the single shared websocket to the upstream node.
//! - [`pull_peers`]: session id to pull peer table.
//! - [`ingress`]: origin side. Serves `/pull` sockets from downstream nodes.

pub mod connector;
pub mod ingress;
pub mod pull_peers;
pub mod relay;

pub use connector::{FederationConfig, FederationConnector};
pub use pull_peers::{PullPeer, PullPeerTable};
pub use relay::{RelayConnection, RelayHandle};
