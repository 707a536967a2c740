//! Session registry access.
//!
//! The registry is an external, eventually-consistent list of the session ids
//! the cluster currently considers valid. It is read on every check and never
//! written here.
//!
//! # Read failures
//!
//! A failed read is not treated as an empty registry. Callers receive
//! [`RegistryView::Unavailable`] and decide explicitly:
//! - join rejects (the session cannot be confirmed)
//! - reconciliation evicts nothing for that tick

pub mod redis;

use crate::errors::SfError;
use async_trait::async_trait;
use common::types::SessionId;
use std::collections::HashSet;
use tracing::warn;

pub use self::redis::RedisSessionRegistry;

/// Read-only source of valid session ids.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Read the current set of valid session ids.
    async fn load(&self) -> Result<RegistrySnapshot, SfError>;
}

/// One read of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    ids: HashSet<SessionId>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn contains(&self, sid: &SessionId) -> bool {
        self.ids.contains(sid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<SessionId> for RegistrySnapshot {
    fn from_iter<I: IntoIterator<Item = SessionId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a registry read, with failure kept distinct from "empty".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryView {
    Available(RegistrySnapshot),
    Unavailable,
}

impl RegistryView {
    /// True only when the registry was read and lists `sid`.
    #[must_use]
    pub fn recognizes(&self, sid: &SessionId) -> bool {
        match self {
            RegistryView::Available(snapshot) => snapshot.contains(sid),
            RegistryView::Unavailable => false,
        }
    }
}

/// Read the registry, converting a failure into [`RegistryView::Unavailable`].
pub async fn read_registry(registry: &dyn SessionRegistry) -> RegistryView {
    match registry.load().await {
        Ok(snapshot) => RegistryView::Available(snapshot),
        Err(e) => {
            warn!(
                target: "sf.registry",
                error = %e,
                "Session registry unavailable"
            );
            RegistryView::Unavailable
        }
    }
}
