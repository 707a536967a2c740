//! Mock session registry.

use async_trait::async_trait;
use common::types::SessionId;
use signal_federation::errors::SfError;
use signal_federation::registry::{RegistrySnapshot, SessionRegistry};
use std::sync::{Arc, Mutex};

/// Registry whose contents tests set directly.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MockRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: Vec<SessionId>,
    failing: bool,
    loads: usize,
}

impl MockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sessions(sessions: &[&str]) -> Self {
        let registry = Self::new();
        registry.set_sessions(sessions);
        registry
    }

    /// Replace the listed sessions.
    pub fn set_sessions(&self, sessions: &[&str]) {
        self.inner.lock().unwrap().sessions = sessions.iter().copied().map(SessionId::from).collect();
    }

    /// Make every read fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    /// Number of reads so far, failed ones included.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.inner.lock().unwrap().loads
    }
}

#[async_trait]
impl SessionRegistry for MockRegistry {
    async fn load(&self) -> Result<RegistrySnapshot, SfError> {
        let mut inner = self.inner.lock().unwrap();
        inner.loads += 1;
        if inner.failing {
            return Err(SfError::Registry("mock registry unavailable".to_string()));
        }
        Ok(inner.sessions.iter().cloned().collect())
    }
}
