//! Redis-backed session registry.
//!
//! The registry key holds a JSON array of session ids, e.g.
//! `["room-1","room-2"]`. A missing key is an empty registry.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently, so
//! each read clones it instead of locking.

use super::{RegistrySnapshot, SessionRegistry};
use crate::errors::SfError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::SessionId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, instrument};

/// Session registry read from a single Redis key.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    connection: MultiplexedConnection,
    key: String,
}

impl RedisSessionRegistry {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `SfError::Registry` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &SecretString, key: impl Into<String>) -> Result<Self, SfError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // The URL may carry a password; log the error only.
            error!(
                target: "sf.registry.redis",
                error = %e,
                "Failed to open Redis client"
            );
            SfError::Registry(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "sf.registry.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                SfError::Registry(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            key: key.into(),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    #[instrument(skip_all, fields(key = %self.key))]
    async fn load(&self) -> Result<RegistrySnapshot, SfError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn.get(&self.key).await.map_err(|e| {
            error!(
                target: "sf.registry.redis",
                error = %e,
                "Failed to read session registry"
            );
            SfError::Registry(format!("Failed to read session registry: {e}"))
        })?;

        let snapshot = match raw {
            Some(raw) => parse_session_list(&raw)?,
            None => RegistrySnapshot::default(),
        };

        debug!(
            target: "sf.registry.redis",
            sessions = snapshot.len(),
            "Read session registry"
        );

        Ok(snapshot)
    }
}

/// Parse the stored JSON array of session ids.
pub(crate) fn parse_session_list(raw: &str) -> Result<RegistrySnapshot, SfError> {
    let ids: Vec<SessionId> = serde_json::from_str(raw).map_err(|e| {
        error!(
            target: "sf.registry.redis",
            error = %e,
            "Session registry value is not a JSON array of strings"
        );
        SfError::Registry(format!("Malformed session registry value: {e}"))
    })?;

    Ok(ids.into_iter().collect())
}
