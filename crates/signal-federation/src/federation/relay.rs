//! Relay link to the upstream node.
//!
//! One websocket carries every federated session; frames are tagged with
//! their `sid`. Writers share the socket through [`RelayConnection::send`],
//! which serializes whole frames under a lock.
//!
//! # Replacement
//!
//! A dead connection is never repaired in place. The supervisor dials a new
//! one and swaps it into the [`RelayHandle`] with a higher generation.
//! Senders clone the current `Arc` under a read lock and send outside it, so
//! they reach either the old connection (already marked closed, the send
//! fails and is logged) or the new one.

use crate::errors::SfError;
use crate::protocol::OutboundMessage;
use common::types::SessionId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of a relay socket, consumed by the supervisor.
pub type RelaySource = SplitStream<WsStream>;

/// Write half of one relay socket.
pub struct RelayConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    generation: u64,
    closed: AtomicBool,
}

impl RelayConnection {
    /// Dial `url` and split the socket.
    ///
    /// # Errors
    ///
    /// Returns `SfError::Relay` if the websocket handshake fails.
    pub async fn connect(url: &str, generation: u64) -> Result<(Arc<Self>, RelaySource), SfError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            SfError::Relay(format!("Failed to connect to upstream {url}: {e}"))
        })?;
        let (sink, source) = stream.split();

        debug!(
            target: "sf.federation.relay",
            url = %url,
            generation = generation,
            "Relay connected"
        );

        Ok((
            Arc::new(Self {
                sink: Mutex::new(sink),
                generation,
                closed: AtomicBool::new(false),
            }),
            source,
        ))
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encode `message` tagged with `sid` and write it as one frame.
    ///
    /// # Errors
    ///
    /// Returns `SfError::Relay` if this connection is closed or the write fails.
    pub async fn send(&self, sid: &SessionId, message: &OutboundMessage) -> Result<(), SfError> {
        if self.is_closed() {
            return Err(SfError::Relay(format!(
                "relay generation {} is closed",
                self.generation
            )));
        }

        let text = message
            .encode(Some(sid))
            .map_err(|e| SfError::Internal(format!("Failed to encode relay frame: {e}")))?;

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(|e| {
            SfError::Relay(format!(
                "Failed to write to relay generation {}: {e}",
                self.generation
            ))
        })
    }

    /// Mark closed and send a close frame. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(
                target: "sf.federation.relay",
                generation = self.generation,
                error = %e,
                "Relay close frame not delivered"
            );
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Single owner of the current relay connection.
///
/// This is the unit a per-upstream map would key by address if federation
/// ever spans more than one upstream node.
#[derive(Default)]
pub struct RelayHandle {
    current: RwLock<Option<Arc<RelayConnection>>>,
    generation: AtomicU64,
}

impl RelayHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live connection, if any.
    pub async fn current(&self) -> Option<Arc<RelayConnection>> {
        self.current.read().await.clone()
    }

    /// Generation of the most recently reserved connection.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Reserve the generation number for the next connection.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make `connection` current. The previous one, if any, is returned
    /// already marked closed.
    pub async fn install(&self, connection: Arc<RelayConnection>) -> Option<Arc<RelayConnection>> {
        let previous = self.current.write().await.replace(connection);
        if let Some(previous) = &previous {
            previous.mark_closed();
        }
        previous
    }

    /// Clear the current connection if it is still `generation`.
    pub async fn clear(&self, generation: u64) -> bool {
        let mut current = self.current.write().await;
        let matches = current
            .as_ref()
            .is_some_and(|conn| conn.generation() == generation);
        if matches {
            if let Some(conn) = current.take() {
                conn.mark_closed();
            }
        }
        matches
    }

    /// Send on whatever connection is current.
    ///
    /// # Errors
    ///
    /// Returns `SfError::Relay` when there is no connection or the write fails.
    pub async fn send(&self, sid: &SessionId, message: &OutboundMessage) -> Result<(), SfError> {
        let Some(connection) = self.current().await else {
            warn!(
                target: "sf.federation.relay",
                sid = %sid,
                "No relay connection, dropping frame"
            );
            return Err(SfError::Relay("relay not connected".to_string()));
        };
        connection.send(sid, message).await
    }

    /// Close and clear the current connection.
    pub async fn shutdown(&self) {
        let current = self.current.write().await.take();
        if let Some(connection) = current {
            connection.close().await;
        }
    }
}
