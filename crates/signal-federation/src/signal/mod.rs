//! End-user signaling.
//!
//! [`SignalHandler`] is the per-connection state machine. It never touches the
//! socket directly; it writes encoded frames to an [`OutboundSink`], which a
//! writer task drains onto the websocket.

pub mod connection;
pub mod handler;

pub use connection::{serve_signal_socket, spawn_socket_writer};
pub use handler::{HandlerFlow, JoinPolicy, SignalHandler, SignalState};

use crate::errors::SfError;
use crate::protocol::OutboundMessage;
use common::types::SessionId;
use tokio::sync::mpsc;
use tracing::warn;

/// Instruction for a socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Frame(String),
    Close,
}

/// Where a handler's replies and notifications go.
///
/// A direct sink owns its socket. A multiplexed sink shares a federation
/// socket with other sessions: every frame is tagged with its sid, and
/// closing the handler leaves the socket open.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<SocketCommand>,
    sid: Option<SessionId>,
}

impl OutboundSink {
    #[must_use]
    pub fn direct(tx: mpsc::UnboundedSender<SocketCommand>) -> Self {
        Self { tx, sid: None }
    }

    #[must_use]
    pub fn multiplexed(tx: mpsc::UnboundedSender<SocketCommand>, sid: SessionId) -> Self {
        Self { tx, sid: Some(sid) }
    }

    /// Encode and queue one frame.
    ///
    /// # Errors
    ///
    /// Returns `SfError::Closed` once the writer has gone away.
    pub fn send(&self, message: &OutboundMessage) -> Result<(), SfError> {
        let text = message.encode(self.sid.as_ref()).map_err(|e| {
            warn!(
                target: "sf.signal.handler",
                error = %e,
                "Failed to encode outbound frame"
            );
            SfError::Internal(format!("Failed to encode frame: {e}"))
        })?;
        self.tx
            .send(SocketCommand::Frame(text))
            .map_err(|_| SfError::Closed)
    }

    /// Close the underlying socket if this sink owns it.
    pub fn close_transport(&self) {
        if self.sid.is_none() {
            // Writer already gone means the socket is already closing.
            let _ = self.tx.send(SocketCommand::Close);
        }
    }
}
