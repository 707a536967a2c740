//! Origin side of the relay link.
//!
//! A downstream node opens one `/pull` socket and multiplexes its sessions
//! over it. Each `sid` gets its own [`SignalHandler`] in origin mode backed by
//! a fresh engine peer; replies go back on the same socket tagged with the
//! sid. When the socket ends every peer created for it is closed.
//!
//! A `join` for a sid that already has a handler means the downstream node
//! replaced its pull peer. The old handler and its peer are closed and the
//! join starts a fresh one.

use crate::engine::MediaEngine;
use crate::errors::{ProtocolError, SfError};
use crate::protocol::{Inbound, OutboundMessage, SignalRequest};
use crate::signal::connection::{finish_writer, spawn_socket_writer};
use crate::signal::{HandlerFlow, JoinPolicy, OutboundSink, SignalHandler, SocketCommand};
use axum::extract::ws::{Message, WebSocket};
use common::types::SessionId;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Per-socket demultiplexer: one origin-mode handler per session id.
pub struct FederationIngress {
    engine: Arc<dyn MediaEngine>,
    tx: mpsc::UnboundedSender<SocketCommand>,
    handlers: HashMap<SessionId, SignalHandler>,
}

impl FederationIngress {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, tx: mpsc::UnboundedSender<SocketCommand>) -> Self {
        Self {
            engine,
            tx,
            handlers: HashMap::new(),
        }
    }

    /// Number of sessions with a live handler on this socket.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.handlers.len()
    }

    /// Route one text frame to its session's handler.
    pub async fn handle_text(&mut self, text: &str) {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(
                    target: "sf.federation.ingress",
                    sid = ?e.sid,
                    error = %e.error,
                    "Malformed federation frame"
                );
                if let (Some(sid), Some(id)) = (e.sid, e.id) {
                    let sink = OutboundSink::multiplexed(self.tx.clone(), sid);
                    let _ = sink.send(&OutboundMessage::error(
                        Some(id),
                        &SfError::Protocol(e.error),
                    ));
                }
                return;
            }
        };

        let Some(sid) = inbound.sid().cloned() else {
            warn!(
                target: "sf.federation.ingress",
                error = %ProtocolError::MissingSessionId,
                "Dropping federation frame"
            );
            return;
        };

        let starts_session = matches!(
            &inbound,
            Inbound::Request {
                request: SignalRequest::Join(_),
                ..
            }
        );

        if starts_session {
            if let Some(mut previous) = self.handlers.remove(&sid) {
                info!(
                    target: "sf.federation.ingress",
                    sid = %sid,
                    "Downstream node re-joined session, replacing its peer"
                );
                previous.close().await;
            }
        }

        if !self.handlers.contains_key(&sid) {
            if !starts_session {
                debug!(
                    target: "sf.federation.ingress",
                    sid = %sid,
                    "Dropping frame for session without a join"
                );
                return;
            }

            info!(
                target: "sf.federation.ingress",
                sid = %sid,
                "Downstream node pulling session"
            );
            let handler = SignalHandler::new(
                self.engine.new_peer(),
                OutboundSink::multiplexed(self.tx.clone(), sid.clone()),
                JoinPolicy::Origin,
            );
            self.handlers.insert(sid.clone(), handler);
        }

        let flow = match self.handlers.get_mut(&sid) {
            Some(handler) => handler.handle(inbound).await,
            None => return,
        };

        if flow == HandlerFlow::Close {
            if let Some(mut handler) = self.handlers.remove(&sid) {
                handler.close().await;
            }
        }
    }

    /// Close every peer created for this socket.
    pub async fn close_all(&mut self) {
        for (sid, mut handler) in self.handlers.drain() {
            debug!(
                target: "sf.federation.ingress",
                sid = %sid,
                "Closing pulled session"
            );
            handler.close().await;
        }
    }
}

/// Serve one `/pull` socket until it closes or `cancel_token` fires.
#[instrument(skip_all)]
pub async fn serve_federation_socket(
    socket: WebSocket,
    engine: Arc<dyn MediaEngine>,
    cancel_token: CancellationToken,
) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, writer) = spawn_socket_writer(ws_sink);
    let mut ingress = FederationIngress::new(engine, tx.clone());

    loop {
        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            () = cancel_token.cancelled() => break,
        };

        match frame {
            Some(Ok(Message::Text(text))) => ingress.handle_text(&text).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(
                    target: "sf.federation.ingress",
                    error = %e,
                    "Federation socket read failed"
                );
                break;
            }
        }
    }

    let sessions = ingress.session_count();
    ingress.close_all().await;
    let _ = tx.send(SocketCommand::Close);
    drop(tx);
    finish_writer(writer).await;

    info!(
        target: "sf.federation.ingress",
        sessions = sessions,
        "Federation socket closed"
    );
}
