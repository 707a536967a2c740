//! Websocket loop for one end-user signaling connection.

use super::handler::{HandlerFlow, JoinPolicy, SignalHandler};
use super::{OutboundSink, SocketCommand};
use crate::engine::MediaPeer;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// How long the writer gets to flush queued frames after the reader stops.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawn a task that owns the write half of a socket.
///
/// Frames are written in the order they were queued. The task ends on
/// [`SocketCommand::Close`], on a write error, or when every sender is gone.
pub fn spawn_socket_writer(
    mut sink: SplitSink<WebSocket, Message>,
) -> (mpsc::UnboundedSender<SocketCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SocketCommand>();

    let writer = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                SocketCommand::Frame(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(
                            target: "sf.signal.connection",
                            error = %e,
                            "Socket write failed"
                        );
                        break;
                    }
                }
                SocketCommand::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    (tx, writer)
}

/// Wait for a writer to drain, aborting it after [`WRITER_DRAIN_TIMEOUT`].
pub(crate) async fn finish_writer(mut writer: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Run one signaling connection to completion.
///
/// Ends when the client closes, the handler rejects a join, or `cancel_token`
/// fires. The peer is closed on every exit path.
#[instrument(skip_all)]
pub async fn serve_signal_socket(
    socket: WebSocket,
    peer: Arc<dyn MediaPeer>,
    policy: JoinPolicy,
    cancel_token: CancellationToken,
) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, writer) = spawn_socket_writer(ws_sink);
    let mut handler = SignalHandler::new(peer, OutboundSink::direct(tx.clone()), policy);

    loop {
        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            () = cancel_token.cancelled() => break,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if handler.handle_text(&text).await == HandlerFlow::Close {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(
                    target: "sf.signal.connection",
                    error = %e,
                    "Signaling socket read failed"
                );
                break;
            }
        }
    }

    handler.close().await;
    let _ = tx.send(SocketCommand::Close);
    drop(tx);
    finish_writer(writer).await;

    debug!(
        target: "sf.signal.connection",
        sid = ?handler.session_id(),
        "Signaling connection finished"
    );
}
