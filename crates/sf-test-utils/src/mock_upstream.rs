//! Mock upstream (origin) node.
//!
//! Accepts relay websockets on a loopback port and records every frame a
//! downstream node sends. By default each `join` request is answered at once
//! with a canned SDP answer tagged with the request's `sid`. Tests can push
//! arbitrary frames down every open link, drop all links to force a
//! reconnect, and refuse new links to exercise backoff.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// SDP of the answer sent for every auto-answered join.
pub const UPSTREAM_ANSWER_SDP: &str = "v=0 upstream-answer";

pub struct MockUpstream {
    addr: SocketAddr,
    inner: Arc<Mutex<UpstreamInner>>,
    accept_task: JoinHandle<()>,
}

#[derive(Default)]
struct UpstreamInner {
    /// (link index, frame), in arrival order.
    frames: Vec<(usize, Value)>,
    links: Vec<mpsc::UnboundedSender<LinkCommand>>,
    answer_joins: bool,
    refuse: bool,
    refused: usize,
}

enum LinkCommand {
    Frame(String),
    Disconnect,
}

impl MockUpstream {
    /// Bind a loopback port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let inner = Arc::new(Mutex::new(UpstreamInner {
            answer_joins: true,
            ..UpstreamInner::default()
        }));

        let accept_inner = Arc::clone(&inner);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                {
                    let mut inner = accept_inner.lock().unwrap();
                    if inner.refuse {
                        inner.refused += 1;
                        continue;
                    }
                }
                tokio::spawn(serve_link(stream, Arc::clone(&accept_inner)));
            }
        });

        Self {
            addr,
            inner,
            accept_task,
        }
    }

    /// `host:port`, as configured in `SF_UPSTREAM_ADDRESS`.
    #[must_use]
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Federation endpoint URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}/pull", self.addr)
    }

    /// Links accepted so far, including closed ones.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }

    /// Connection attempts dropped while refusing.
    #[must_use]
    pub fn refused_count(&self) -> usize {
        self.inner.lock().unwrap().refused
    }

    /// Every frame received, on any link.
    #[must_use]
    pub fn frames(&self) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner.frames.iter().map(|(_, frame)| frame.clone()).collect()
    }

    /// Frames with the given `method`, on any link.
    #[must_use]
    pub fn frames_with_method(&self, method: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame["method"] == method)
            .collect()
    }

    /// Frames received on link `link` (0-based, in accept order).
    #[must_use]
    pub fn frames_on(&self, link: usize) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .frames
            .iter()
            .filter(|(index, _)| *index == link)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Answer `join` requests automatically (on by default).
    pub fn set_answer_joins(&self, answer: bool) {
        self.inner.lock().unwrap().answer_joins = answer;
    }

    /// Drop new connections before the websocket handshake.
    pub fn set_refuse(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse = refuse;
    }

    /// Write `frame` on every open link.
    pub fn push(&self, frame: &Value) {
        let text = frame.to_string();
        let inner = self.inner.lock().unwrap();
        for link in &inner.links {
            let _ = link.send(LinkCommand::Frame(text.clone()));
        }
    }

    /// Close every open link with a close frame.
    pub fn disconnect_all(&self) {
        let inner = self.inner.lock().unwrap();
        for link in &inner.links {
            let _ = link.send(LinkCommand::Disconnect);
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Ok(inner) = self.inner.lock() {
            for link in &inner.links {
                let _ = link.send(LinkCommand::Disconnect);
            }
        }
    }
}

async fn serve_link(stream: TcpStream, inner: Arc<Mutex<UpstreamInner>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = {
        let mut inner = inner.lock().unwrap();
        inner.links.push(tx);
        inner.links.len() - 1
    };

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = record(&inner, link, &text) {
                        if sink.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = rx.recv() => match command {
                Some(LinkCommand::Frame(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(LinkCommand::Disconnect) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}

/// Store one frame; returns the auto-answer if it was a join.
fn record(inner: &Mutex<UpstreamInner>, link: usize, text: &str) -> Option<String> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let mut inner = inner.lock().unwrap();
    inner.frames.push((link, frame.clone()));

    if !inner.answer_joins || frame["method"] != "join" {
        return None;
    }
    let id = frame.get("id")?.clone();
    Some(
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "sid": frame["sid"],
            "result": {"type": "answer", "sdp": UPSTREAM_ANSWER_SDP}
        })
        .to_string(),
    )
}
