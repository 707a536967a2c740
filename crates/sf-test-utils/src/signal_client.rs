//! Websocket client for end-user and federation endpoints.

use anyhow::{anyhow, bail, Context};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a receive waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SignalClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SignalClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("connect to {url}"))?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, frame: &Value) -> anyhow::Result<()> {
        self.stream
            .send(Message::Text(frame.to_string()))
            .await
            .context("send frame")
    }

    /// Next JSON frame, or `None` once the server has closed.
    pub async fn recv(&mut self) -> anyhow::Result<Option<Value>> {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow!("no frame within {RECV_TIMEOUT:?}"))?;
            match message {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).map(Some).context("decode frame");
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => bail!("read failed: {e}"),
            }
        }
    }

    /// Next frame whose `method` (or, for replies, `id`) matches.
    pub async fn recv_method(&mut self, method: &str) -> anyhow::Result<Value> {
        loop {
            match self.recv().await? {
                Some(frame) if frame["method"] == method => return Ok(frame),
                Some(_) => {}
                None => bail!("closed before a {method} frame"),
            }
        }
    }

    /// Fail unless the server closes without sending another text frame.
    pub async fn expect_closed(&mut self) -> anyhow::Result<()> {
        match self.recv().await {
            Ok(None) => Ok(()),
            // A reset after the close frame is still a close.
            Err(e) if e.to_string().starts_with("read failed") => Ok(()),
            Ok(Some(frame)) => bail!("expected close, got {frame}"),
            Err(e) => Err(e),
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
