//! Thin WebSocket transport wrapper shared by both sync clients.
//!
//! Structurally mirrors a plain send/recv wrapper over
//! `tokio-tungstenite`: connect, send a JSON value, receive a JSON value,
//! treat `Close`/stream-end as a transport error the caller reconnects
//! from. Ping/pong/binary frames are swallowed here; callers only see
//! `Text` frames decoded as JSON.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{SyncError, SyncResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One connected WebSocket, sending and receiving whole JSON frames.
pub struct RealtimeLink {
    stream: WsStream,
}

impl RealtimeLink {
    /// Connect to `url` (e.g. `wss://api.happy.dev/v1/sync/session`).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the TCP/TLS/WebSocket handshake fails.
    pub async fn connect(url: &str) -> SyncResult<Self> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Serialize `value` and send it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the send fails.
    pub async fn send(&mut self, value: &serde_json::Value) -> SyncResult<()> {
        let text = value.to_string();
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    /// Wait for the next text frame, skipping ping/pong/binary frames,
    /// and parse it as JSON.
    ///
    /// Returns `Ok(None)` when the peer closes the stream cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] on a transport-level error or an
    /// explicit `Close` frame, [`SyncError::MalformedFrame`] if a text
    /// frame is not valid JSON.
    pub async fn recv(&mut self) -> SyncResult<Option<serde_json::Value>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(&text)
                        .map_err(|e| SyncError::MalformedFrame(e.to_string()))?;
                    return Ok(Some(value));
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(SyncError::Transport("peer closed the connection".into()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {
                    continue;
                }
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    /// Close the underlying connection.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
