//! WebSocket test client.
//!
//! Speaks the `{"event": ..., "data": ...}` envelope over a real socket.
//! Pings from the server are answered by tungstenite and never surface here.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `recv_*` waits for a frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `expect_silence` listens.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

pub struct TestClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Open a WebSocket to `url`.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self { stream })
    }

    /// Send a text frame exactly as given.
    pub async fn send_raw(&mut self, frame: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send `{"event": event, "data": data}`.
    pub async fn send_event(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        let frame = serde_json::json!({ "event": event, "data": data }).to_string();
        self.send_raw(&frame).await
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    /// Next text frame, or `None` if the server closed the connection.
    pub async fn recv_text(&mut self) -> Result<Option<String>, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let next = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("no frame within {:?}", RECV_TIMEOUT))?;

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(anyhow::anyhow!("read failed: {}", e)),
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_event(&mut self) -> Result<Value, anyhow::Error> {
        let text = self
            .recv_text()
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Next text frame if one arrives within [`SILENCE_WINDOW`].
    pub async fn try_recv_text(&mut self) -> Result<Option<String>, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + SILENCE_WINDOW;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) | Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(None),
                Ok(Some(Ok(Message::Text(text)))) => return Ok(Some(text)),
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => return Err(anyhow::anyhow!("read failed: {}", e)),
            }
        }
    }

    /// Fail if a text frame arrives within [`SILENCE_WINDOW`].
    pub async fn expect_silence(&mut self) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + SILENCE_WINDOW;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return Ok(()),
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Err(anyhow::anyhow!("unexpected frame: {}", text))
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => return Err(anyhow::anyhow!("read failed: {}", e)),
                Ok(None) => return Err(anyhow::anyhow!("connection closed")),
            }
        }
    }

    /// Send a close frame and wait for the server to finish the handshake.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        while let Some(Ok(_)) = self.stream.next().await {}
        Ok(())
    }
}
