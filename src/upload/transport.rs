//! Chunk transport
//!
//! An ordered, full-duplex, message-based connection to one upload
//! endpoint. The uploader only sees the `Transport` trait; the WebSocket
//! implementation is what runs against a real server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::types::{close_code, DestinationPath, UploadError};

/// Inbound event from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text message (acknowledgments)
    Text(String),
    /// Binary message. The protocol never sends these to the client.
    Binary(Vec<u8>),
    /// Connection closed with this code
    Closed(u16),
    /// Connection failed
    Error(String),
}

/// Duplex message connection used by the uploader
#[async_trait]
pub trait Transport: Send {
    /// Send a text (control) message
    async fn send_text(&mut self, text: String) -> Result<(), UploadError>;

    /// Send a binary (chunk) frame
    async fn send_binary(&mut self, frame: Vec<u8>) -> Result<(), UploadError>;

    /// Wait for the next inbound event. After `Closed` or `Error` the
    /// transport is finished.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close from the client side
    async fn close(&mut self, code: u16);
}

/// Build the WebSocket URL for a destination
pub fn upload_url(endpoint: &str, destination: &DestinationPath) -> String {
    format!("{}/upload/{}", endpoint.trim_end_matches('/'), destination.to_url_path())
}

// ============================================================================
// WebSocket Transport
// ============================================================================

/// Transport over a tokio-tungstenite client connection
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Open a connection to `<endpoint>/upload/<destination>`
    pub async fn connect(
        endpoint: &str,
        destination: &DestinationPath,
    ) -> Result<Self, UploadError> {
        let url = upload_url(endpoint, destination);
        tracing::debug!(url = %url, "Opening upload connection");

        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| UploadError::TransportEstablishment(e.to_string()))?;

        tracing::trace!(status = %response.status(), "Upload connection established");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<(), UploadError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))
    }

    async fn send_binary(&mut self, frame: Vec<u8>) -> Result<(), UploadError> {
        self.stream
            .send(Message::Binary(frame))
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        // Ping/pong are answered by tungstenite itself
        loop {
            let event = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => TransportEvent::Text(text),
                Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data),
                Some(Ok(Message::Close(frame))) => TransportEvent::Closed(
                    frame.map_or(close_code::NO_STATUS, |f| u16::from(f.code)),
                ),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => TransportEvent::Error(e.to_string()),
                None => TransportEvent::Closed(close_code::ABNORMAL),
            };
            return event;
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!(error = %e, "Error closing upload connection");
        }
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// In-memory transport that replays a fixed list of inbound events and
/// records everything sent. Drives the uploader without a server.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    inbound: std::collections::VecDeque<TransportEvent>,
    /// Text messages sent, in order
    pub sent_text: Vec<String>,
    /// Binary frames sent, in order
    pub sent_frames: Vec<Vec<u8>>,
    /// Close code sent by the client, if it closed
    pub closed_with: Option<u16>,
    /// Number of sends that succeed before the connection drops
    pub fail_after_sends: Option<usize>,
}

impl ScriptedTransport {
    pub fn new(inbound: impl IntoIterator<Item = TransportEvent>) -> Self {
        Self {
            inbound: inbound.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Script of boolean acknowledgments followed by a close
    pub fn acks_then_close(acks: &[bool], code: u16) -> Self {
        Self::new(
            acks.iter()
                .map(|ack| TransportEvent::Text(ack.to_string()))
                .chain(std::iter::once(TransportEvent::Closed(code))),
        )
    }

    fn check_send(&self) -> Result<(), UploadError> {
        match self.fail_after_sends {
            Some(limit) if self.sent_text.len() + self.sent_frames.len() >= limit => {
                Err(UploadError::Transport("connection dropped".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_text(&mut self, text: String) -> Result<(), UploadError> {
        self.check_send()?;
        self.sent_text.push(text);
        Ok(())
    }

    async fn send_binary(&mut self, frame: Vec<u8>) -> Result<(), UploadError> {
        self.check_send()?;
        self.sent_frames.push(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        // An exhausted script behaves like a dropped connection
        self.inbound
            .pop_front()
            .unwrap_or(TransportEvent::Closed(close_code::ABNORMAL))
    }

    async fn close(&mut self, code: u16) {
        self.closed_with = Some(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_url() {
        let dest = DestinationPath::parse("photos/2024/a b.jpg");
        assert_eq!(
            upload_url("ws://localhost:8080/", &dest),
            "ws://localhost:8080/upload/photos/2024/a%20b.jpg"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_establishment_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let dest = DestinationPath::parse("file.bin");
        let err = WebSocketTransport::connect("ws://127.0.0.1:9", &dest).await.err().unwrap();
        assert!(matches!(err, UploadError::TransportEstablishment(_)));
    }

    #[tokio::test]
    async fn test_scripted_transport_replays_and_records() {
        let mut t = ScriptedTransport::acks_then_close(&[true, false], 1000);
        t.send_text("hello".into()).await.unwrap();
        t.send_binary(vec![1, 2]).await.unwrap();

        assert_eq!(t.next_event().await, TransportEvent::Text("true".into()));
        assert_eq!(t.next_event().await, TransportEvent::Text("false".into()));
        assert_eq!(t.next_event().await, TransportEvent::Closed(1000));
        assert_eq!(t.next_event().await, TransportEvent::Closed(close_code::ABNORMAL));
        assert_eq!(t.sent_text, vec!["hello".to_string()]);
        assert_eq!(t.sent_frames, vec![vec![1, 2]]);
    }
}
