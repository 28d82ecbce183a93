//! Uploader
//!
//! Drives one `UploadSession` over one `Transport`: sends the handshake,
//! then reacts to each inbound event until the connection closes.

use super::integrity::seal_frame;
use super::key::{KeyProvider, OsKeyProvider};
use super::session::{Action, UploadSession};
use super::source::{ChunkPlan, ChunkSource};
use super::transport::{Transport, TransportEvent, WebSocketTransport};
use super::types::{close_code, parse_ack, DestinationPath, UploadError, DEFAULT_CHUNK_SIZE};

/// Uploader settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Bytes per chunk frame, excluding the tag
    pub chunk_size: usize,

    /// Cap on consecutive rejections of one chunk (None = unbounded)
    pub max_resends: Option<u32>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_resends: None,
        }
    }
}

/// Client side of the chunked upload protocol
pub struct Uploader<K: KeyProvider = OsKeyProvider> {
    config: UploadConfig,
    keys: K,
}

impl Uploader<OsKeyProvider> {
    pub fn new(config: UploadConfig) -> Self {
        Self { config, keys: OsKeyProvider }
    }
}

impl Default for Uploader<OsKeyProvider> {
    fn default() -> Self {
        Self::new(UploadConfig::default())
    }
}

impl<K: KeyProvider> Uploader<K> {
    /// Use a specific key provider (deterministic keys in tests)
    pub fn with_key_provider(config: UploadConfig, keys: K) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Open a WebSocket to `endpoint` and upload `source` to `destination`.
    ///
    /// `progress` is called with `(index, count)` once per accepted chunk.
    pub async fn upload<S, F>(
        &self,
        endpoint: &str,
        destination: &DestinationPath,
        source: &S,
        progress: F,
    ) -> Result<(), UploadError>
    where
        S: ChunkSource + ?Sized,
        F: FnMut(u64, u64) + Send,
    {
        let transport = WebSocketTransport::connect(endpoint, destination).await?;
        tracing::info!(
            destination = %destination,
            size = source.size(),
            chunk_size = self.config.chunk_size,
            "Starting upload"
        );
        self.run(transport, source, progress).await
    }

    /// Run a session over an already established transport
    pub async fn run<T, S, F>(
        &self,
        mut transport: T,
        source: &S,
        mut progress: F,
    ) -> Result<(), UploadError>
    where
        T: Transport,
        S: ChunkSource + ?Sized,
        F: FnMut(u64, u64) + Send,
    {
        let plan = ChunkPlan::new(source.size(), self.config.chunk_size);
        let mut session = UploadSession::new(self.keys.generate(), plan, self.config.max_resends);

        let handshake = serde_json::to_string(&session.handshake())?;
        transport.send_text(handshake).await.map_err(|e| match e {
            UploadError::Transport(msg) => UploadError::TransportEstablishment(msg),
            other => other,
        })?;
        tracing::debug!(count = session.count(), "Handshake sent");

        loop {
            match transport.next_event().await {
                TransportEvent::Text(text) => {
                    let step = match parse_ack(&text).and_then(|ack| session.on_ack(ack)) {
                        Ok(step) => step,
                        Err(e) => {
                            session.fail();
                            transport.close(close_code::POLICY_VIOLATION).await;
                            return Err(e);
                        }
                    };

                    if let Some(index) = step.accepted {
                        tracing::trace!(index, count = session.count(), "Chunk accepted");
                        progress(index, session.count());
                    }

                    match step.action {
                        Action::Send(index) => {
                            send_chunk(&mut transport, &session, source, index).await?;
                        }
                        Action::Resend(index) => {
                            tracing::warn!(index, "Chunk rejected, resending");
                            send_chunk(&mut transport, &session, source, index).await?;
                        }
                        Action::AwaitClose => {
                            tracing::debug!("All chunks accepted, awaiting close");
                        }
                    }
                }
                TransportEvent::Binary(data) => {
                    session.fail();
                    transport.close(close_code::POLICY_VIOLATION).await;
                    return Err(UploadError::Protocol(format!(
                        "unexpected binary message of {} bytes",
                        data.len()
                    )));
                }
                TransportEvent::Closed(code) => {
                    return match session.on_close(code) {
                        Ok(()) => {
                            tracing::info!(count = session.count(), "Upload complete");
                            Ok(())
                        }
                        Err(e) => {
                            tracing::warn!(code, error = %e, "Upload failed");
                            Err(e)
                        }
                    };
                }
                TransportEvent::Error(e) => {
                    session.fail();
                    tracing::warn!(error = %e, "Upload transport error");
                    return Err(UploadError::Transport(e));
                }
            }
        }
    }
}

/// Read chunk `index`, seal it under the session key and send it
async fn send_chunk<T, S>(
    transport: &mut T,
    session: &UploadSession,
    source: &S,
    index: u64,
) -> Result<(), UploadError>
where
    T: Transport,
    S: ChunkSource + ?Sized,
{
    let (offset, len) = session.plan().range(index);
    let data = source.read_at(offset, len).await?;
    let frame = seal_frame(session.key(), &data);
    tracing::trace!(index, len, "Sending chunk");
    transport.send_binary(frame).await
}
