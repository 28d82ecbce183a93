//! Upload Route
//!
//! `GET /upload/*path` upgrades to a WebSocket and runs the receive side of
//! the chunked upload protocol:
//! - first message: `{"key": <hex>, "count": N}`, answered with `true`
//! - then N verified chunk frames, each answered `true` or `false`
//! - close 1000 once the file is committed, 1008 on protocol violations,
//!   1011 when the file cannot be committed

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};

use crate::error::{AppError, Result};
use crate::receive::{
    parse_handshake, resolve_destination, ReceiveError, ReceiveSession, UploadClaim, UploadTarget,
};
use crate::state::AppState;
use crate::upload::{close_code, encode_ack, MAX_CHUNK_SIZE, TAG_LEN};

/// Largest chunk frame the receiver accepts: tag plus a maximum-size chunk
pub const MAX_FRAME_SIZE: usize = TAG_LEN + MAX_CHUNK_SIZE;

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new().route("/*path", get(upload))
}

/// GET /upload/*path
///
/// Validates the destination before upgrading, so bad paths get a plain
/// HTTP error instead of a WebSocket close.
async fn upload(
    State(state): State<AppState>,
    Path(path): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response> {
    let target = resolve_destination(&state.config().storage.root, &path).await?;
    let ws = ws.ok_or_else(|| AppError::BadRequest("expected a WebSocket upgrade".to_string()))?;
    let claim = state.uploads().claim(&target.path)?;

    Ok(ws
        .max_frame_size(MAX_FRAME_SIZE)
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| receive_upload(socket, target, claim)))
}

async fn receive_upload(mut socket: WebSocket, target: UploadTarget, claim: UploadClaim) {
    let code = match run_session(&mut socket, &target).await {
        Ok(()) => close_code::NORMAL,
        Err(e) => {
            tracing::warn!(destination = %target.path.display(), error = %e, "Upload failed");
            e.close_code()
        }
    };

    let frame = CloseFrame { code, reason: "".into() };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
    drop(claim);
}

async fn run_session(
    socket: &mut WebSocket,
    target: &UploadTarget,
) -> std::result::Result<(), ReceiveError> {
    let text = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(_)) => {
            return Err(ReceiveError::InvalidHandshake("expected a text message".to_string()))
        }
        Some(Err(e)) => return Err(ReceiveError::Protocol(e.to_string())),
        None => {
            return Err(ReceiveError::Protocol("connection closed before handshake".to_string()))
        }
    };
    let (key, count) = parse_handshake(&text)?;

    let mut session = ReceiveSession::create(target, key, count).await?;
    match receive_chunks(socket, &mut session).await {
        Ok(()) => session.commit().await.map(|_| ()),
        Err(e) => {
            session.abort().await;
            Err(e)
        }
    }
}

async fn receive_chunks(
    socket: &mut WebSocket,
    session: &mut ReceiveSession,
) -> std::result::Result<(), ReceiveError> {
    // Acknowledges the handshake
    send_ack(socket, true).await?;

    while !session.is_complete() {
        let frame = match socket.recv().await {
            Some(Ok(Message::Binary(frame))) => frame,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(_))) => {
                return Err(ReceiveError::Protocol("text message during chunk stream".to_string()))
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(ReceiveError::Protocol(format!(
                    "connection closed after {}/{} chunks",
                    session.received(),
                    session.count()
                )))
            }
            Some(Err(e)) => return Err(ReceiveError::Protocol(e.to_string())),
        };

        let accepted = session.accept_frame(&frame).await?;
        send_ack(socket, accepted).await?;
    }

    Ok(())
}

async fn send_ack(socket: &mut WebSocket, accepted: bool) -> std::result::Result<(), ReceiveError> {
    socket
        .send(Message::Text(encode_ack(accepted)))
        .await
        .map_err(|e| ReceiveError::Protocol(e.to_string()))
}
