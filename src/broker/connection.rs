//! Per-connection task: framed I/O, handshake, request dispatch.
//!
//! Each client connection spawns a tokio task that:
//! 1. Wraps the socket in a length-prefixed MessagePack codec.
//! 2. Reads the first message (must be `Hello`) and records the role.
//! 3. Serves requests one at a time against the shared broker state.
//!    A long-poll blocks this task only, never the accept loop.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Status};
use crate::pipeline::MessageHandler;
use crate::store::MessageStore;

use super::handler::{error_response, handle_hello, handle_message};
use super::state::BrokerState;

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be Hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Spawn a connection handler task.
///
/// The task runs until the client disconnects or a protocol error
/// occurs.
pub fn spawn_connection<H: MessageHandler, S: MessageStore>(
    stream: UnixStream,
    conn_id: u64,
    state: Arc<BrokerState<H, S>>,
) {
    tokio::spawn(async move {
        match handle_connection(stream, &state).await {
            Ok(()) => tracing::debug!(conn_id, "connection closed"),
            Err(e) => tracing::debug!(conn_id, error = %e, "connection dropped"),
        }
    });
}

async fn handle_connection<H: MessageHandler, S: MessageStore>(
    stream: UnixStream,
    state: &BrokerState<H, S>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());

    // -- Handshake: first message must be Hello --
    let first_frame = framed.next().await.ok_or(ConnectionError::HandshakeEof)??;

    let (id, version, role) = match decode_frame(&first_frame) {
        DecodeResult::Ok(Message::Hello { id, version, role }) => (id, version, role),
        DecodeResult::Ok(_) | DecodeResult::InvalidParameters(_) | DecodeResult::UnknownType(_) => {
            return Err(ConnectionError::NotHello);
        }
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    let ack = handle_hello(id, version);
    let rejected = matches!(
        ack,
        Message::HelloAck {
            status: Status::Error,
            ..
        }
    );
    framed.send(ack).await?;
    if rejected {
        return Ok(());
    }
    tracing::debug!(?role, "handshake complete");

    // -- Main loop: one request, one response --
    while let Some(frame) = framed.next().await {
        let raw = frame?;
        let response = match decode_frame(&raw) {
            DecodeResult::Ok(request) => handle_message(state, request, role).await,
            DecodeResult::InvalidParameters(envelope) => {
                tracing::debug!(msg_type = %envelope.msg_type, id = envelope.id, "bad request fields");
                error_response(envelope.id, "invalid_parameter")
            }
            DecodeResult::UnknownType(envelope) => {
                // Keep the connection open; the id is echoed back.
                error_response(envelope.id, "unknown_type")
            }
            DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
        };
        framed.send(response).await?;
    }
    Ok(())
}
