//! Request dispatch.
//!
//! Each handler takes the shared [`BrokerState`] and returns a single
//! response message. Requests that long-poll (`get_messages`,
//! `get_presence`) block only the calling connection's task.

use chrono::Utc;

use crate::ipc::protocol::{
    Message, MessageDescriptor, PROTOCOL_VERSION, PresenceDescriptor, RoomDescriptor, Role, Status,
};
use crate::pipeline::MessageHandler;
use crate::room::{ChatError, ChatMessage, RoomId, format_date};
use crate::store::MessageStore;

use super::state::BrokerState;

/// Validate a `hello`. The ack always carries id 0.
pub fn handle_hello(id: u32, version: u32) -> Message {
    if id != 0 {
        return hello_ack_error("invalid_hello_id");
    }
    if version != PROTOCOL_VERSION {
        return hello_ack_error("version_mismatch");
    }
    Message::HelloAck {
        id: 0,
        status: Status::Ok,
        error: None,
    }
}

/// Dispatch a post-handshake request.
///
/// Enforces:
/// - Room create/delete only from the admin role; others get `unknown_type`
/// - Server-originated variants and repeated `hello` → `unknown_type`
pub async fn handle_message<H: MessageHandler, S: MessageStore>(
    state: &BrokerState<H, S>,
    request: Message,
    role: Role,
) -> Message {
    match request {
        // -- Messages --
        Message::SendMessage {
            id,
            room_id,
            username,
            content,
        } => handle_send(state, id, room_id, &username, &content).await,
        Message::GetMessages {
            id,
            room_id,
            since_id,
            timeout_ms,
        } => {
            let timeout = state.poll_timeout(timeout_ms);
            match state
                .handler()
                .retrieve_messages(room_id, since_id, timeout)
                .await
            {
                Ok(messages) => messages_response(id, &messages),
                Err(e) => chat_error_response(id, room_id, &e),
            }
        }
        Message::GetLatestMessageId { id, room_id } => {
            match state.handler().latest_message_id(room_id).await {
                Ok(latest) => message_id_response(id, latest, None),
                Err(e) => chat_error_response(id, room_id, &e),
            }
        }
        Message::GetHistory {
            id,
            room_id,
            since_id,
        } => match state.history(room_id, since_id).await {
            Ok(messages) => messages_response(id, &messages),
            Err(e) => chat_error_response(id, room_id, &e),
        },

        // -- Presence --
        Message::NotifyPresence {
            id,
            room_id,
            username,
        } => match state.presence().touch(room_id, &username) {
            Ok(()) => ok_response(id),
            Err(e) => chat_error_response(id, room_id, &e),
        },
        Message::GetPresence {
            id,
            room_id,
            username,
        } => handle_get_presence(state, id, room_id, &username).await,
        Message::GetDate { id } => date_response(id, format_date(&Utc::now())),

        // -- Room lifecycle --
        Message::CreateRoom {
            id,
            name,
            slug,
            allow_anonymous,
        } => {
            if role != Role::Admin {
                return error_response(id, "unknown_type");
            }
            match state.create_room(&name, &slug, allow_anonymous).await {
                Ok(record) => rooms_response(id, vec![record.into()]),
                Err(e) => {
                    tracing::debug!(slug = %slug, error = %e, "create_room rejected");
                    error_response(id, e.reason())
                }
            }
        }
        Message::DeleteRoom { id, room_id } => {
            if role != Role::Admin {
                return error_response(id, "unknown_type");
            }
            match state.delete_room(room_id).await {
                Ok(()) => ok_response(id),
                Err(e) => chat_error_response(id, room_id, &e),
            }
        }
        Message::ListRooms { id } => match state.list_rooms().await {
            Ok(records) => rooms_response(id, records.into_iter().map(Into::into).collect()),
            Err(e) => error_response(id, e.reason()),
        },

        // Handshake is over; server-originated messages are never valid requests.
        Message::Hello { id, .. } | Message::HelloAck { id, .. } | Message::Response { id, .. } => {
            error_response(id, "unknown_type")
        }
    }
}

// -- Individual handlers --

async fn handle_send<H: MessageHandler, S: MessageStore>(
    state: &BrokerState<H, S>,
    id: u32,
    room_id: RoomId,
    username: &str,
    content: &str,
) -> Message {
    let received = Utc::now();
    match state
        .handler()
        .handle_received(room_id, username, content, received)
        .await
    {
        Ok(message) => message_id_response(id, message.id, Some(format_date(&message.date))),
        Err(e) => chat_error_response(id, room_id, &e),
    }
}

async fn handle_get_presence<H: MessageHandler, S: MessageStore>(
    state: &BrokerState<H, S>,
    id: u32,
    room_id: RoomId,
    username: &str,
) -> Message {
    let config = state.config();
    match state
        .presence()
        .poll(
            room_id,
            username,
            config.presence_refresh,
            config.presence_staleness,
        )
        .await
    {
        Ok(snapshot) => Message::Response {
            id,
            status: Status::Ok,
            error: None,
            messages: None,
            message_id: None,
            users: Some(
                snapshot
                    .users
                    .iter()
                    .map(|(username, seen)| PresenceDescriptor {
                        username: username.clone(),
                        date: format_date(seen),
                    })
                    .collect(),
            ),
            rooms: None,
            date: Some(format_date(&snapshot.now)),
            refresh: Some(snapshot.refresh.as_secs()),
        },
        Err(e) => chat_error_response(id, room_id, &e),
    }
}

// -- Helpers --

fn hello_ack_error(reason: &str) -> Message {
    Message::HelloAck {
        id: 0,
        status: Status::Error,
        error: Some(reason.into()),
    }
}

fn chat_error_response(id: u32, room_id: RoomId, err: &ChatError) -> Message {
    tracing::debug!(id, room_id = %room_id, error = %err, "request failed");
    error_response(id, err.reason())
}

fn ok_response(id: u32) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        messages: None,
        message_id: None,
        users: None,
        rooms: None,
        date: None,
        refresh: None,
    }
}

pub(super) fn error_response(id: u32, reason: &str) -> Message {
    Message::Response {
        id,
        status: Status::Error,
        error: Some(reason.into()),
        messages: None,
        message_id: None,
        users: None,
        rooms: None,
        date: None,
        refresh: None,
    }
}

fn messages_response(id: u32, messages: &[ChatMessage]) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        messages: Some(messages.iter().map(MessageDescriptor::from).collect()),
        message_id: None,
        users: None,
        rooms: None,
        date: None,
        refresh: None,
    }
}

fn message_id_response(id: u32, message_id: i64, date: Option<String>) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        messages: None,
        message_id: Some(message_id),
        users: None,
        rooms: None,
        date,
        refresh: None,
    }
}

fn rooms_response(id: u32, rooms: Vec<RoomDescriptor>) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        messages: None,
        message_id: None,
        users: None,
        rooms: Some(rooms),
        date: None,
        refresh: None,
    }
}

fn date_response(id: u32, date: String) -> Message {
    Message::Response {
        id,
        status: Status::Ok,
        error: None,
        messages: None,
        message_id: None,
        users: None,
        rooms: None,
        date: Some(date),
        refresh: None,
    }
}
