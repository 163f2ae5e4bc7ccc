//! Wire protocol message types for the chat daemon.
//!
//! All messages are MessagePack-encoded maps with at minimum `type` and
//! `id` fields. Chat messages travel as [`MessageDescriptor`] with the
//! field names `message_id`, `username`, `date`, `content`.

use serde::{Deserialize, Serialize};

use crate::room::{ChatMessage, NO_MESSAGES, RoomId, format_date};
use crate::store::RoomRecord;

/// All wire protocol messages.
///
/// Serialized as a tagged union on the `type` field via MessagePack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // -- Handshake --
    #[serde(rename = "hello")]
    Hello { id: u32, version: u32, role: Role },

    #[serde(rename = "hello_ack")]
    HelloAck {
        id: u32,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- Messages --
    #[serde(rename = "send_message")]
    SendMessage {
        id: u32,
        room_id: RoomId,
        username: String,
        content: String,
    },

    /// Long-poll for messages newer than `since_id`.
    #[serde(rename = "get_messages")]
    GetMessages {
        id: u32,
        room_id: RoomId,
        #[serde(default = "no_messages")]
        since_id: i64,
        /// Overrides the daemon's poll timeout (clamped to it).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    #[serde(rename = "get_latest_message_id")]
    GetLatestMessageId { id: u32, room_id: RoomId },

    /// Durable-store history, not limited to the recent window.
    #[serde(rename = "get_history")]
    GetHistory {
        id: u32,
        room_id: RoomId,
        #[serde(default = "no_messages")]
        since_id: i64,
    },

    // -- Presence --
    #[serde(rename = "notify_presence")]
    NotifyPresence {
        id: u32,
        room_id: RoomId,
        username: String,
    },

    /// Presence long-poll; also records `username` as present.
    #[serde(rename = "get_presence")]
    GetPresence {
        id: u32,
        room_id: RoomId,
        username: String,
    },

    #[serde(rename = "get_date")]
    GetDate { id: u32 },

    // -- Room lifecycle (admin only) --
    #[serde(rename = "create_room")]
    CreateRoom {
        id: u32,
        name: String,
        slug: String,
        #[serde(default)]
        allow_anonymous: bool,
    },

    #[serde(rename = "delete_room")]
    DeleteRoom { id: u32, room_id: RoomId },

    #[serde(rename = "list_rooms")]
    ListRooms { id: u32 },

    // -- Generic response --
    #[serde(rename = "response")]
    Response {
        id: u32,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<MessageDescriptor>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users: Option<Vec<PresenceDescriptor>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rooms: Option<Vec<RoomDescriptor>>,
        /// Server time (`get_date`, `get_presence`) or send receipt time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<String>,
        /// Presence refresh interval in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh: Option<u64>,
    },
}

fn no_messages() -> i64 {
    NO_MESSAGES
}

/// Client role in the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Chat participant: messages and presence.
    Client,
    /// Room lifecycle events from the administrative side.
    Admin,
}

/// Response status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// A chat message as serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub message_id: i64,
    pub username: String,
    pub date: String,
    pub content: String,
}

impl From<&ChatMessage> for MessageDescriptor {
    fn from(m: &ChatMessage) -> Self {
        Self {
            message_id: m.id,
            username: m.author.clone(),
            date: format_date(&m.date),
            content: m.content.clone(),
        }
    }
}

/// A present participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceDescriptor {
    pub username: String,
    /// Last seen.
    pub date: String,
}

/// Room metadata returned by `list_rooms` and `create_room`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub room_id: RoomId,
    pub name: String,
    pub slug: String,
    pub allow_anonymous: bool,
}

impl From<RoomRecord> for RoomDescriptor {
    fn from(r: RoomRecord) -> Self {
        Self {
            room_id: r.room_id,
            name: r.name,
            slug: r.slug,
            allow_anonymous: r.allow_anonymous,
        }
    }
}

/// Protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Request `type` tags the daemon understands. A frame carrying one of
/// these that still fails to decode has bad parameters, not a bad type.
pub const REQUEST_TYPES: &[&str] = &[
    "hello",
    "send_message",
    "get_messages",
    "get_latest_message_id",
    "get_history",
    "notify_presence",
    "get_presence",
    "get_date",
    "create_room",
    "delete_room",
    "list_rooms",
];

/// Minimal envelope for extracting `{type, id}` from undecodable messages.
///
/// Lets the daemon echo the request `id` in its error response.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub id: u32,
}
