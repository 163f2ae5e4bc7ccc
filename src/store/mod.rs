//! Durable store contract.
//!
//! The chat core never owns message durability. Everything that must
//! survive the ring window goes through a [`MessageStore`]. The daemon
//! ships with [`memory::MemoryStore`]; other backends implement the same
//! trait and are injected at startup.

pub mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::{ChatMessage, RoomId};

/// Store-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error("slug already in use: {0}")]
    DuplicateSlug(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Room metadata owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub name: String,
    pub slug: String,
    pub allow_anonymous: bool,
}

/// Fields for a room about to be created.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub slug: String,
    pub allow_anonymous: bool,
}

/// Durable persistence for rooms and messages.
///
/// Persisted message ids are per room, strictly increasing, and start
/// at 1. [`crate::room::NO_MESSAGES`] stands for "no messages".
pub trait MessageStore: Send + Sync + 'static {
    fn create_room(
        &self,
        room: NewRoom,
    ) -> impl Future<Output = Result<RoomRecord, StoreError>> + Send;

    fn delete_room(&self, room_id: RoomId) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_rooms(&self) -> impl Future<Output = Result<Vec<RoomRecord>, StoreError>> + Send;

    /// Persist a message and return its store id.
    fn save_message(
        &self,
        room_id: RoomId,
        author: &str,
        content: &str,
        date: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Messages with store id strictly greater than `since_id`, oldest first.
    fn query_messages(
        &self,
        room_id: RoomId,
        since_id: i64,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    fn latest_message_id(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;
}
