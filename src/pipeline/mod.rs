//! Message handler pipeline: persist-and-publish / retrieve.
//!
//! [`MessageHandler`] is the capability seam between the transport and
//! the chat core. Two variants ship, selected at startup:
//!
//! - [`buffered::BufferedHandler`]: ids from the room's sequence
//!   generator, recent messages served from the room's ring, readers
//!   woken by the room's new-message signal.
//! - [`pubsub::PubSubHandler`]: ids and messages from the durable store,
//!   readers woken by a publish/subscribe topic.
//!
//! Readers never trust a wake alone: every variant re-filters by
//! `since_id` after waking, so coalesced or foreign wakes are harmless.

pub mod buffered;
pub mod pubsub;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::room::{ChatError, ChatMessage, NO_MESSAGES, RoomId, validate_username};
use crate::store::StoreError;

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_CONTENT_LEN: usize = 5000;

/// Handler variant, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HandlerKind {
    /// In-process ring buffer and wakeup signals.
    #[default]
    Buffered,
    /// Durable store plus a publish/subscribe topic.
    Pubsub,
}

/// Persist-and-publish / long-poll retrieve capability.
pub trait MessageHandler: Send + Sync + 'static {
    /// Validate, persist, sequence, buffer, and announce a message.
    ///
    /// Sends to one room are serialized; ids reflect arrival order.
    fn handle_received(
        &self,
        room_id: RoomId,
        author: &str,
        content: &str,
        date: DateTime<Utc>,
    ) -> impl Future<Output = Result<ChatMessage, ChatError>> + Send;

    /// Long-poll for messages newer than `since_id`.
    ///
    /// Returns immediately if such messages are already available,
    /// otherwise waits up to `timeout`. A timeout yields an empty list.
    fn retrieve_messages(
        &self,
        room_id: RoomId,
        since_id: i64,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, ChatError>> + Send;

    /// Latest message id, or [`NO_MESSAGES`].
    fn latest_message_id(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<i64, ChatError>> + Send;
}

/// Check author and content before anything is persisted.
pub fn validate_message(author: &str, content: &str, max_content_len: usize) -> Result<(), ChatError> {
    validate_username(author)?;
    if content.trim().is_empty() {
        return Err(ChatError::InvalidParameter("message must not be empty".into()));
    }
    let len = content.chars().count();
    if len > max_content_len {
        return Err(ChatError::InvalidParameter(format!(
            "message is {len} characters (max {max_content_len})"
        )));
    }
    Ok(())
}

/// Reject since-ids below the "no messages" sentinel.
pub fn validate_since(since_id: i64) -> Result<(), ChatError> {
    if since_id < NO_MESSAGES {
        return Err(ChatError::InvalidParameter(format!(
            "since_id must be >= {NO_MESSAGES}, got {since_id}"
        )));
    }
    Ok(())
}

/// Map a store failure onto the core error kinds.
pub(crate) fn store_failure(err: StoreError) -> ChatError {
    match err {
        StoreError::UnknownRoom(room_id) => ChatError::RoomNotFound(room_id),
        StoreError::DuplicateSlug(slug) => {
            ChatError::InvalidParameter(format!("slug already in use: {slug}"))
        }
        other => ChatError::PersistenceFailure(other),
    }
}
