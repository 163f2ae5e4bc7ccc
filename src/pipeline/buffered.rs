//! In-process handler: room ring buffers and wakeup signals.
//!
//! The ring is authoritative for the recent window; anything older is
//! reachable only through the durable store's history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{MessageHandler, store_failure, validate_message, validate_since};
use crate::room::registry::RoomRegistry;
use crate::room::{ChatError, ChatMessage, RoomId};
use crate::store::MessageStore;

pub struct BufferedHandler<S> {
    registry: Arc<RoomRegistry>,
    store: Arc<S>,
    max_content_len: usize,
}

impl<S: MessageStore> BufferedHandler<S> {
    pub fn new(registry: Arc<RoomRegistry>, store: Arc<S>, max_content_len: usize) -> Self {
        Self {
            registry,
            store,
            max_content_len,
        }
    }
}

impl<S: MessageStore> MessageHandler for BufferedHandler<S> {
    async fn handle_received(
        &self,
        room_id: RoomId,
        author: &str,
        content: &str,
        date: DateTime<Utc>,
    ) -> Result<ChatMessage, ChatError> {
        validate_message(author, content, self.max_content_len)?;
        let bundle = self.registry.get_bundle(room_id)?;

        let message = {
            let mut sequencer = bundle.lock_sequencer().await;
            // Issued before persisting: a failed save retires the id.
            let issued = sequencer.next();
            let stored = match self.store.save_message(room_id, author, content, date).await {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(room_id = %room_id, id = issued, error = %e, "message not persisted");
                    return Err(store_failure(e));
                }
            };
            // A store ahead of the sequence wins, so an id it already
            // holds is never handed out again.
            let id = if stored > issued {
                tracing::warn!(room_id = %room_id, issued, stored, "sequence behind store, catching up");
                sequencer.advance_past(stored);
                stored
            } else {
                issued
            };
            let message = ChatMessage {
                id,
                author: author.to_string(),
                content: content.to_string(),
                date,
            };
            bundle.append(message.clone());
            message
        };

        // Append is visible; now wake readers.
        bundle.new_message().fire();
        tracing::debug!(room_id = %room_id, id = message.id, "message published");
        Ok(message)
    }

    async fn retrieve_messages(
        &self,
        room_id: RoomId,
        since_id: i64,
        timeout: Duration,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        validate_since(since_id)?;
        let bundle = self.registry.get_bundle(room_id)?;

        // Register before checking so an append between the check and
        // the wait still wakes us.
        let listener = bundle.new_message().listen();
        let pending = bundle.messages_since(since_id);
        if !pending.is_empty() {
            return Ok(pending);
        }

        let wake = listener.wait(timeout).await;
        tracing::trace!(room_id = %room_id, since_id, ?wake, "retrieve woke");
        Ok(bundle.messages_since(since_id))
    }

    async fn latest_message_id(&self, room_id: RoomId) -> Result<i64, ChatError> {
        Ok(self.registry.get_bundle(room_id)?.latest_id())
    }
}
