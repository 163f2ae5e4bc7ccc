//! Publish/subscribe handler: the durable store is authoritative, a
//! process-wide topic announces which room changed.
//!
//! Message ids are the store's persisted ids. The room bundle is still
//! consulted for existence and for removal, so readers blocked on a
//! deleted room are released like in the buffered variant.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{MessageHandler, store_failure, validate_message, validate_since};
use crate::room::registry::RoomRegistry;
use crate::room::{ChatError, ChatMessage, RoomId};
use crate::store::MessageStore;

/// Topic depth. Lagging subscribers re-query, so overflow is harmless.
const TOPIC_CAPACITY: usize = 256;

pub struct PubSubHandler<S> {
    registry: Arc<RoomRegistry>,
    store: Arc<S>,
    max_content_len: usize,
    topic: broadcast::Sender<RoomId>,
}

impl<S: MessageStore> PubSubHandler<S> {
    pub fn new(registry: Arc<RoomRegistry>, store: Arc<S>, max_content_len: usize) -> Self {
        let (topic, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            registry,
            store,
            max_content_len,
            topic,
        }
    }
}

impl<S: MessageStore> MessageHandler for PubSubHandler<S> {
    async fn handle_received(
        &self,
        room_id: RoomId,
        author: &str,
        content: &str,
        date: DateTime<Utc>,
    ) -> Result<ChatMessage, ChatError> {
        validate_message(author, content, self.max_content_len)?;
        // Existence check only; the store sequences and stores.
        self.registry.get_bundle(room_id)?;

        let id = match self.store.save_message(room_id, author, content, date).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "message not persisted");
                return Err(store_failure(e));
            }
        };

        // Publish after the row is committed. No subscribers is fine.
        let _ = self.topic.send(room_id);
        tracing::debug!(room_id = %room_id, id, "message published to topic");

        Ok(ChatMessage {
            id,
            author: author.to_string(),
            content: content.to_string(),
            date,
        })
    }

    async fn retrieve_messages(
        &self,
        room_id: RoomId,
        since_id: i64,
        timeout: Duration,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        validate_since(since_id)?;
        let bundle = self.registry.get_bundle(room_id)?;

        // Subscribe before querying so a publish in between is not lost.
        let mut rx = self.topic.subscribe();
        let closed = bundle.new_message().listen();

        let pending = self
            .store
            .query_messages(room_id, since_id)
            .await
            .map_err(store_failure)?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        tokio::select! {
            wake = closed.wait(timeout) => {
                tracing::trace!(room_id = %room_id, ?wake, "retrieve woke without publish");
            }
            () = next_publish_for(&mut rx, room_id) => {
                tracing::trace!(room_id = %room_id, "retrieve woke on publish");
            }
        }

        self.store
            .query_messages(room_id, since_id)
            .await
            .map_err(store_failure)
    }

    async fn latest_message_id(&self, room_id: RoomId) -> Result<i64, ChatError> {
        self.registry.get_bundle(room_id)?;
        self.store
            .latest_message_id(room_id)
            .await
            .map_err(store_failure)
    }
}

/// Resolve on the next publish naming `room_id`, or when we may have
/// missed one.
async fn next_publish_for(rx: &mut broadcast::Receiver<RoomId>, room_id: RoomId) {
    loop {
        match rx.recv().await {
            Ok(published) if published == room_id => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(room_id = %room_id, skipped, "topic lagged, re-querying");
                return;
            }
            // The handler owns the sender; closure means shutdown.
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewRoom;
    use crate::store::memory::MemoryStore;
    use tokio::time::Instant;

    const LONG: Duration = Duration::from_secs(10);

    async fn setup() -> (Arc<PubSubHandler<MemoryStore>>, Arc<RoomRegistry>, Arc<MemoryStore>, RoomId, RoomId) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new(50));
        let mut ids = Vec::new();
        for slug in ["a", "b"] {
            let id = store
                .create_room(NewRoom {
                    name: slug.into(),
                    slug: slug.into(),
                    allow_anonymous: false,
                })
                .await
                .unwrap()
                .room_id;
            registry.ensure_room(id);
            ids.push(id);
        }
        let handler = Arc::new(PubSubHandler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            100,
        ));
        (handler, registry, store, ids[0], ids[1])
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn ids_come_from_store() {
        let (h, _, store, a, _) = setup().await;
        assert_eq!(h.latest_message_id(a).await.unwrap(), -1);
        let m = h.handle_received(a, "john", "ABCD", now()).await.unwrap();
        assert_eq!(m.id, 1);
        assert_eq!(store.latest_message_id(a).await.unwrap(), 1);
        assert_eq!(h.latest_message_id(a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_messages_return_immediately() {
        let (h, _, _, a, _) = setup().await;
        h.handle_received(a, "john", "one", now()).await.unwrap();
        h.handle_received(a, "john", "two", now()).await.unwrap();
        let start = Instant::now();
        let got = h.retrieve_messages(a, 1, LONG).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "two");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn publish_wakes_reader() {
        let (h, _, _, a, _) = setup().await;
        let reader = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.retrieve_messages(a, -1, LONG).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.handle_received(a, "john", "hello", now()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("publish must wake the reader")
            .unwrap()
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "hello");
    }

    #[tokio::test]
    async fn publish_to_other_room_does_not_release_reader() {
        let (h, _, _, a, b) = setup().await;
        let reader = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.retrieve_messages(a, -1, Duration::from_millis(150)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.handle_received(b, "john", "elsewhere", now()).await.unwrap();

        let start = Instant::now();
        let got = reader.await.unwrap().unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn persistence_failure_not_published() {
        let (h, _, store, a, _) = setup().await;
        store.fail_next_saves(1);
        assert!(matches!(
            h.handle_received(a, "john", "x", now()).await,
            Err(ChatError::PersistenceFailure(_))
        ));
        assert_eq!(h.latest_message_id(a).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn removal_releases_reader() {
        let (h, registry, _, a, _) = setup().await;
        let reader = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.retrieve_messages(a, -1, Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.remove_room(a).unwrap();
        let released = tokio::time::timeout(Duration::from_secs(1), reader).await;
        assert!(released.is_ok(), "reader must not hang after removal");
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (h, _, _, _, _) = setup().await;
        assert!(matches!(
            h.handle_received(RoomId(42), "john", "x", now()).await,
            Err(ChatError::RoomNotFound(_))
        ));
    }
}
