//! Broker state: configuration, room lifecycle, shared collaborators.
//!
//! Shared by every connection task behind an `Arc`. Nothing here needs
//! a broker-wide lock: rooms synchronize internally and the store is
//! its own synchronization domain.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::pipeline::{
    DEFAULT_MAX_CONTENT_LEN, HandlerKind, MessageHandler, store_failure, validate_since,
};
use crate::room::presence::{DEFAULT_REFRESH, DEFAULT_STALENESS, PresenceTracker};
use crate::room::registry::RoomRegistry;
use crate::room::{ChatError, ChatMessage, DEFAULT_RING_CAPACITY, NO_MESSAGES, RoomId};
use crate::store::{MessageStore, NewRoom, RoomRecord};

/// Maximum room display name length, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// Upper bound on a single message long-poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\w]+$").expect("slug pattern is valid"));

/// Daemon configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub handler: HandlerKind,
    pub ring_capacity: usize,
    pub max_content_len: usize,
    /// Longest a `get_messages` request may block.
    pub poll_timeout: Duration,
    pub presence_refresh: Duration,
    pub presence_staleness: Duration,
    /// Overrides `$XDG_RUNTIME_DIR/chatroomd/broker.sock`.
    pub socket_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            handler: HandlerKind::default(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            presence_refresh: DEFAULT_REFRESH,
            presence_staleness: DEFAULT_STALENESS,
            socket_path: None,
        }
    }
}

/// Everything a request needs: rooms, store, handler and presence.
pub struct BrokerState<H, S> {
    registry: Arc<RoomRegistry>,
    store: Arc<S>,
    handler: H,
    presence: PresenceTracker,
    config: BrokerConfig,
}

impl<H: MessageHandler, S: MessageStore> BrokerState<H, S> {
    /// `handler` must have been built over the same `registry` and `store`.
    pub fn new(config: BrokerConfig, registry: Arc<RoomRegistry>, store: Arc<S>, handler: H) -> Self {
        let presence = PresenceTracker::new(Arc::clone(&registry));
        Self {
            registry,
            store,
            handler,
            presence,
            config,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Give every stored room a bundle. Returns how many were provisioned.
    ///
    /// Rooms that already hold messages get their ring and sequence
    /// seeded from the store, so ids keep increasing across restarts.
    pub async fn provision_all(&self) -> Result<usize, ChatError> {
        let rooms = self.store.list_rooms().await.map_err(store_failure)?;
        for room in &rooms {
            if self.registry.contains(room.room_id) {
                continue;
            }
            let recent = self
                .store
                .query_messages(room.room_id, NO_MESSAGES)
                .await
                .map_err(store_failure)?;
            self.registry.restore_room(room.room_id, recent);
        }
        Ok(rooms.len())
    }

    /// Persist a room, then provision it before answering.
    pub async fn create_room(
        &self,
        name: &str,
        slug: &str,
        allow_anonymous: bool,
    ) -> Result<RoomRecord, ChatError> {
        validate_room(name, slug)?;
        let record = self
            .store
            .create_room(NewRoom {
                name: name.to_string(),
                slug: slug.to_string(),
                allow_anonymous,
            })
            .await
            .map_err(store_failure)?;
        self.registry.ensure_room(record.room_id);
        Ok(record)
    }

    /// Drop the room from the store, then release its waiters.
    ///
    /// A store failure leaves the bundle in place, so the room stays
    /// usable and the delete can be retried.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.store.delete_room(room_id).await.map_err(store_failure)?;
        if self.registry.remove_room(room_id).is_err() {
            tracing::debug!(room_id = %room_id, "deleted room had no bundle");
        }
        Ok(())
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomRecord>, ChatError> {
        self.store.list_rooms().await.map_err(store_failure)
    }

    /// Durable history newer than `since_id`, beyond the ring window.
    pub async fn history(&self, room_id: RoomId, since_id: i64) -> Result<Vec<ChatMessage>, ChatError> {
        validate_since(since_id)?;
        self.registry.get_bundle(room_id)?;
        self.store
            .query_messages(room_id, since_id)
            .await
            .map_err(store_failure)
    }

    /// Clamp a client-requested wait to the configured poll timeout.
    pub fn poll_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) => Duration::from_millis(ms).min(self.config.poll_timeout),
            None => self.config.poll_timeout,
        }
    }

    /// Wake every blocked reader; used at shutdown.
    pub fn close_all(&self) {
        self.registry.close_all();
    }
}

fn validate_room(name: &str, slug: &str) -> Result<(), ChatError> {
    let len = name.trim().chars().count();
    if len == 0 || len > MAX_ROOM_NAME_LEN {
        return Err(ChatError::InvalidParameter(format!(
            "room name must be 1..={MAX_ROOM_NAME_LEN} characters"
        )));
    }
    if !SLUG.is_match(slug) {
        return Err(ChatError::InvalidParameter(format!("invalid slug: {slug:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buffered::BufferedHandler;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;

    type State = BrokerState<BufferedHandler<MemoryStore>, MemoryStore>;

    fn state_over(store: Arc<MemoryStore>, config: BrokerConfig) -> State {
        let registry = Arc::new(RoomRegistry::new(config.ring_capacity));
        let handler = BufferedHandler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.max_content_len,
        );
        BrokerState::new(config, registry, store, handler)
    }

    fn fresh() -> State {
        state_over(Arc::new(MemoryStore::new()), BrokerConfig::default())
    }

    #[test]
    fn config_defaults() {
        let c = BrokerConfig::default();
        assert_eq!(c.handler, HandlerKind::Buffered);
        assert_eq!(c.ring_capacity, 50);
        assert_eq!(c.max_content_len, 5000);
        assert_eq!(c.poll_timeout, Duration::from_secs(20));
        assert_eq!(c.presence_refresh, Duration::from_secs(8));
        assert_eq!(c.presence_staleness, Duration::from_secs(60));
        assert!(c.socket_path.is_none());
    }

    #[tokio::test]
    async fn create_room_is_immediately_usable() {
        let s = fresh();
        let room = s.create_room("Lobby", "lobby", true).await.unwrap();
        assert!(s.registry().contains(room.room_id));
        let msg = s
            .handler()
            .handle_received(room.room_id, "john", "ABCD", Utc::now())
            .await
            .unwrap();
        assert_eq!(msg.id, 1);
    }

    #[tokio::test]
    async fn create_room_validates_name_and_slug() {
        let s = fresh();
        for (name, slug) in [("", "ok"), ("Lobby", "has space"), ("Lobby", ""), ("Lobby", "a/b")] {
            assert!(
                matches!(
                    s.create_room(name, slug, false).await,
                    Err(ChatError::InvalidParameter(_))
                ),
                "{name:?} / {slug:?} should be rejected"
            );
        }
        let long = "n".repeat(MAX_ROOM_NAME_LEN + 1);
        assert!(s.create_room(&long, "long", false).await.is_err());
        assert!(s.create_room("Dev-Chat", "dev-chat_2", false).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_slug_is_invalid_parameter() {
        let s = fresh();
        s.create_room("One", "same", false).await.unwrap();
        assert!(matches!(
            s.create_room("Two", "same", false).await,
            Err(ChatError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn delete_room_removes_everywhere() {
        let s = fresh();
        let room = s.create_room("Lobby", "lobby", false).await.unwrap().room_id;
        s.delete_room(room).await.unwrap();
        assert!(!s.registry().contains(room));
        assert!(s.list_rooms().await.unwrap().is_empty());
        assert!(matches!(
            s.delete_room(room).await,
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn provision_all_restores_stored_rooms() {
        let store = Arc::new(MemoryStore::new());
        for slug in ["a", "b", "c"] {
            store
                .create_room(NewRoom {
                    name: slug.into(),
                    slug: slug.into(),
                    allow_anonymous: false,
                })
                .await
                .unwrap();
        }
        let s = state_over(store, BrokerConfig::default());
        assert!(s.registry().room_ids().is_empty());
        assert_eq!(s.provision_all().await.unwrap(), 3);
        assert_eq!(s.registry().room_ids().len(), 3);
    }

    #[tokio::test]
    async fn provision_all_resumes_ids_after_stored_messages() {
        let store = Arc::new(MemoryStore::new());
        let room = store
            .create_room(NewRoom {
                name: "Lobby".into(),
                slug: "lobby".into(),
                allow_anonymous: false,
            })
            .await
            .unwrap()
            .room_id;
        for i in 1..=3 {
            store
                .save_message(room, "john", &format!("old{i}"), Utc::now())
                .await
                .unwrap();
        }

        let s = state_over(Arc::clone(&store), BrokerConfig::default());
        s.provision_all().await.unwrap();
        assert_eq!(s.handler().latest_message_id(room).await.unwrap(), 3);

        let msg = s
            .handler()
            .handle_received(room, "paul", "new", Utc::now())
            .await
            .unwrap();
        assert_eq!(msg.id, 4, "stored ids must not be reissued");

        let since_three = s
            .handler()
            .retrieve_messages(room, 3, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(since_three, vec![msg]);

        let history: Vec<i64> = s.history(room, -1).await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(history, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn provision_all_keeps_only_ring_tail() {
        let store = Arc::new(MemoryStore::new());
        let room = store
            .create_room(NewRoom {
                name: "Lobby".into(),
                slug: "lobby".into(),
                allow_anonymous: false,
            })
            .await
            .unwrap()
            .room_id;
        for i in 1..=5 {
            store
                .save_message(room, "john", &format!("m{i}"), Utc::now())
                .await
                .unwrap();
        }
        let config = BrokerConfig {
            ring_capacity: 2,
            ..BrokerConfig::default()
        };
        let s = state_over(store, config);
        s.provision_all().await.unwrap();
        let ring: Vec<i64> = s
            .registry()
            .get_bundle(room)
            .unwrap()
            .snapshot()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ring, vec![4, 5]);
    }

    #[tokio::test]
    async fn failed_store_delete_keeps_room_live_and_retryable() {
        let store = Arc::new(MemoryStore::new());
        let s = state_over(Arc::clone(&store), BrokerConfig::default());
        let room = s.create_room("Lobby", "lobby", false).await.unwrap().room_id;

        store.fail_next_deletes(1);
        assert!(matches!(
            s.delete_room(room).await,
            Err(ChatError::PersistenceFailure(_))
        ));
        assert!(s.registry().contains(room), "bundle must survive a failed delete");
        assert_eq!(s.list_rooms().await.unwrap().len(), 1);
        s.handler()
            .handle_received(room, "john", "still here", Utc::now())
            .await
            .unwrap();

        s.delete_room(room).await.unwrap();
        assert!(!s.registry().contains(room));
        assert!(s.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_room_without_bundle_clears_store() {
        let store = Arc::new(MemoryStore::new());
        let room = store
            .create_room(NewRoom {
                name: "Orphan".into(),
                slug: "orphan".into(),
                allow_anonymous: false,
            })
            .await
            .unwrap()
            .room_id;
        let s = state_over(store, BrokerConfig::default());
        assert!(!s.registry().contains(room));
        s.delete_room(room).await.unwrap();
        assert!(s.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_reaches_beyond_ring() {
        let config = BrokerConfig {
            ring_capacity: 3,
            ..BrokerConfig::default()
        };
        let s = state_over(Arc::new(MemoryStore::new()), config);
        let room = s.create_room("Lobby", "lobby", false).await.unwrap().room_id;
        for i in 1..=5 {
            s.handler()
                .handle_received(room, "john", &format!("m{i}"), Utc::now())
                .await
                .unwrap();
        }
        assert_eq!(s.registry().get_bundle(room).unwrap().snapshot().len(), 3);
        let all = s.history(room, -1).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(s.history(room, 3).await.unwrap().len(), 2);
        assert!(matches!(
            s.history(RoomId(99), -1).await,
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[test]
    fn poll_timeout_is_clamped() {
        let s = fresh();
        assert_eq!(s.poll_timeout(None), Duration::from_secs(20));
        assert_eq!(s.poll_timeout(Some(250)), Duration::from_millis(250));
        assert_eq!(s.poll_timeout(Some(600_000)), Duration::from_secs(20));
    }
}
