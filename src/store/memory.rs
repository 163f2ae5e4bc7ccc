//! In-process [`MessageStore`].
//!
//! Holds everything in memory behind one mutex; state is lost on exit.
//! Tests can inject save and delete failures to drive the
//! persistence-failure paths end to end.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::{MessageStore, NewRoom, RoomRecord, StoreError};
use crate::room::{ChatMessage, NO_MESSAGES, RoomId};

#[derive(Debug)]
struct RoomRows {
    record: RoomRecord,
    messages: Vec<ChatMessage>,
    next_id: i64,
}

#[derive(Debug)]
struct Tables {
    rooms: BTreeMap<RoomId, RoomRows>,
    next_room_id: u64,
}

/// Memory-backed store.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing_saves: AtomicUsize,
    failing_deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                rooms: BTreeMap::new(),
                next_room_id: 1,
            }),
            failing_saves: AtomicUsize::new(0),
            failing_deletes: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` calls to `save_message` fail.
    #[cfg(test)]
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `delete_room` fail.
    #[cfg(test)]
    pub fn fail_next_deletes(&self, n: usize) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_injected_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    async fn create_room(&self, room: NewRoom) -> Result<RoomRecord, StoreError> {
        let mut tables = self.tables();
        if tables.rooms.values().any(|r| r.record.slug == room.slug) {
            return Err(StoreError::DuplicateSlug(room.slug));
        }
        let room_id = RoomId(tables.next_room_id);
        tables.next_room_id += 1;
        let record = RoomRecord {
            room_id,
            name: room.name,
            slug: room.slug,
            allow_anonymous: room.allow_anonymous,
        };
        tables.rooms.insert(
            room_id,
            RoomRows {
                record: record.clone(),
                messages: Vec::new(),
                next_id: 1,
            },
        );
        Ok(record)
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), StoreError> {
        if take_injected_failure(&self.failing_deletes) {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        self.tables()
            .rooms
            .remove(&room_id)
            .map(|_| ())
            .ok_or(StoreError::UnknownRoom(room_id))
    }

    async fn list_rooms(&self) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(self
            .tables()
            .rooms
            .values()
            .map(|r| r.record.clone())
            .collect())
    }

    async fn save_message(
        &self,
        room_id: RoomId,
        author: &str,
        content: &str,
        date: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables();
        let rows = tables
            .rooms
            .get_mut(&room_id)
            .ok_or(StoreError::UnknownRoom(room_id))?;
        // A failed insert still burns its id, like a database sequence.
        let id = rows.next_id;
        rows.next_id += 1;
        if take_injected_failure(&self.failing_saves) {
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        rows.messages.push(ChatMessage {
            id,
            author: author.to_string(),
            content: content.to_string(),
            date,
        });
        Ok(id)
    }

    async fn query_messages(
        &self,
        room_id: RoomId,
        since_id: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables();
        let rows = tables
            .rooms
            .get(&room_id)
            .ok_or(StoreError::UnknownRoom(room_id))?;
        Ok(rows
            .messages
            .iter()
            .filter(|m| m.id > since_id)
            .cloned()
            .collect())
    }

    async fn latest_message_id(&self, room_id: RoomId) -> Result<i64, StoreError> {
        let tables = self.tables();
        let rows = tables
            .rooms
            .get(&room_id)
            .ok_or(StoreError::UnknownRoom(room_id))?;
        Ok(rows.messages.last().map_or(NO_MESSAGES, |m| m.id))
    }
}
