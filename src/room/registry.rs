//! Room registry: owns one [`RoomBundle`] per live room.
//!
//! The map lock is held only to insert, remove, or clone out an
//! `Arc<RoomBundle>`; it is never held while a caller waits or persists,
//! so no lock spans more than one room's work.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{ChatError, ChatMessage, RoomBundle, RoomId};

/// Registry of per-room bundles.
///
/// Constructed explicitly at startup and shared by handle.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<RoomBundle>>>,
    ring_capacity: usize,
}

impl RoomRegistry {
    /// # Panics
    ///
    /// Panics if `ring_capacity` is 0.
    pub fn new(ring_capacity: usize) -> Self {
        assert!(ring_capacity >= 1, "ring buffer capacity must be >= 1");
        Self {
            rooms: RwLock::new(HashMap::new()),
            ring_capacity,
        }
    }

    /// Create the room's bundle if absent. Idempotent.
    ///
    /// Returns the (new or existing) bundle.
    pub fn ensure_room(&self, room_id: RoomId) -> Arc<RoomBundle> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let bundle = rooms.entry(room_id).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "room provisioned");
            Arc::new(RoomBundle::new(room_id, self.ring_capacity))
        });
        Arc::clone(bundle)
    }

    /// Provision a room that already has persisted messages, seeding its
    /// ring and sequence from `recent` (oldest first).
    ///
    /// An existing bundle is left untouched and returned.
    pub fn restore_room(&self, room_id: RoomId, recent: Vec<ChatMessage>) -> Arc<RoomBundle> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let bundle = rooms.entry(room_id).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "room provisioned");
            Arc::new(RoomBundle::restored(room_id, self.ring_capacity, recent))
        });
        Arc::clone(bundle)
    }

    /// Remove the room's bundle and release everyone waiting on it.
    ///
    /// Tasks still holding the bundle finish against it; new lookups fail.
    pub fn remove_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        let removed = self
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&room_id);
        let bundle = removed.ok_or(ChatError::RoomNotFound(room_id))?;
        bundle.close();
        tracing::info!(room_id = %room_id, "room removed");
        Ok(())
    }

    /// Look up a room's bundle.
    pub fn get_bundle(&self, room_id: RoomId) -> Result<Arc<RoomBundle>, ChatError> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&room_id)
            .cloned()
            .ok_or(ChatError::RoomNotFound(room_id))
    }

    pub fn contains(&self, room_id: RoomId) -> bool {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&room_id)
    }

    /// Ids of every provisioned room, ascending.
    #[cfg(test)]
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Drop every bundle, releasing all waiters. Used at shutdown.
    pub fn close_all(&self) {
        let drained: Vec<Arc<RoomBundle>> = self
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, bundle)| bundle)
            .collect();
        for bundle in &drained {
            bundle.close();
        }
        tracing::debug!(count = drained.len(), "all rooms closed");
    }
}
