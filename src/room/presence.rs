//! Presence: who has been seen in a room recently.
//!
//! [`PresenceMap`] is the per-room participant → last-seen table.
//! Stale entries are dropped lazily, only when the room's presence is
//! read; no background sweeper runs. [`PresenceTracker`] is the
//! room-addressed service the transport calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::registry::RoomRegistry;
use super::{ChatError, RoomId, validate_username};

/// Default staleness window for presence entries.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60);

/// Default long-poll window for presence listings.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(8);

/// Per-room participant table.
#[derive(Debug, Default)]
pub struct PresenceMap {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `participant` as seen at `at`.
    pub fn touch_at(&self, participant: &str, at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(participant.to_string(), at);
    }

    /// Drop entries last seen more than `staleness` before `now`, then
    /// return the survivors sorted by participant.
    ///
    /// Cleanup and read happen under one lock, so a touch can never be
    /// evicted by a cleanup working from an older view.
    pub fn list_and_clean_at(
        &self,
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(String, DateTime<Utc>)> {
        let window = chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, seen| *seen >= cutoff);

        let mut listed: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(name, seen)| (name.clone(), *seen))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Result of a presence long-poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Server time at which the listing was taken.
    pub now: DateTime<Utc>,
    pub users: Vec<(String, DateTime<Utc>)>,
    /// How long clients should wait before polling again.
    pub refresh: Duration,
}

/// Room-addressed presence operations.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    registry: Arc<RoomRegistry>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Mark `participant` as present now and wake presence pollers.
    pub fn touch(&self, room_id: RoomId, participant: &str) -> Result<(), ChatError> {
        validate_username(participant)?;
        let bundle = self.registry.get_bundle(room_id)?;
        bundle.presence().touch_at(participant, Utc::now());
        // Signal after the map update is visible.
        bundle.presence_changed().fire();
        tracing::debug!(room_id = %room_id, participant, "presence touched");
        Ok(())
    }

    /// Evict stale entries and list the rest.
    pub fn list_and_clean(
        &self,
        room_id: RoomId,
        staleness: Duration,
    ) -> Result<Vec<(String, DateTime<Utc>)>, ChatError> {
        let bundle = self.registry.get_bundle(room_id)?;
        Ok(bundle.presence().list_and_clean_at(staleness, Utc::now()))
    }

    /// Presence long-poll: record the requester, wait up to `refresh`
    /// for someone else's touch, then list.
    ///
    /// The requester is recorded without firing, so concurrent pollers
    /// do not wake each other in a loop.
    pub async fn poll(
        &self,
        room_id: RoomId,
        participant: &str,
        refresh: Duration,
        staleness: Duration,
    ) -> Result<PresenceSnapshot, ChatError> {
        validate_username(participant)?;
        let bundle = self.registry.get_bundle(room_id)?;
        bundle.presence().touch_at(participant, Utc::now());

        let wake = bundle.presence_changed().wait(refresh).await;
        tracing::trace!(room_id = %room_id, ?wake, "presence poll woke");

        let now = Utc::now();
        Ok(PresenceSnapshot {
            now,
            users: bundle.presence().list_and_clean_at(staleness, now),
            refresh,
        })
    }
}
