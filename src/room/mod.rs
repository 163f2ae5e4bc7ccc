//! Per-room chat state: the long-poll fan-out core.
//!
//! Each room owns one [`RoomBundle`]: a bounded ring of recent messages,
//! a sequence generator, a presence map, and two edge-triggered wakeup
//! signals (new message, presence change). Bundles are created and
//! destroyed only by the [`registry::RoomRegistry`], in lockstep with
//! the room's existence in the durable store.
//!
//! Architecture: bundles share nothing. Senders for one room serialize
//! on that room's sequencer lock; readers take brief ring snapshots and
//! block only inside [`signal::WakeupSignal`] waits, which always carry a
//! timeout.

pub mod presence;
pub mod registry;
pub mod ring;
pub mod sequence;
pub mod signal;

use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::store::StoreError;
use presence::PresenceMap;
use ring::MessageRing;
use sequence::SequenceGenerator;
use signal::WakeupSignal;

/// Sentinel message id meaning "no messages yet".
pub const NO_MESSAGES: i64 = -1;

/// Default number of recent messages retained per room.
pub const DEFAULT_RING_CAPACITY: usize = 50;

/// Maximum author or participant label length, in characters.
pub const MAX_USERNAME_LEN: usize = 64;

/// Wire format for message and presence timestamps.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S:%6f";

/// Stable room identifier, assigned by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A chat message as seen by long-poll readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Per-room message id, strictly increasing in arrival order.
    pub id: i64,
    /// Authenticated username or guest label.
    pub author: String,
    pub content: String,
    /// Arrival time supplied by the transport.
    pub date: DateTime<Utc>,
}

/// Errors surfaced by the chat core.
///
/// Wait timeouts are never errors; they produce an empty result.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),
}

impl ChatError {
    /// Machine-readable reason for wire error responses.
    pub fn reason(&self) -> &'static str {
        match self {
            ChatError::RoomNotFound(_) => "room_not_found",
            ChatError::InvalidParameter(_) => "invalid_parameter",
            ChatError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

/// Check an author or participant label.
pub fn validate_username(name: &str) -> Result<(), ChatError> {
    if name.trim().is_empty() {
        return Err(ChatError::InvalidParameter("username must not be empty".into()));
    }
    if name.chars().count() > MAX_USERNAME_LEN {
        return Err(ChatError::InvalidParameter(format!(
            "username longer than {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Format a timestamp the way the wire protocol expects.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(TIME_FORMAT).to_string()
}

/// All mutable state for one room.
///
/// Internally synchronized: callers never need external locking.
#[derive(Debug)]
pub struct RoomBundle {
    id: RoomId,
    /// Held across id assignment, persistence and ring append so that
    /// concurrent sends to this room never interleave.
    sequencer: Mutex<SequenceGenerator>,
    ring: RwLock<MessageRing>,
    new_message: WakeupSignal,
    presence: PresenceMap,
    presence_changed: WakeupSignal,
}

impl RoomBundle {
    pub fn new(id: RoomId, ring_capacity: usize) -> Self {
        Self {
            id,
            sequencer: Mutex::new(SequenceGenerator::new()),
            ring: RwLock::new(MessageRing::new(ring_capacity)),
            new_message: WakeupSignal::new(),
            presence: PresenceMap::new(),
            presence_changed: WakeupSignal::new(),
        }
    }

    /// Rebuild a bundle for a room that already has persisted messages.
    ///
    /// `recent` must be oldest first; only the newest `ring_capacity`
    /// entries are kept. The sequence resumes after the last one, so no
    /// persisted id is issued again.
    pub fn restored(id: RoomId, ring_capacity: usize, recent: Vec<ChatMessage>) -> Self {
        let mut ring = MessageRing::new(ring_capacity);
        let skip = recent.len().saturating_sub(ring_capacity);
        for message in recent.into_iter().skip(skip) {
            ring.push(message);
        }
        let sequencer = SequenceGenerator::resume_after(ring.latest_id());
        if !ring.is_empty() {
            tracing::debug!(
                room_id = %id,
                buffered = ring.len(),
                latest = ring.latest_id(),
                "ring restored from store"
            );
        }
        Self {
            id,
            sequencer: Mutex::new(sequencer),
            ring: RwLock::new(ring),
            new_message: WakeupSignal::new(),
            presence: PresenceMap::new(),
            presence_changed: WakeupSignal::new(),
        }
    }

    /// Acquire the room's send lock. Only one sender per room at a time.
    pub async fn lock_sequencer(&self) -> MutexGuard<'_, SequenceGenerator> {
        self.sequencer.lock().await
    }

    /// Append a message to the ring. The write is complete (and visible
    /// to readers) when this returns, so the caller may fire afterwards.
    pub fn append(&self, message: ChatMessage) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(evicted) = ring.push(message) {
            tracing::trace!(
                room_id = %self.id,
                evicted = evicted.id,
                oldest = ?ring.oldest_id(),
                "ring full, oldest evicted"
            );
        }
    }

    /// Point-in-time copy of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Buffered messages with id strictly greater than `since_id`.
    pub fn messages_since(&self, since_id: i64) -> Vec<ChatMessage> {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .since(since_id)
    }

    /// Highest buffered id, or [`NO_MESSAGES`].
    pub fn latest_id(&self) -> i64 {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest_id()
    }

    pub fn new_message(&self) -> &WakeupSignal {
        &self.new_message
    }

    pub fn presence(&self) -> &PresenceMap {
        &self.presence
    }

    pub fn presence_changed(&self) -> &WakeupSignal {
        &self.presence_changed
    }

    /// Release every waiter on both signals and refuse further waits.
    pub(crate) fn close(&self) {
        self.new_message.close();
        self.presence_changed.close();
    }

    pub fn is_closed(&self) -> bool {
        self.new_message.is_closed()
    }
}

#[cfg(test)]
pub(crate) fn message(id: i64, author: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id,
        author: author.into(),
        content: content.into(),
        date: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bundle_has_sentinel_latest_id() {
        let b = RoomBundle::new(RoomId(1), DEFAULT_RING_CAPACITY);
        assert_eq!(b.latest_id(), NO_MESSAGES);
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn append_then_filter_since() {
        let b = RoomBundle::new(RoomId(1), 4);
        b.append(message(1, "john", "a"));
        b.append(message(2, "paul", "b"));
        b.append(message(3, "john", "c"));
        let ids: Vec<i64> = b.messages_since(1).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(b.latest_id(), 3);
    }

    #[test]
    fn restored_bundle_keeps_tail_and_resumes_ids() {
        let stored: Vec<ChatMessage> = (1..=6).map(|id| message(id, "john", "x")).collect();
        let b = RoomBundle::restored(RoomId(1), 4, stored);
        let ids: Vec<i64> = b.snapshot().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
        assert_eq!(b.latest_id(), 6);
    }

    #[tokio::test]
    async fn restored_sequence_starts_after_stored_ids() {
        let b = RoomBundle::restored(RoomId(1), 4, vec![message(9, "john", "x")]);
        assert_eq!(b.lock_sequencer().await.next(), 10);

        let empty = RoomBundle::restored(RoomId(2), 4, Vec::new());
        assert_eq!(empty.lock_sequencer().await.next(), 1);
        assert_eq!(empty.latest_id(), NO_MESSAGES);
    }

    #[test]
    fn close_marks_bundle_closed() {
        let b = RoomBundle::new(RoomId(7), 4);
        assert!(!b.is_closed());
        b.close();
        assert!(b.is_closed());
        assert!(b.presence_changed().is_closed());
    }

    #[test]
    fn error_reasons_are_stable() {
        assert_eq!(ChatError::RoomNotFound(RoomId(1)).reason(), "room_not_found");
        assert_eq!(
            ChatError::InvalidParameter("x".into()).reason(),
            "invalid_parameter"
        );
        assert_eq!(
            ChatError::PersistenceFailure(StoreError::Unavailable("down".into())).reason(),
            "persistence_failure"
        );
    }

    #[test]
    fn date_format_has_microseconds() {
        let d = DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(format_date(&d), "2023-11-14T22:13:20:123456");
    }
}
