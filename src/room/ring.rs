//! Message ring: per-room bounded buffer of recent messages.
//!
//! Backed by a `VecDeque` with the oldest message at the front. When
//! capacity is reached, the oldest message is silently evicted. Older
//! messages remain reachable only through the durable store.

use std::collections::VecDeque;

use super::{ChatMessage, NO_MESSAGES};

/// Bounded FIFO of the most recent messages in one room.
#[derive(Debug)]
pub struct MessageRing {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl MessageRing {
    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. The ring must hold at least one message.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be >= 1");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting the oldest if the ring is full.
    ///
    /// Returns the evicted message, if any. Ids must arrive in strictly
    /// increasing order; the room's send lock guarantees this.
    pub fn push(&mut self, message: ChatMessage) -> Option<ChatMessage> {
        debug_assert!(
            self.entries.back().is_none_or(|last| last.id < message.id),
            "ring ids must be strictly increasing"
        );
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);
        evicted
    }

    /// Owned copy of every buffered message, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    /// Buffered messages with id strictly greater than `since_id`, oldest first.
    pub fn since(&self, since_id: i64) -> Vec<ChatMessage> {
        // Ids are sorted, so skip the prefix instead of filtering the tail.
        let start = self.entries.partition_point(|m| m.id <= since_id);
        self.entries.range(start..).cloned().collect()
    }

    /// Highest buffered id, or [`NO_MESSAGES`] when empty.
    pub fn latest_id(&self) -> i64 {
        self.entries.back().map_or(NO_MESSAGES, |m| m.id)
    }

    /// Lowest buffered id, if any.
    pub fn oldest_id(&self) -> Option<i64> {
        self.entries.front().map(|m| m.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
