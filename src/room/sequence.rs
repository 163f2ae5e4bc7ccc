//! Per-room message id generator.

/// First id issued in every room.
pub const SEQUENCE_BASE: i64 = 1;

/// Monotonic id source for one room.
///
/// Not synchronized on its own: it lives behind the room's send lock
/// together with the ring append, so id order always matches ring order.
/// An id is never reissued, even when the message it was issued for
/// fails to persist.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: i64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self {
            next: SEQUENCE_BASE,
        }
    }

    /// Resume a room whose highest persisted id is `latest`.
    pub fn resume_after(latest: i64) -> Self {
        Self {
            next: (latest + 1).max(SEQUENCE_BASE),
        }
    }

    /// Issue the next id.
    pub fn next(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Make sure `id` is never issued again.
    pub fn advance_past(&mut self, id: i64) {
        self.next = self.next.max(id + 1);
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let mut s = SequenceGenerator::new();
        assert_eq!(s.next(), 1);
    }

    #[test]
    fn strictly_increasing() {
        let mut s = SequenceGenerator::new();
        let ids: Vec<i64> = (0..5).map(|_| s.next()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn resume_continues_after_latest() {
        let mut s = SequenceGenerator::resume_after(3);
        assert_eq!(s.next(), 4);
        let mut empty = SequenceGenerator::resume_after(-1);
        assert_eq!(empty.next(), 1);
    }

    #[test]
    fn advance_past_never_moves_backwards() {
        let mut s = SequenceGenerator::new();
        s.advance_past(7);
        assert_eq!(s.next(), 8);
        s.advance_past(2);
        assert_eq!(s.next(), 9);
    }
}
