//! Storage-time clock shared by the writes and pinned reads of one repository.
//!
//! | Call | Time returned |
//! |------|---------------|
//! | [`Clock::pin`] | `max(now, latest stamped write)` |
//! | [`WriteTicket::now`] | `max(now, latest pin + 1ms)` |
//!
//! A ticket holds the clock until it is dropped, so a pin never falls
//! between choosing a write's start time and persisting it. Every version
//! written after a pin therefore starts after the pinned instant.

use crate::models::Timestamp;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Marks {
    stamped: Timestamp,
    pinned: Timestamp,
}

/// Orders writes against pinned reads.
#[derive(Debug)]
pub(crate) struct Clock {
    marks: Mutex<Marks>,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            marks: Mutex::new(Marks {
                stamped: Timestamp::from_millis(i64::MIN),
                pinned: Timestamp::from_millis(i64::MIN),
            }),
        }
    }
}

impl Clock {
    // Marks are plain timestamps; a panic while holding them leaves them valid.
    fn marks(&self) -> MutexGuard<'_, Marks> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Instant for a read that spans several backend calls.
    pub(crate) fn pin(&self) -> Timestamp {
        let mut marks = self.marks();
        let at = Timestamp::now().max(marks.stamped);
        marks.pinned = marks.pinned.max(at);
        at
    }

    /// Holds the clock for one write operation.
    pub(crate) fn write(&self) -> WriteTicket<'_> {
        WriteTicket {
            marks: self.marks(),
        }
    }
}

/// Exclusive hold on the clock for the duration of one write.
pub(crate) struct WriteTicket<'c> {
    marks: MutexGuard<'c, Marks>,
}

impl WriteTicket<'_> {
    /// Earliest start time for a version written under this ticket.
    pub(crate) fn now(&self) -> Timestamp {
        Timestamp::now().max(self.marks.pinned.plus_millis(1))
    }

    /// Records the storage time of a persisted version or close-out.
    pub(crate) fn stamp(&mut self, at: Timestamp) {
        self.marks.stamped = self.marks.stamped.max(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_after_pin_starts_later() {
        let clock = Clock::default();
        let pinned = clock.pin();
        let ticket = clock.write();
        assert!(ticket.now() > pinned);
    }

    #[test]
    fn test_pin_sees_future_stamp() {
        let clock = Clock::default();
        let ahead = Timestamp::now().plus_millis(60_000);
        clock.write().stamp(ahead);
        assert_eq!(clock.pin(), ahead);
    }

    #[test]
    fn test_pin_waits_for_open_ticket() {
        let clock = Clock::default();
        let ahead = Timestamp::now().plus_millis(60_000);
        std::thread::scope(|scope| {
            let mut ticket = clock.write();
            let reader = scope.spawn(|| clock.pin());
            std::thread::sleep(std::time::Duration::from_millis(20));
            ticket.stamp(ahead);
            drop(ticket);
            assert_eq!(reader.join().unwrap(), ahead);
        });
    }
}
