//! Synthetic sequence ids for venues that expose none.
//!
//! The engine's gap protocol needs `prev`, `first` and `final` ids on
//! every event. Venues without native ids get a per-adapter counter that
//! every emission advances, whether snapshot or update, so the stream the
//! engine sees forms one unbroken chain anchored at the snapshot the same
//! adapter served. Ids stay monotone and timestamp-derived, and
//! `prev + 1 == first` holds for consecutive events.

use parking_lot::Mutex;

/// Monotone id generator shared by an adapter's snapshot and update paths.
#[derive(Debug, Default)]
pub struct SyntheticSequence {
    last: Mutex<i64>,
}

/// Ids assigned to one synthesized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticIds {
    /// First update id covered by the event
    pub first: i64,
    /// Final update id covered by the event
    pub final_id: i64,
    /// Final id of the previous emission
    pub prev: i64,
}

impl SyntheticSequence {
    /// Creates a fresh sequence starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns ids to an update event observed at `now_ms`.
    pub fn next_event(&self, now_ms: i64) -> SyntheticIds {
        let mut last = self.last.lock();
        let prev = *last;
        let first = prev + 1;
        let final_id = now_ms.max(first);
        *last = final_id;
        SyntheticIds {
            first,
            final_id,
            prev,
        }
    }

    /// Assigns a sequence anchor to a snapshot taken at `now_ms`.
    pub fn anchor(&self, now_ms: i64) -> i64 {
        let mut last = self.last.lock();
        let anchor = now_ms.max(*last + 1);
        *last = anchor;
        anchor
    }
}
