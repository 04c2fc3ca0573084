//! Shared append-only event log with independent read cursors.
//!
//! # Offsets
//! ```text
//!   base                 min cursor                     end
//!    │   tombstoned        │     live entries             │
//!    ▼                     ▼                              ▼
//!    [ - ][ - ][ - ][ - ][ E ][ E ][ E ][ E ][ E ][ E ]
//! ```
//! Offsets are absolute and never reused, so dropping the tombstoned
//! prefix only moves `base`; cursors are never rewritten.
//!
//! # Invariants
//! - An entry at or after the minimum registered cursor is never touched
//! - Entries are immutable once appended, apart from tombstoning

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::{Revision, WatchEvent};

/// Tombstoned prefix length that triggers a physical drop.
pub const DROP_THRESHOLD: usize = 100;

/// Identifier of a registered consumer.
pub type WatcherId = u64;

/// Out-of-band signal published by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerSignal {
    /// History before `revision` is gone; consumers must reload.
    Compacted { revision: Revision },
    /// The store's revision went backwards to `revision`.
    Restarted { revision: Revision },
    /// The worker is shutting down.
    Exiting,
}

/// One log entry: a decoded watch batch or a broker signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Batch {
        revision: Revision,
        events: Vec<WatchEvent>,
    },
    Signal(BrokerSignal),
}

struct Registration {
    cursor: u64,
    notify: mpsc::Sender<()>,
}

/// The log itself. Guarded by the broker's mutex.
pub struct EventLog {
    entries: VecDeque<Option<Arc<LogEntry>>>,
    /// Absolute offset of `entries[0]`.
    base: u64,
    /// Number of leading entries already tombstoned.
    tombstoned: usize,
    registrations: HashMap<WatcherId, Registration>,
    next_id: WatcherId,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            base: 0,
            tombstoned: 0,
            registrations: HashMap::new(),
            next_id: 1,
        }
    }

    /// Absolute offset one past the newest entry.
    pub fn end(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    /// Absolute offset of the oldest retained slot.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Slots physically held, tombstones included.
    pub fn retained(&self) -> usize {
        self.entries.len()
    }

    /// Register a consumer; its cursor starts at the current tail.
    pub fn register(&mut self, notify: mpsc::Sender<()>) -> (WatcherId, u64) {
        let id = self.next_id;
        self.next_id += 1;
        let cursor = self.end();
        self.registrations.insert(id, Registration { cursor, notify });
        (id, cursor)
    }

    pub fn unregister(&mut self, id: WatcherId) {
        if self.registrations.remove(&id).is_some() {
            self.compact();
        }
    }

    /// Append an entry and post every consumer's wait handle.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        let offset = self.end();
        self.entries.push_back(Some(Arc::new(entry)));
        for registration in self.registrations.values() {
            // A full slot already means "something is pending".
            let _ = registration.notify.try_send(());
        }
        offset
    }

    /// Live entries from `cursor` to the tail, with their offsets.
    pub fn read_from(&self, cursor: u64) -> Vec<(u64, Arc<LogEntry>)> {
        let start = cursor.max(self.base);
        (start..self.end())
            .filter_map(|offset| {
                let slot = self.entries.get((offset - self.base) as usize)?;
                slot.as_ref().map(|entry| (offset, entry.clone()))
            })
            .collect()
    }

    /// Move a consumer's cursor forward and compact behind the slowest one.
    pub fn advance(&mut self, id: WatcherId, to: u64) {
        let end = self.end();
        if let Some(registration) = self.registrations.get_mut(&id) {
            if to > registration.cursor {
                registration.cursor = to.min(end);
            }
        }
        self.compact();
    }

    /// Smallest cursor across consumers, or the tail when none are registered.
    pub fn min_cursor(&self) -> u64 {
        self.registrations
            .values()
            .map(|r| r.cursor)
            .min()
            .unwrap_or_else(|| self.end())
    }

    fn compact(&mut self) {
        let min = self.min_cursor();
        let consumed = (min.saturating_sub(self.base) as usize).min(self.entries.len());

        for slot in self.entries.iter_mut().take(consumed).skip(self.tombstoned) {
            *slot = None;
        }
        self.tombstoned = self.tombstoned.max(consumed);

        if self.tombstoned > DROP_THRESHOLD {
            self.entries.drain(..self.tombstoned);
            self.base += self.tombstoned as u64;
            self.tombstoned = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(revision: Revision) -> LogEntry {
        LogEntry::Batch {
            revision,
            events: Vec::new(),
        }
    }

    fn register(log: &mut EventLog) -> (WatcherId, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        let (id, _) = log.register(tx);
        (id, rx)
    }

    #[test]
    fn test_append_and_read() {
        let mut log = EventLog::new();
        let (id, mut rx) = register(&mut log);

        log.append(batch(5));
        log.append(batch(6));
        assert!(rx.try_recv().is_ok());
        // Single slot: second post coalesced.
        assert!(rx.try_recv().is_err());

        let entries = log.read_from(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, 1);

        log.advance(id, 2);
        assert!(log.read_from(2).is_empty());
    }

    #[test]
    fn test_compaction_respects_slowest_cursor() {
        let mut log = EventLog::new();
        let (fast, _rx1) = register(&mut log);
        let (slow, _rx2) = register(&mut log);

        for rev in 0..300 {
            log.append(batch(rev));
        }

        log.advance(fast, 300);
        log.advance(slow, 250);

        // Everything the slow reader has not consumed is intact.
        let pending = log.read_from(250);
        assert_eq!(pending.len(), 50);
        assert_eq!(pending[0].0, 250);
        assert!(log.base() <= 250);
        assert!(log.retained() <= 50 + DROP_THRESHOLD);
    }

    #[test]
    fn test_tombstones_before_drop() {
        let mut log = EventLog::new();
        let (id, _rx) = register(&mut log);

        for rev in 0..10 {
            log.append(batch(rev));
        }
        log.advance(id, 5);

        // Below the drop threshold: slots are tombstoned but still held.
        assert_eq!(log.base(), 0);
        assert_eq!(log.retained(), 10);
        assert_eq!(log.read_from(0).len(), 5);
        assert_eq!(log.read_from(0)[0].0, 5);
    }

    #[test]
    fn test_unregister_releases_entries() {
        let mut log = EventLog::new();
        let (active, _rx1) = register(&mut log);
        let (stalled, _rx2) = register(&mut log);

        for rev in 0..(DROP_THRESHOLD as i64 + 20) {
            log.append(batch(rev));
        }
        log.advance(active, log.end());
        assert_eq!(log.base(), 0);

        log.unregister(stalled);
        assert_eq!(log.base(), log.end());
        assert_eq!(log.retained(), 0);
    }

    #[test]
    fn test_late_registration_starts_at_tail() {
        let mut log = EventLog::new();
        log.append(batch(1));
        let (tx, _rx) = mpsc::channel(1);
        let (_, cursor) = log.register(tx);
        assert_eq!(cursor, 1);
    }
}
