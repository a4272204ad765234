//! In-memory session event log, adapted from the teacher's
//! `history_v2.rs` and scoped down to a single daemon lifetime — §6
//! "Persisted state: None across a daemon restart" rules out the
//! teacher's on-disk JSON-per-session store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Created,
    Attached,
    Detached,
    Killed,
    Crashed,
    Renamed { from: Option<String>, to: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: u32,
    pub event: SessionEvent,
    pub timestamp: DateTime<Utc>,
}

/// A ring of the most recent events across all sessions this daemon has
/// ever hosted. Bounded so a long-running daemon doesn't grow unbounded
/// memory for a feature that's advisory (`mux history`).
#[derive(Default)]
pub struct SessionHistory {
    entries: std::collections::VecDeque<HistoryEntry>,
    capacity: usize,
}

impl SessionHistory {
    pub fn new(capacity: usize) -> Self {
        SessionHistory {
            entries: std::collections::VecDeque::new(),
            capacity,
        }
    }

    pub fn record(&mut self, session_id: u32, event: SessionEvent) {
        self.entries.push_back(HistoryEntry {
            session_id,
            event,
            timestamp: Utc::now(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn for_session(&self, session_id: u32) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.session_id == session_id).collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<&HistoryEntry> {
        self.entries.iter().rev().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_capacity() {
        let mut h = SessionHistory::new(3);
        for i in 0..5 {
            h.record(i, SessionEvent::Created);
        }
        assert_eq!(h.recent(10).len(), 3);
    }

    #[test]
    fn filters_by_session() {
        let mut h = SessionHistory::new(10);
        h.record(1, SessionEvent::Created);
        h.record(2, SessionEvent::Created);
        h.record(1, SessionEvent::Detached);
        assert_eq!(h.for_session(1).len(), 2);
    }
}
