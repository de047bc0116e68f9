//! Sliding window admission.
//!
//! History is a chronological list of admitted message timestamps. Records
//! are pruned lazily: each decision drops everything that has left the
//! window and counts what remains.

use serde::{Deserialize, Serialize};

/// One admitted message, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    pub timestamp: i64,
}

impl TimestampRecord {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }
}

/// Outcome of a window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The message fits. `history` is the pruned history with the new
    /// record appended, ready to be stored.
    Admit { history: Vec<TimestampRecord> },
    /// The source already has `active` messages in the window.
    Reject { active: usize },
}

/// A quota of `max_messages` per `window_millis`, both non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindow {
    max_messages: u64,
    window_millis: i64,
}

impl SlidingWindow {
    pub(crate) fn new(max_messages: u64, window_millis: u64) -> Self {
        Self {
            max_messages,
            window_millis: i64::try_from(window_millis).unwrap_or(i64::MAX),
        }
    }

    pub fn max_messages(&self) -> u64 {
        self.max_messages
    }

    pub fn window_millis(&self) -> i64 {
        self.window_millis
    }

    /// Whether a record is still inside the window at `now`. A record
    /// exactly one window old has expired.
    pub fn is_active(&self, record: &TimestampRecord, now: i64) -> bool {
        now.saturating_sub(record.timestamp) < self.window_millis
    }

    /// Decide on a new message at `now` given the stored history.
    pub fn decide(&self, mut history: Vec<TimestampRecord>, now: i64) -> Decision {
        history.retain(|record| self.is_active(record, now));

        if (history.len() as u64) < self.max_messages {
            history.push(TimestampRecord::new(now));
            Decision::Admit { history }
        } else {
            Decision::Reject {
                active: history.len(),
            }
        }
    }
}
