//! Per-branch navigation log
//!
//! A bounded list of visited entries plus a cursor. Navigating away from a
//! position that is not the tail abandons the forward entries ("smart
//! branching"), the same way a browser's back/forward stack behaves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of entries kept per branch.
pub const MAX_HISTORY_ENTRIES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

/// Options for [`HistoryTrack::record`] callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// The url change came from a breadcrumb jump; the cursor already moved.
    pub is_breadcrumb_nav: bool,
}

/// What a call to [`HistoryTrack::record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Breadcrumb navigation, nothing touched.
    Skipped,
    /// Same url as the cursor entry; only its title was refreshed.
    TitleRefreshed,
    Appended {
        /// Forward entries dropped because the cursor was not at the tail.
        truncated: usize,
        /// Oldest entries dropped to stay within the cap.
        evicted: usize,
    },
}

/// Snapshot of a branch's history for the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub history: Vec<HistoryEntry>,
    pub history_index: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHistory", into = "RawHistory")]
pub struct HistoryTrack {
    entries: Vec<HistoryEntry>,
    cursor: Option<usize>,
}

/// Wire shape. A missing `index` comes from records written before the cursor
/// was persisted and means "at the last entry".
#[derive(Clone, Serialize, Deserialize)]
struct RawHistory {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
    #[serde(default)]
    index: Option<i64>,
}

impl From<RawHistory> for HistoryTrack {
    fn from(raw: RawHistory) -> Self {
        HistoryTrack::restore(raw.entries, raw.index)
    }
}

impl From<HistoryTrack> for RawHistory {
    fn from(track: HistoryTrack) -> Self {
        let index = Some(track.index());
        RawHistory {
            entries: track.entries,
            index,
        }
    }
}

impl HistoryTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a track from stored parts, repairing the cursor if needed.
    ///
    /// `None` (legacy) points at the last entry; out-of-range values are
    /// clamped into `[-1, len - 1]`.
    pub fn restore(mut entries: Vec<HistoryEntry>, index: Option<i64>) -> Self {
        if entries.len() > MAX_HISTORY_ENTRIES {
            let excess = entries.len() - MAX_HISTORY_ENTRIES;
            entries.drain(..excess);
        }

        let last = entries.len().checked_sub(1);
        let cursor = match (index, last) {
            (_, None) => None,
            (None, last) => last,
            // A non-empty log always has a cursor
            (Some(i), Some(_)) if i < 0 => Some(0),
            (Some(i), Some(last)) => Some((i as usize).min(last)),
        };

        Self { entries, cursor }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursor position, `-1` when the log is empty.
    pub fn index(&self) -> i64 {
        self.cursor.map(|c| c as i64).unwrap_or(-1)
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut HistoryEntry> {
        self.entries.last_mut()
    }

    /// Record a navigation to `url`.
    pub fn record(
        &mut self,
        url: &str,
        title: &str,
        at: DateTime<Utc>,
        options: HistoryOptions,
    ) -> RecordOutcome {
        if options.is_breadcrumb_nav {
            return RecordOutcome::Skipped;
        }

        if let Some(cursor) = self.cursor {
            if let Some(entry) = self.entries.get_mut(cursor) {
                if entry.url == url {
                    entry.title = title.to_string();
                    return RecordOutcome::TitleRefreshed;
                }
            }
        }

        let truncated = match self.cursor {
            Some(cursor) if cursor + 1 < self.entries.len() => {
                let dropped = self.entries.len() - (cursor + 1);
                self.entries.truncate(cursor + 1);
                dropped
            }
            _ => 0,
        };

        self.entries.push(HistoryEntry {
            url: url.to_string(),
            title: title.to_string(),
            timestamp: at,
        });
        let mut cursor = self.entries.len() - 1;

        let evicted = self.entries.len().saturating_sub(MAX_HISTORY_ENTRIES);
        if evicted > 0 {
            self.entries.drain(..evicted);
            cursor -= evicted;
        }
        self.cursor = Some(cursor);

        RecordOutcome::Appended { truncated, evicted }
    }

    /// Move the cursor to `index` without touching the log.
    pub fn navigate_to(&mut self, index: usize) -> Option<&HistoryEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.cursor = Some(index);
        self.entries.get(index)
    }

    pub fn view(&self) -> HistoryView {
        HistoryView {
            history: self.entries.clone(),
            history_index: self.index(),
        }
    }
}
