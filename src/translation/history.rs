/*!
 * Context history ring.
 *
 * Holds the most recent `(source, translation, speaker)` triples in the
 * order they were translated. History-aware engines read it; only the
 * orchestrator writes to it.
 */

use std::collections::VecDeque;

/// One translated unit remembered as context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub source: String,
    pub translation: String,
    pub speaker: Option<String>,
}

impl HistoryEntry {
    pub fn new(source: impl Into<String>, translation: impl Into<String>, speaker: Option<String>) -> Self {
        Self {
            source: source.into(),
            translation: translation.into(),
            speaker,
        }
    }
}

/// Bounded, oldest-first-evicting sequence of history entries
#[derive(Debug, Clone)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, evicting the oldest once over capacity
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Forget everything, e.g. at a scene boundary
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Entries oldest to newest as one contiguous slice
    pub fn entries(&mut self) -> &[HistoryEntry] {
        self.entries.make_contiguous()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
