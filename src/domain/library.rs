//! Library entries and the local mirror that deduplicates them by cursor.

use serde::{Deserialize, Serialize};

/// A saved animation. The cursor is its only identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub cursor: String,
    pub lottie_url: String,
    pub json_url: String,
    pub created_by_first_name: String,
}

/// Client-side mirror of the remote library.
///
/// Saves upsert by cursor (last write wins) so replayed or repeated saves
/// never produce duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Library {
    entries: Vec<LibraryEntry>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry with the same cursor.
    /// Returns true when the cursor was new.
    pub fn upsert(&mut self, entry: LibraryEntry) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.cursor == entry.cursor) {
            *existing = entry;
            false
        } else {
            self.entries.push(entry);
            true
        }
    }

    /// Remove by cursor. Removing an unknown cursor is a no-op.
    pub fn remove(&mut self, cursor: &str) -> Option<LibraryEntry> {
        let position = self.entries.iter().position(|e| e.cursor == cursor)?;
        Some(self.entries.remove(position))
    }

    pub fn get(&self, cursor: &str) -> Option<&LibraryEntry> {
        self.entries.iter().find(|e| e.cursor == cursor)
    }

    pub fn contains(&self, cursor: &str) -> bool {
        self.get(cursor).is_some()
    }

    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
