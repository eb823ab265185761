use indexmap::IndexMap;
use unicode_width::UnicodeWidthStr;

use crate::model::NoteId;

/// Gap between two entries when the registry is laid out on one line.
const ENTRY_GAP: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub tag: String,
    pub active: bool,
    holders: Vec<NoteId>,
}

impl RegistryEntry {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            active: false,
            holders: Vec::new(),
        }
    }

    /// Number of rendered cards carrying this tag.
    pub fn count(&self) -> usize {
        self.holders.len()
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.tag, self.count())
    }
}

/// Aggregated view of every tag on the rendered cards.
///
/// Entries keep display order: first registration appends, selecting a
/// filter promotes the entry to the front. An entry exists exactly as long
/// as at least one rendered card holds its tag.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    entries: IndexMap<String, RegistryEntry>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one occurrence of `tag` on `note_id` and returns the new count.
    pub fn register(&mut self, tag: &str, note_id: NoteId) -> usize {
        let entry = self
            .entries
            .entry(tag.to_string())
            .or_insert_with(|| RegistryEntry::new(tag));
        entry.holders.push(note_id);
        entry.count()
    }

    /// Drops one occurrence held by `note_id`.
    ///
    /// Returns the remaining count, or `None` when the note did not hold the
    /// tag. The entry disappears when its count reaches zero.
    pub fn unregister(&mut self, tag: &str, note_id: NoteId) -> Option<usize> {
        let entry = self.entries.get_mut(tag)?;
        let position = entry.holders.iter().position(|holder| *holder == note_id)?;
        entry.holders.remove(position);
        let remaining = entry.count();
        if remaining == 0 {
            self.entries.shift_remove(tag);
        }
        Some(remaining)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn count(&self, tag: &str) -> usize {
        self.entries.get(tag).map(RegistryEntry::count).unwrap_or(0)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&RegistryEntry> {
        self.entries.get(tag)
    }

    pub fn get_index(&self, index: usize) -> Option<&RegistryEntry> {
        self.entries.get_index(index).map(|(_, entry)| entry)
    }

    pub fn position(&self, tag: &str) -> Option<usize> {
        self.entries.get_index_of(tag)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highlights or un-highlights an entry. Missing entries are ignored.
    pub fn set_active(&mut self, tag: &str, active: bool) {
        if let Some(entry) = self.entries.get_mut(tag) {
            entry.active = active;
        }
    }

    /// Moves the entry to the front of the display order.
    pub fn promote(&mut self, tag: &str) {
        if let Some(index) = self.entries.get_index_of(tag) {
            self.entries.move_index(index, 0);
        }
    }

    /// Display width of every label laid out on a single line.
    pub fn line_width(&self) -> usize {
        let labels: usize = self
            .entries
            .values()
            .map(|entry| entry.label().width())
            .sum();
        labels + ENTRY_GAP * self.entries.len().saturating_sub(1)
    }

    /// Whether the entries overflow a row of `available` columns.
    pub fn needs_scroll(&self, available: usize) -> bool {
        !self.entries.is_empty() && self.line_width() > available
    }
}
