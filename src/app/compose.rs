use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::model::{canonical_tag, format_due_date, parse_due_date, Note, NoteDraft, NoteId, NotePatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeMode {
    #[default]
    Idle,
    Editing(NoteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter)]
pub enum ComposeField {
    #[default]
    Title,
    #[strum(to_string = "Body")]
    Content,
    #[strum(to_string = "Due date")]
    DueDate,
    #[strum(to_string = "Tag")]
    Tag,
}

impl ComposeField {
    pub fn next(self) -> Self {
        let all: Vec<_> = Self::iter().collect();
        let index = all.iter().position(|field| *field == self).unwrap_or(0);
        all[(index + 1) % all.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("due date must look like YYYY-MM-DD, got {0:?}")]
    InvalidDueDate(String),
}

/// What a submit turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Create(NoteDraft),
    Update { id: NoteId, patch: NotePatch },
}

/// Compose area state. One form serves both new notes and edits.
#[derive(Debug, Clone, Default)]
pub struct ComposeForm {
    mode: ComposeMode,
    pub focus: ComposeField,
    pub title: String,
    pub content: String,
    pub due_date: String,
    pub tag_input: String,
    staged_tags: Vec<String>,
    chip_cursor: Option<usize>,
}

impl ComposeForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ComposeMode {
        self.mode
    }

    pub fn editing_id(&self) -> Option<NoteId> {
        match self.mode {
            ComposeMode::Editing(id) => Some(id),
            ComposeMode::Idle => None,
        }
    }

    pub fn staged_tags(&self) -> &[String] {
        &self.staged_tags
    }

    /// Loads `note` into the form, replacing any edit in progress.
    pub fn begin_edit(&mut self, note: &Note) {
        if let Some(previous) = self.editing_id().filter(|id| *id != note.id) {
            tracing::debug!(previous, note_id = note.id, "switching edited note");
        }
        *self = Self {
            mode: ComposeMode::Editing(note.id),
            focus: ComposeField::Title,
            title: note.title.clone(),
            content: note.content.clone(),
            due_date: note.due_date.map(format_due_date).unwrap_or_default(),
            tag_input: String::new(),
            staged_tags: note.tags.clone(),
            chip_cursor: None,
        };
    }

    /// Back to `Idle` with every field cleared.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Stages the tag input. Returns the tag when it was newly staged; the
    /// input is cleared either way.
    pub fn stage_tag(&mut self) -> Option<String> {
        let input = std::mem::take(&mut self.tag_input);
        let tag = canonical_tag(&input)?;
        if self.staged_tags.contains(&tag) {
            return None;
        }
        self.staged_tags.push(tag.clone());
        Some(tag)
    }

    pub fn unstage_tag(&mut self, tag: &str) -> bool {
        let before = self.staged_tags.len();
        self.staged_tags.retain(|staged| staged != tag);
        self.clamp_chip_cursor();
        self.staged_tags.len() != before
    }

    pub fn pop_staged(&mut self) -> Option<String> {
        let popped = self.staged_tags.pop();
        self.clamp_chip_cursor();
        popped
    }

    /// Index of the staged tag picked for removal, if any.
    pub fn selected_chip(&self) -> Option<usize> {
        self.chip_cursor
    }

    /// Walks the chip cursor over the staged tags. Moving left from the input
    /// picks the last chip; moving right past the last chip returns to the input.
    pub fn move_chip_cursor(&mut self, delta: isize) {
        let len = self.staged_tags.len();
        if len == 0 {
            self.chip_cursor = None;
            return;
        }
        self.chip_cursor = match (self.chip_cursor, delta.signum()) {
            (None, -1) => Some(len - 1),
            (None, _) => None,
            (Some(index), -1) => Some(index.saturating_sub(1)),
            (Some(index), 1) if index + 1 >= len => None,
            (Some(index), 1) => Some(index + 1),
            (cursor, _) => cursor,
        };
    }

    /// Unstages the chip under the cursor. The cursor stays on the same slot.
    pub fn unstage_selected(&mut self) -> Option<String> {
        let index = self.chip_cursor.filter(|index| *index < self.staged_tags.len())?;
        let tag = self.staged_tags.remove(index);
        self.clamp_chip_cursor();
        Some(tag)
    }

    fn clamp_chip_cursor(&mut self) {
        let len = self.staged_tags.len();
        self.chip_cursor = match self.chip_cursor {
            Some(_) if len == 0 => None,
            Some(index) => Some(index.min(len - 1)),
            None => None,
        };
    }

    pub fn focused_text(&mut self) -> &mut String {
        match self.focus {
            ComposeField::Title => &mut self.title,
            ComposeField::Content => &mut self.content,
            ComposeField::DueDate => &mut self.due_date,
            ComposeField::Tag => &mut self.tag_input,
        }
    }

    pub fn insert_char(&mut self, ch: char) {
        self.chip_cursor = None;
        self.focused_text().push(ch);
    }

    /// Removes the last grapheme of the focused field. On an empty tag field
    /// the selected chip goes, or the last staged tag when none is selected.
    pub fn backspace(&mut self) {
        if self.focus == ComposeField::Tag && self.unstage_selected().is_some() {
            return;
        }
        if self.focus == ComposeField::Tag && self.tag_input.is_empty() {
            self.pop_staged();
            return;
        }
        let text = self.focused_text();
        if let Some((offset, _)) = text.grapheme_indices(true).next_back() {
            text.truncate(offset);
        }
    }

    pub fn focus_next(&mut self) {
        self.chip_cursor = None;
        self.focus = self.focus.next();
    }

    /// Validates the form and builds the backend call.
    ///
    /// `Ok(None)` means there is nothing to submit yet: the title or body is
    /// blank. A pending tag in the input is staged first.
    pub fn prepare(&mut self) -> Result<Option<Submission>, ComposeError> {
        if !self.tag_input.trim().is_empty() {
            self.stage_tag();
        }
        let title = self.title.trim();
        let content = self.content.trim();
        if title.is_empty() || content.is_empty() {
            return Ok(None);
        }
        let due_raw = self.due_date.trim();
        let due_date = if due_raw.is_empty() {
            None
        } else {
            Some(parse_due_date(due_raw).ok_or_else(|| ComposeError::InvalidDueDate(due_raw.to_string()))?)
        };
        let draft = NoteDraft {
            title: title.to_string(),
            content: content.to_string(),
            tags: self.staged_tags.clone(),
            due_date,
        };
        Ok(Some(match self.mode {
            ComposeMode::Idle => Submission::Create(draft),
            ComposeMode::Editing(id) => Submission::Update {
                id,
                patch: NotePatch::from(draft),
            },
        }))
    }
}
