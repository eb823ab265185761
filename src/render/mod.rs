use crate::model::{format_due_date, Note, NoteId};
use crate::registry::TagRegistry;

pub const DEFAULT_EXCERPT_CHARS: usize = 220;

/// View-model for one rendered note.
///
/// The markup fields are escaped and ready to drop into HTML; the plain
/// fields feed terminal and CLI adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteCard {
    pub id: NoteId,
    pub title: String,
    pub title_html: String,
    pub excerpt: String,
    pub excerpt_html: String,
    pub body: String,
    pub body_html: String,
    pub due_label: Option<String>,
    pub tags: Vec<String>,
    pub expanded: bool,
    pub editing: bool,
    pub visible: bool,
    search_text: String,
}

impl NoteCard {
    /// Lowercased title, body and tag labels: what the search box matches.
    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|held| held == tag)
    }

    /// Excerpt while collapsed, full body when expanded.
    pub fn display_body(&self) -> &str {
        if self.expanded {
            &self.body
        } else {
            &self.excerpt
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoteRenderer {
    excerpt_chars: usize,
}

impl Default for NoteRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_EXCERPT_CHARS)
    }
}

impl NoteRenderer {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    pub fn excerpt_chars(&self) -> usize {
        self.excerpt_chars
    }

    pub fn build_card(&self, note: &Note) -> NoteCard {
        let excerpt = excerpt(&note.content, self.excerpt_chars);
        let search_text = std::iter::once(note.title.as_str())
            .chain(std::iter::once(note.content.as_str()))
            .chain(note.tags.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();
        NoteCard {
            id: note.id,
            title: note.title.clone(),
            title_html: escape_html(&note.title),
            excerpt_html: nl2br(&escape_html(&excerpt)),
            excerpt,
            body: note.content.clone(),
            body_html: nl2br(&escape_html(&note.content)),
            due_label: note
                .due_date
                .map(|date| format!("Due date: {}", format_due_date(date))),
            tags: note.tags.clone(),
            expanded: false,
            editing: false,
            visible: true,
            search_text,
        }
    }

    /// Replaces every card and registry entry with a fresh projection of
    /// `notes`, registering each card's tags in input order.
    pub fn render(&self, notes: &[Note], registry: &mut TagRegistry) -> Vec<NoteCard> {
        registry.clear();
        notes
            .iter()
            .map(|note| {
                let card = self.build_card(note);
                for tag in &card.tags {
                    registry.register(tag, card.id);
                }
                card
            })
            .collect()
    }
}

/// Drops a card's tags from the registry ahead of its removal.
pub fn unregister_card(card: &NoteCard, registry: &mut TagRegistry) {
    for tag in &card.tags {
        if registry.unregister(tag, card.id).is_none() {
            tracing::debug!(note_id = card.id, %tag, "tag was not registered for card");
        }
    }
}

pub fn excerpt(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn nl2br(raw: &str) -> String {
    raw.replace('\n', "<br>")
}
