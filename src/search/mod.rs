use crate::filter::FilterSet;
use crate::render::NoteCard;

/// Free-text search box contents. Matching is case-insensitive substring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    raw: String,
    needle: String,
}

impl SearchQuery {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let needle = raw.trim().to_lowercase();
        Self { raw, needle }
    }

    /// Exactly what was typed.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Trimmed, lowercased form used for matching.
    pub fn needle(&self) -> &str {
        &self.needle
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn push(&mut self, ch: char) {
        self.raw.push(ch);
        self.needle = self.raw.trim().to_lowercase();
    }

    pub fn pop(&mut self) -> Option<char> {
        let popped = self.raw.pop();
        self.needle = self.raw.trim().to_lowercase();
        popped
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.needle.clear();
    }

    pub fn matches(&self, search_text: &str) -> bool {
        self.is_empty() || search_text.contains(&self.needle)
    }
}

/// Whether one card passes the filter set and the query.
pub fn is_visible(card: &NoteCard, filters: &FilterSet, query: &SearchQuery) -> bool {
    let tags_match = filters.is_empty() || filters.matches(&card.tags);
    tags_match && query.matches(card.search_text())
}

/// Re-derives visibility for every card and returns how many are shown.
pub fn recompute(cards: &mut [NoteCard], filters: &FilterSet, query: &SearchQuery) -> usize {
    let mut shown = 0;
    for card in cards.iter_mut() {
        card.visible = is_visible(card, filters, query);
        if card.visible {
            shown += 1;
        }
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Note;
    use crate::registry::TagRegistry;
    use crate::render::NoteRenderer;

    fn cards() -> Vec<NoteCard> {
        let notes = vec![
            Note {
                id: 1,
                title: "Buy milk".into(),
                content: "2% please".into(),
                tags: vec!["#errand".into()],
                due_date: None,
                created_at: None,
            },
            Note {
                id: 2,
                title: "Quarterly report".into(),
                content: "Numbers for Q3".into(),
                tags: vec!["#work".into(), "#urgent".into()],
                due_date: None,
                created_at: None,
            },
            Note {
                id: 3,
                title: "Standup".into(),
                content: "daily sync".into(),
                tags: vec!["#work".into()],
                due_date: None,
                created_at: None,
            },
        ];
        NoteRenderer::default().render(&notes, &mut TagRegistry::new())
    }

    fn visible_ids(cards: &[NoteCard]) -> Vec<i64> {
        cards.iter().filter(|card| card.visible).map(|card| card.id).collect()
    }

    #[test]
    fn empty_filters_and_query_show_everything() {
        let mut cards = cards();
        let shown = recompute(&mut cards, &FilterSet::new(), &SearchQuery::default());
        assert_eq!(shown, 3);
    }

    #[test]
    fn filters_use_and_semantics() {
        let mut cards = cards();
        let filters: FilterSet = ["#work"].into_iter().collect();
        recompute(&mut cards, &filters, &SearchQuery::default());
        assert_eq!(visible_ids(&cards), vec![2, 3]);

        let filters: FilterSet = ["#work", "#urgent"].into_iter().collect();
        recompute(&mut cards, &filters, &SearchQuery::default());
        assert_eq!(visible_ids(&cards), vec![2]);
    }

    #[test]
    fn filters_naming_absent_tags_hide_everything() {
        let mut cards = cards();
        let filters: FilterSet = ["#gone"].into_iter().collect();
        assert_eq!(recompute(&mut cards, &filters, &SearchQuery::default()), 0);
    }

    #[test]
    fn query_is_case_insensitive_and_trimmed() {
        let mut cards = cards();
        recompute(&mut cards, &FilterSet::new(), &SearchQuery::new("  MILK "));
        assert_eq!(visible_ids(&cards), vec![1]);

        recompute(&mut cards, &FilterSet::new(), &SearchQuery::new("#WORK"));
        assert_eq!(visible_ids(&cards), vec![2, 3]);
    }

    #[test]
    fn filters_and_query_combine() {
        let mut cards = cards();
        let filters: FilterSet = ["#work"].into_iter().collect();
        recompute(&mut cards, &filters, &SearchQuery::new("sync"));
        assert_eq!(visible_ids(&cards), vec![3]);
    }

    #[test]
    fn query_editing_tracks_needle() {
        let mut query = SearchQuery::default();
        for ch in " Ab".chars() {
            query.push(ch);
        }
        assert_eq!(query.raw(), " Ab");
        assert_eq!(query.needle(), "ab");
        assert_eq!(query.pop(), Some('b'));
        assert_eq!(query.needle(), "a");
        query.clear();
        assert!(query.is_empty());
        assert!(query.matches("anything"));
    }
}
