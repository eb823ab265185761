use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

use crate::filter::FilterSet;
use crate::search::SearchQuery;

/// Case-insensitive matcher for the search needle and the active filter
/// tags. Longer needles win when they overlap.
pub fn build_highlight_regex(query: &SearchQuery, filters: &FilterSet) -> Option<Regex> {
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    let needles = std::iter::once(query.needle()).chain(filters.iter());
    for needle in needles {
        if needle.is_empty() {
            continue;
        }
        if seen.insert(needle.to_lowercase()) {
            unique.push(needle.to_string());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .into_iter()
        .map(|needle| regex::escape(&needle))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Splits `text` into runs, flagging the ones the regex matched.
pub fn split_highlights<'t>(text: &'t str, regex: Option<&Regex>) -> Vec<(&'t str, bool)> {
    let Some(re) = regex else {
        return vec![(text, false)];
    };
    let mut runs = Vec::new();
    let mut last = 0;
    for mat in re.find_iter(text) {
        if mat.start() > last {
            runs.push((&text[last..mat.start()], false));
        }
        runs.push((mat.as_str(), true));
        last = mat.end();
    }
    if last < text.len() || runs.is_empty() {
        runs.push((&text[last..], false));
    }
    runs
}
