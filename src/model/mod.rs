use indexmap::IndexSet;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub type NoteId = i64;
pub type UserId = i64;

/// A note as the client sees it: a read-only copy of the backend row.
///
/// Decoding is forgiving. Missing or malformed `tags` become an
/// empty list, the body may arrive as `content`, `body` or `description`, and
/// an unparsable due date is dropped instead of failing the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawNote")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    #[serde(serialize_with = "serialize_due_date")]
    pub due_date: Option<Date>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// Fields for a note that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub due_date: Option<Date>,
}

/// Partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<Option<Date>>,
}

impl From<NoteDraft> for NotePatch {
    fn from(draft: NoteDraft) -> Self {
        Self {
            title: Some(draft.title),
            content: Some(draft.content),
            tags: Some(draft.tags),
            due_date: Some(draft.due_date),
        }
    }
}

#[derive(Deserialize)]
struct RawNote {
    id: NoteId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Value,
    #[serde(default)]
    due_date: Value,
    #[serde(default)]
    created_at: Value,
}

impl From<RawNote> for Note {
    fn from(raw: RawNote) -> Self {
        let content = raw
            .content
            .or(raw.body)
            .or(raw.description)
            .unwrap_or_default();
        Note {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            content,
            tags: tags_from_value(&raw.tags),
            due_date: raw.due_date.as_str().and_then(parse_due_date),
            created_at: timestamp_from_value(&raw.created_at),
        }
    }
}

/// Canonical tag form: a single leading `#` followed by the trimmed name.
///
/// Returns `None` when nothing is left after stripping.
pub fn canonical_tag(raw: &str) -> Option<String> {
    let name = raw.trim().trim_start_matches('#').trim();
    if name.is_empty() {
        None
    } else {
        Some(format!("#{name}"))
    }
}

/// Canonicalise and deduplicate, keeping first-occurrence order.
pub fn canonical_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|tag| canonical_tag(tag.as_ref()))
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Tags from an arbitrary JSON value. Arrays are used as-is, strings are
/// treated as serialized arrays, everything else is no tags at all.
pub fn tags_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => canonical_tags(items.iter().filter_map(Value::as_str)),
        Value::String(raw) => tags_from_json(raw),
        _ => Vec::new(),
    }
}

pub fn tags_from_json(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => canonical_tags(items.iter().filter_map(Value::as_str)),
        Ok(_) => Vec::new(),
        Err(err) => {
            tracing::debug!(%err, "ignoring unparsable tag payload");
            Vec::new()
        }
    }
}

pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub fn parse_due_date(input: &str) -> Option<Date> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    Date::parse(trimmed, format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_due_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

fn timestamp_from_value(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::String(raw) => OffsetDateTime::parse(raw, &Rfc3339).ok(),
        Value::Number(secs) => secs
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        _ => None,
    }
}

fn serialize_due_date<S: Serializer>(date: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
    match date {
        Some(date) => serializer.serialize_some(&format_due_date(*date)),
        None => serializer.serialize_none(),
    }
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &Option<OffsetDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match timestamp.and_then(|ts| ts.format(&Rfc3339).ok()) {
        Some(formatted) => serializer.serialize_some(&formatted),
        None => serializer.serialize_none(),
    }
}

/// Decode a list payload. Anything that is not an array is an empty list,
/// and individual entries that cannot be read as notes are skipped.
pub fn notes_from_value(value: Value) -> Vec<Note> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match Note::deserialize(item) {
            Ok(note) => Some(note),
            Err(err) => {
                tracing::warn!(%err, "skipping malformed note entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn canonical_tag_collapses_hash_prefixes() {
        assert_eq!(canonical_tag("work").as_deref(), Some("#work"));
        assert_eq!(canonical_tag("#work").as_deref(), Some("#work"));
        assert_eq!(canonical_tag("  ##work ").as_deref(), Some("#work"));
        assert_eq!(canonical_tag("#"), None);
        assert_eq!(canonical_tag("   "), None);
    }

    #[test]
    fn canonical_tags_dedupes_in_first_seen_order() {
        let tags = canonical_tags(["b", "#a", "#b", "a", "c"]);
        assert_eq!(tags, vec!["#b", "#a", "#c"]);
    }

    #[test]
    fn null_tags_decode_as_empty() {
        let note: Note = serde_json::from_value(json!({
            "id": 1,
            "title": "t",
            "content": "c",
            "tags": null
        }))
        .expect("decode");
        assert!(note.tags.is_empty());
    }

    #[test]
    fn non_sequence_tags_decode_as_empty() {
        let note: Note =
            serde_json::from_value(json!({"id": 1, "title": "t", "tags": 42})).expect("decode");
        assert!(note.tags.is_empty());

        let note: Note =
            serde_json::from_value(json!({"id": 2, "title": "t", "tags": "not json"}))
                .expect("decode");
        assert!(note.tags.is_empty());
    }

    #[test]
    fn stringified_tag_arrays_are_parsed() {
        let note: Note = serde_json::from_value(json!({
            "id": 1,
            "title": "t",
            "tags": "[\"#work\", \"errand\", 3]"
        }))
        .expect("decode");
        assert_eq!(note.tags, vec!["#work", "#errand"]);
    }

    #[test]
    fn body_aliases_resolve_first_present() {
        let note: Note = serde_json::from_value(json!({
            "id": 1,
            "title": "t",
            "body": "from body",
            "description": "from description"
        }))
        .expect("decode");
        assert_eq!(note.content, "from body");

        let note: Note = serde_json::from_value(json!({
            "id": 2,
            "content": null,
            "description": "only description"
        }))
        .expect("decode");
        assert_eq!(note.content, "only description");
        assert_eq!(note.title, "");
    }

    #[test]
    fn due_date_and_created_at_are_lenient() {
        let note: Note = serde_json::from_value(json!({
            "id": 1,
            "title": "t",
            "due_date": "2024-05-01",
            "created_at": 1_700_000_000
        }))
        .expect("decode");
        assert_eq!(note.due_date, Some(date!(2024 - 05 - 01)));
        assert_eq!(
            note.created_at.map(|ts| ts.unix_timestamp()),
            Some(1_700_000_000)
        );

        let note: Note = serde_json::from_value(json!({
            "id": 2,
            "due_date": "next tuesday",
            "created_at": "2024-01-02T03:04:05Z"
        }))
        .expect("decode");
        assert_eq!(note.due_date, None);
        assert!(note.created_at.is_some());
    }

    #[test]
    fn list_payload_skips_broken_entries() {
        let notes = notes_from_value(json!([
            {"id": 1, "title": "ok"},
            {"title": "no id"},
            {"id": 3, "title": "also ok", "tags": ["x"]}
        ]));
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].tags, vec!["#x"]);
        assert!(notes_from_value(json!({"message": "Not logged in"})).is_empty());
    }

    #[test]
    fn note_serializes_dates_as_text() {
        let note = Note {
            id: 7,
            title: "Buy milk".into(),
            content: "2% please".into(),
            tags: vec!["#errand".into()],
            due_date: Some(date!(2024 - 02 - 29)),
            created_at: None,
        };
        let value = serde_json::to_value(&note).expect("serialize");
        assert_eq!(value["due_date"], json!("2024-02-29"));
        assert_eq!(value["created_at"], Value::Null);
    }
}
