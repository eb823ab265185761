use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use indexmap::IndexSet;

/// Key under which the active filter set is persisted.
pub const FILTER_STORAGE_KEY: &str = "todo_active_filters_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterToggle {
    Added,
    Removed,
}

/// Active tag filters. Matching is AND: a note passes when it carries
/// every tag in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    tags: IndexSet<String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, tag: &str) -> FilterToggle {
        if self.tags.shift_remove(tag) {
            FilterToggle::Removed
        } else {
            self.tags.insert(tag.to_string());
            FilterToggle::Added
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    /// True when `note_tags` is a superset of the filter set.
    pub fn matches<S: AsRef<str>>(&self, note_tags: &[S]) -> bool {
        self.tags
            .iter()
            .all(|wanted| note_tags.iter().any(|tag| tag.as_ref() == wanted))
    }

    fn to_json(&self) -> Result<String> {
        let tags: Vec<&str> = self.iter().collect();
        serde_json::to_string(&tags).context("serializing filter set")
    }

    fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => Self {
                tags: items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_string)
                    .collect(),
            },
            Ok(_) => {
                tracing::warn!("stored filter entry is not an array; starting with no filters");
                Self::default()
            }
            Err(err) => {
                tracing::warn!(%err, "stored filter entry is not valid JSON; starting with no filters");
                Self::default()
            }
        }
    }
}

impl<S: Into<String>> FromIterator<S> for FilterSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Durable string key/value storage on the client side.
pub trait PreferenceStore {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Key/value pairs kept in one small JSON file.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        // A corrupt file is replaced rather than blocking every later write.
        let mut items = self.read_all().unwrap_or_default();
        items.insert(key.to_string(), value.to_string());
        let serialized = serde_json::to_string_pretty(&items).context("serializing preferences")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        file.write_all(serialized.as_bytes())
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        file.sync_all().ok();
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// In-process store, used when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    items: RefCell<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Rc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_item(key, value)
    }
}

/// The filter set plus its persistence.
///
/// Every mutation writes the whole set back synchronously. Write failures
/// are logged and swallowed; the in-memory set stays authoritative.
pub struct FilterState {
    set: FilterSet,
    store: Box<dyn PreferenceStore>,
}

impl std::fmt::Debug for FilterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterState").field("set", &self.set).finish()
    }
}

impl FilterState {
    /// Reads the persisted set. Missing or unreadable entries give an empty set.
    pub fn load(store: Box<dyn PreferenceStore>) -> Self {
        let set = match store.get_item(FILTER_STORAGE_KEY) {
            Ok(Some(raw)) => FilterSet::from_json(&raw),
            Ok(None) => FilterSet::default(),
            Err(err) => {
                tracing::warn!(?err, "could not read stored filters");
                FilterSet::default()
            }
        };
        tracing::debug!(filters = set.len(), "loaded tag filters");
        Self { set, store }
    }

    pub fn set(&self) -> &FilterSet {
        &self.set
    }

    pub fn toggle(&mut self, tag: &str) -> FilterToggle {
        let outcome = self.set.toggle(tag);
        self.persist();
        outcome
    }

    pub fn clear(&mut self) {
        self.set.clear();
        self.persist();
    }

    fn persist(&self) {
        let result = self
            .set
            .to_json()
            .and_then(|json| self.store.set_item(FILTER_STORAGE_KEY, &json));
        if let Err(err) = result {
            tracing::warn!(?err, "failed to persist tag filters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct BrokenStore;

    impl PreferenceStore for BrokenStore {
        fn get_item(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("storage unavailable")
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[test]
    fn toggle_twice_restores_set() {
        let mut set: FilterSet = ["#work"].into_iter().collect();
        let before = set.clone();
        assert_eq!(set.toggle("#urgent"), FilterToggle::Added);
        assert_eq!(set.toggle("#urgent"), FilterToggle::Removed);
        assert_eq!(set, before);
    }

    #[test]
    fn matching_requires_every_filter() {
        let set: FilterSet = ["#work", "#urgent"].into_iter().collect();
        assert!(set.matches(&["#urgent", "#home", "#work"]));
        assert!(!set.matches(&["#work"]));
        assert!(FilterSet::new().matches::<&str>(&[]));
    }

    #[test]
    fn toggles_are_persisted_as_json_array() -> Result<()> {
        let memory = Rc::new(MemoryPreferenceStore::new());
        let mut state = FilterState::load(Box::new(memory.clone()));
        state.toggle("#work");
        state.toggle("#urgent");
        assert_eq!(
            memory.get_item(FILTER_STORAGE_KEY)?.as_deref(),
            Some(r##"["#work","#urgent"]"##)
        );

        let reloaded = FilterState::load(Box::new(memory.clone()));
        assert_eq!(reloaded.set(), state.set());
        Ok(())
    }

    #[test]
    fn persistence_failures_are_swallowed() {
        let mut state = FilterState::load(Box::new(BrokenStore));
        assert!(state.set().is_empty());
        assert_eq!(state.toggle("#work"), FilterToggle::Added);
        assert!(state.set().contains("#work"));
        state.clear();
        assert!(state.set().is_empty());
    }

    #[test]
    fn non_array_entries_load_as_empty() -> Result<()> {
        let memory = Rc::new(MemoryPreferenceStore::new());
        memory.set_item(FILTER_STORAGE_KEY, r##"{"tag":"#work"}"##)?;
        assert!(FilterState::load(Box::new(memory.clone())).set().is_empty());
        memory.set_item(FILTER_STORAGE_KEY, "not json")?;
        assert!(FilterState::load(Box::new(memory)).set().is_empty());
        Ok(())
    }

    #[test]
    fn file_store_round_trips_and_keeps_other_keys() -> Result<()> {
        let temp = TempDir::new()?;
        let store = FilePreferenceStore::new(temp.path().join("state/local_storage.json"));
        assert_eq!(store.get_item(FILTER_STORAGE_KEY)?, None);
        store.set_item("other", "1")?;
        store.set_item(FILTER_STORAGE_KEY, r##"["#a"]"##)?;
        assert_eq!(store.get_item("other")?.as_deref(), Some("1"));
        assert_eq!(store.get_item(FILTER_STORAGE_KEY)?.as_deref(), Some(r##"["#a"]"##));
        Ok(())
    }

    #[test]
    fn file_store_recovers_from_corrupt_file() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("local_storage.json");
        fs::write(&path, "{{{")?;
        let store = FilePreferenceStore::new(&path);
        assert!(store.get_item(FILTER_STORAGE_KEY).is_err());
        store.set_item(FILTER_STORAGE_KEY, "[]")?;
        assert_eq!(store.get_item(FILTER_STORAGE_KEY)?.as_deref(), Some("[]"));
        Ok(())
    }
}
