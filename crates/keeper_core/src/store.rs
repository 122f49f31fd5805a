use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{Category, DraftError, Record, RecordDraft, RecordId};
use crate::view::{self, View, ViewQuery};

/// Key under which the record set is persisted.
pub const STORAGE_KEY: &str = "memorykeeper_events";

/// Minimal string key-value storage the record set is persisted into.
pub trait KeyValueBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    /// Moves the value under `key` to `<key>.corrupt-<stamp>` and returns
    /// the new location. The original key is left empty.
    fn set_aside(&self, key: &str, stamp: &str) -> Result<String>;
}

fn aside_key(key: &str, stamp: &str) -> String {
    format!("{key}.corrupt-{stamp}")
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("unable to read {}", path.display())),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("unable to create {}", self.dir.display()))?;
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("unable to write {}", path.display()))
    }

    fn set_aside(&self, key: &str, stamp: &str) -> Result<String> {
        let from = self.path_for(key);
        let to = self.path_for(&aside_key(key, stamp));
        fs::rename(&from, &to).with_context(|| {
            format!("unable to move {} to {}", from.display(), to.display())
        })?;
        Ok(to.display().to_string())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let backend = Self::default();
        backend.entries.write().insert(key.to_string(), value.into());
        backend
    }
}

impl KeyValueBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_aside(&self, key: &str, stamp: &str) -> Result<String> {
        let mut entries = self.entries.write();
        let target = aside_key(key, stamp);
        if let Some(value) = entries.remove(key) {
            entries.insert(target.clone(), value);
        }
        Ok(target)
    }
}

impl<T: KeyValueBackend + ?Sized> KeyValueBackend for Arc<T> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        (**self).write(key, value)
    }

    fn set_aside(&self, key: &str, stamp: &str) -> Result<String> {
        (**self).set_aside(key, stamp)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("records have not been loaded yet")]
    NotLoaded,
    #[error("no record with id `{0}`")]
    NotFound(RecordId),
    #[error(transparent)]
    Invalid(#[from] DraftError),
    #[error("storage backend failed: {0:#}")]
    Backend(anyhow::Error),
    #[error("unable to encode records: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Immutable, insertion-ordered record set with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: Vec<Record>,
}

impl RecordSet {
    /// Builds a set, keeping the first record for each id.
    fn from_records_lossy(records: Vec<Record>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|record| {
                let fresh = seen.insert(record.id.clone());
                if !fresh {
                    warn!(id = %record.id, "dropping record with duplicate id");
                }
                fresh
            })
            .collect();
        Self { records }
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|record| &record.id == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Stored records were read.
    Loaded(usize),
    /// Nothing was stored; the example records were written.
    Seeded,
    /// Stored data could not be decoded and was replaced by the examples.
    Recovered,
}

/// First half of a delete. Only [`RecordStore::confirm_removal`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingRemoval {
    id: RecordId,
    title: String,
}

impl PendingRemoval {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Example records written on first run.
pub fn seed_records() -> Vec<Record> {
    let mut records = Vec::with_capacity(2);
    if let Some(date) = NaiveDate::from_ymd_opt(1975, 5, 20) {
        records.push(
            Record::new(RecordId::new("1"), "示例: 妈妈生日", date, Category::Birthday)
                .with_notes("喜欢花"),
        );
    }
    if let Some(date) = NaiveDate::from_ymd_opt(2020, 10, 1) {
        records.push(
            Record::new(
                RecordId::new("2"),
                "示例: 结婚纪念日",
                date,
                Category::Anniversary,
            )
            .with_notes("三周年"),
        );
    }
    records
}

/// Owns the record set for a session. Every mutation persists the new set
/// and hands back the resulting snapshot; callers rebuild their view from
/// it.
pub struct RecordStore {
    backend: Box<dyn KeyValueBackend>,
    key: String,
    snapshot: RwLock<Option<Arc<RecordSet>>>,
}

impl RecordStore {
    pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
        Self::with_key(backend, STORAGE_KEY)
    }

    pub fn with_key(backend: impl KeyValueBackend + 'static, key: impl Into<String>) -> Self {
        Self {
            backend: Box::new(backend),
            key: key.into(),
            snapshot: RwLock::new(None),
        }
    }

    /// Reads the stored set. Absent or undecodable data falls back to the
    /// example records, which are written back immediately. Undecodable
    /// data is first moved aside under a timestamped key so it can be
    /// repaired by hand.
    pub fn load(&self) -> StoreResult<LoadOutcome> {
        let stored = self.backend.read(&self.key).map_err(StoreError::Backend)?;
        let mut slot = self.snapshot.write();

        let (set, outcome) = match stored {
            None => {
                info!(key = %self.key, "no stored records, seeding examples");
                (RecordSet::from_records_lossy(seed_records()), LoadOutcome::Seeded)
            }
            Some(raw) => match serde_json::from_str::<Vec<Record>>(&raw) {
                Ok(records) => {
                    let set = RecordSet::from_records_lossy(records);
                    let count = set.len();
                    info!(key = %self.key, count, "records loaded");
                    *slot = Some(Arc::new(set));
                    return Ok(LoadOutcome::Loaded(count));
                }
                Err(err) => {
                    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
                    let aside = self
                        .backend
                        .set_aside(&self.key, &stamp)
                        .map_err(StoreError::Backend)?;
                    warn!(
                        key = %self.key,
                        %err,
                        moved_to = %aside,
                        "stored records are corrupt, falling back to examples"
                    );
                    (RecordSet::from_records_lossy(seed_records()), LoadOutcome::Recovered)
                }
            },
        };

        self.persist(&set)?;
        *slot = Some(Arc::new(set));
        Ok(outcome)
    }

    /// Current snapshot, `None` before [`RecordStore::load`].
    pub fn snapshot(&self) -> Option<Arc<RecordSet>> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.snapshot
            .read()
            .as_ref()
            .and_then(|set| set.get(id).cloned())
    }

    /// View over the current snapshot, `None` before the first load.
    pub fn view(&self, query: &ViewQuery, today: NaiveDate) -> Option<View> {
        self.snapshot()
            .map(|set| view::build_view(set.iter(), query, today))
    }

    /// Creates a record with a fresh id. The new record is the snapshot's
    /// last element.
    pub fn add(&self, draft: RecordDraft) -> StoreResult<Arc<RecordSet>> {
        let record = draft.into_record(RecordId::generate())?;
        self.mutate(|records| {
            debug!(id = %record.id, "adding record");
            records.push(record);
            Ok(())
        })
    }

    /// Replaces the record's fields in place, keeping its id and position.
    pub fn update(&self, id: &RecordId, draft: RecordDraft) -> StoreResult<Arc<RecordSet>> {
        let record = draft.into_record(id.clone())?;
        self.mutate(|records| {
            let slot = records
                .iter_mut()
                .find(|existing| &existing.id == id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            debug!(%id, "updating record");
            *slot = record;
            Ok(())
        })
    }

    pub fn stage_removal(&self, id: &RecordId) -> StoreResult<PendingRemoval> {
        let guard = self.snapshot.read();
        let set = guard.as_ref().ok_or(StoreError::NotLoaded)?;
        let record = set.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(PendingRemoval {
            id: record.id.clone(),
            title: record.title.clone(),
        })
    }

    pub fn confirm_removal(&self, pending: PendingRemoval) -> StoreResult<Arc<RecordSet>> {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.id != pending.id);
            if records.len() == before {
                return Err(StoreError::NotFound(pending.id.clone()));
            }
            debug!(id = %pending.id, "record removed");
            Ok(())
        })
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut Vec<Record>) -> StoreResult<()>,
    ) -> StoreResult<Arc<RecordSet>> {
        let mut slot = self.snapshot.write();
        let current = slot.as_ref().ok_or(StoreError::NotLoaded)?;
        let mut records = current.as_slice().to_vec();
        apply(&mut records)?;
        let next = RecordSet { records };
        self.persist(&next)?;
        let next = Arc::new(next);
        *slot = Some(Arc::clone(&next));
        Ok(next)
    }

    fn persist(&self, set: &RecordSet) -> StoreResult<()> {
        let payload = serde_json::to_string(set.as_slice())?;
        self.backend
            .write(&self.key, &payload)
            .map_err(StoreError::Backend)?;
        debug!(key = %self.key, count = set.len(), "records persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_store() -> (Arc<MemoryBackend>, RecordStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(Arc::clone(&backend));
        store.load().expect("load");
        (backend, store)
    }

    fn stored_records(backend: &MemoryBackend) -> Vec<Record> {
        let raw = backend.read(STORAGE_KEY).unwrap().expect("records stored");
        serde_json::from_str(&raw).expect("stored json decodes")
    }

    #[test]
    fn first_load_seeds_and_persists_examples() {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(Arc::clone(&backend));
        assert!(store.snapshot().is_none());

        assert_eq!(store.load().unwrap(), LoadOutcome::Seeded);
        let snapshot = store.snapshot().expect("loaded");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.as_slice()[0].title, "示例: 妈妈生日");
        assert_eq!(stored_records(&backend), seed_records());
    }

    #[test]
    fn corrupt_data_recovers_with_examples() {
        let backend = Arc::new(MemoryBackend::with_entry(STORAGE_KEY, "{not json"));
        let store = RecordStore::new(Arc::clone(&backend));
        assert_eq!(store.load().unwrap(), LoadOutcome::Recovered);
        assert_eq!(store.snapshot().unwrap().len(), 2);
        assert_eq!(stored_records(&backend), seed_records());
    }

    #[test]
    fn one_bad_entry_keeps_the_whole_payload_aside() {
        let raw = r#"[
            {"id":"g","name":"Grandma","date":"1940-03-03","type":"BIRTHDAY"},
            {"id":"b","name":"Broken","date":"1990-13-01","type":"OTHER"}
        ]"#;
        let backend = Arc::new(MemoryBackend::with_entry(STORAGE_KEY, raw));
        let store = RecordStore::new(Arc::clone(&backend));
        assert_eq!(store.load().unwrap(), LoadOutcome::Recovered);

        let entries = backend.entries.read();
        let kept: Vec<&String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(&format!("{STORAGE_KEY}.corrupt-")))
            .map(|(_, value)| value)
            .collect();
        assert_eq!(kept, vec![&raw.to_string()]);
    }

    #[test]
    fn stored_empty_list_loads_as_empty_not_seeded() {
        let store = RecordStore::new(MemoryBackend::with_entry(STORAGE_KEY, "[]"));
        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(0));
        let view = store
            .view(&ViewQuery::default(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .expect("loaded view");
        assert!(view.is_empty());
    }

    #[test]
    fn view_is_none_before_load() {
        let store = RecordStore::new(MemoryBackend::new());
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(store.view(&ViewQuery::default(), today).is_none());
    }

    #[test]
    fn duplicate_ids_in_storage_keep_first() {
        let raw = r#"[
            {"id":"a","name":"First","date":"2000-01-01","type":"OTHER"},
            {"id":"a","name":"Second","date":"2000-01-02","type":"OTHER"}
        ]"#;
        let store = RecordStore::new(MemoryBackend::with_entry(STORAGE_KEY, raw));
        assert_eq!(store.load().unwrap(), LoadOutcome::Loaded(1));
        assert_eq!(store.get(&"a".into()).unwrap().title, "First");
    }

    #[test]
    fn add_assigns_fresh_id_and_persists() {
        let (backend, store) = loaded_store();
        let snapshot = store
            .add(RecordDraft::new("Dad", "1970-08-08", Category::Birthday))
            .expect("add");
        assert_eq!(snapshot.len(), 3);
        let added = snapshot.last().unwrap();
        assert_eq!(added.title, "Dad");
        assert!(!["1", "2"].contains(&added.id.as_str()));
        assert_eq!(stored_records(&backend).len(), 3);
    }

    #[test]
    fn invalid_draft_never_reaches_the_set() {
        let (backend, store) = loaded_store();
        let err = store
            .add(RecordDraft::new("", "1970-08-08", Category::Birthday))
            .expect_err("empty title rejected");
        assert!(matches!(err, StoreError::Invalid(DraftError::EmptyTitle)));
        assert_eq!(store.snapshot().unwrap().len(), 2);
        assert_eq!(stored_records(&backend).len(), 2);
    }

    #[test]
    fn update_preserves_id_and_position() {
        let (_, store) = loaded_store();
        let id = RecordId::new("1");
        let snapshot = store
            .update(
                &id,
                RecordDraft::new("Mom", "1975-05-21", Category::Birthday).with_notes("tulips"),
            )
            .expect("update");
        let first = &snapshot.as_slice()[0];
        assert_eq!(first.id, id);
        assert_eq!(first.title, "Mom");
        assert_eq!(first.notes.as_deref(), Some("tulips"));
        assert_eq!(first.date, NaiveDate::from_ymd_opt(1975, 5, 21).unwrap());
    }

    #[test]
    fn update_unknown_id_fails() {
        let (_, store) = loaded_store();
        let err = store
            .update(&"nope".into(), RecordDraft::new("X", "2000-01-01", Category::Other))
            .expect_err("unknown id");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn removal_requires_staging_then_confirmation() {
        let (backend, store) = loaded_store();
        let pending = store.stage_removal(&"2".into()).expect("stage");
        assert_eq!(pending.title(), "示例: 结婚纪念日");
        assert_eq!(store.snapshot().unwrap().len(), 2, "staging does not delete");

        let snapshot = store.confirm_removal(pending).expect("confirm");
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains(&"2".into()));
        assert_eq!(stored_records(&backend).len(), 1);
    }

    #[test]
    fn removing_the_last_record_is_persisted() {
        let (backend, store) = loaded_store();
        for id in ["1", "2"] {
            let pending = store.stage_removal(&id.into()).unwrap();
            store.confirm_removal(pending).unwrap();
        }
        assert!(store.snapshot().unwrap().is_empty());
        assert!(stored_records(&backend).is_empty());
    }

    #[test]
    fn mutations_before_load_are_rejected() {
        let store = RecordStore::new(MemoryBackend::new());
        let err = store
            .add(RecordDraft::new("Dad", "1970-08-08", Category::Birthday))
            .expect_err("not loaded");
        assert!(matches!(err, StoreError::NotLoaded));
    }

    #[test]
    fn earlier_snapshots_are_unaffected_by_later_mutations() {
        let (_, store) = loaded_store();
        let before = store.snapshot().unwrap();
        store
            .add(RecordDraft::new("Dad", "1970-08-08", Category::Birthday))
            .unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(store.snapshot().unwrap().len(), 3);
    }
}
