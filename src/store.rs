use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{id_from_value, Collection, Dataset};

pub type Record = Map<String, Value>;
pub type Table = Arc<Vec<Value>>;

/// Where snapshots come from and where grade updates go.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// A collection that does not exist yet loads as an empty table.
    async fn load(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Merges `patch` into every record whose fields equal `predicate`.
    /// With `upsert`, inserts `predicate + patch` when nothing matched.
    /// Returns the number of records written.
    async fn write_update(
        &self,
        collection: Collection,
        predicate: &Record,
        patch: &Record,
        upsert: bool,
    ) -> Result<u64>;
}

/// Accepts an array of records. A lone object is read as a one-record
/// table; anything else is rejected.
pub fn records_from_value(collection: Collection, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(vec![Value::Object(map)]),
        Value::Null => Ok(Vec::new()),
        other => Err(EngineError::malformed(
            collection.as_str(),
            format!("expected an array of records, found {}", type_name(&other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Field-equality match. Ids compare by their string form so `7` and `"7"`
/// are the same student.
pub fn record_matches(record: &Value, predicate: &Record) -> bool {
    predicate.iter().all(|(field, expected)| match record.get(field) {
        Some(actual) if actual == expected => true,
        Some(actual) => match (id_from_value(actual), id_from_value(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        None => false,
    })
}

pub fn merge_patch(record: &mut Value, patch: &Record) {
    if let Value::Object(map) = record {
        for (field, value) in patch {
            map.insert(field.clone(), value.clone());
        }
    }
}

/// Applies a `write_update` to an in-memory table.
pub fn apply_update(records: &mut Vec<Value>, predicate: &Record, patch: &Record, upsert: bool) -> u64 {
    let mut written = 0;
    for record in records.iter_mut().filter(|r| record_matches(r, predicate)) {
        merge_patch(record, patch);
        written += 1;
    }
    if written == 0 && upsert {
        let mut inserted = Value::Object(predicate.clone());
        merge_patch(&mut inserted, patch);
        records.push(inserted);
        written = 1;
    }
    written
}

async fn read_table(path: &Path, collection: Collection) -> Result<Vec<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => records_from_value(collection, serde_json::from_str(&text)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

async fn write_table(path: &Path, records: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn table_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection.as_str()))
}

/// One JSON document per collection under a directory.
pub struct FileSnapshotSource {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, collection: Collection) -> Result<Vec<Value>> {
        read_table(&table_path(&self.dir, collection), collection).await
    }

    async fn write_update(
        &self,
        collection: Collection,
        predicate: &Record,
        patch: &Record,
        upsert: bool,
    ) -> Result<u64> {
        // Whole-file rewrite; updates to different keys still share the file.
        let _guard = self.write_lock.lock().await;
        let path = table_path(&self.dir, collection);
        let mut records = read_table(&path, collection).await?;
        let written = apply_update(&mut records, predicate, patch, upsert);
        if written > 0 {
            write_table(&path, &records).await?;
        }
        Ok(written)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SnapshotKey {
    collection: Collection,
    bucket: u64,
}

/// Memoizing front for a snapshot source with a local fallback copy.
#[derive(Clone)]
pub struct RecordStore {
    source: Arc<dyn SnapshotSource>,
    cache: Cache<SnapshotKey, Table>,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl RecordStore {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        cache_dir: impl Into<PathBuf>,
        ttl: Duration,
        max_capacity: u64,
    ) -> Self {
        let ttl = ttl.max(Duration::from_secs(1));
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        debug!(source = source.name(), ttl_secs = ttl.as_secs(), "record store ready");
        Self {
            source,
            cache,
            cache_dir: cache_dir.into(),
            ttl,
        }
    }

    fn key(&self, collection: Collection) -> SnapshotKey {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        SnapshotKey {
            collection,
            bucket: now / self.ttl.as_secs(),
        }
    }

    /// Never fails: a source error falls back to the last local copy, and
    /// no local copy means an empty table.
    pub async fn load(&self, collection: Collection) -> Table {
        let key = self.key(collection);
        if let Some(table) = self.cache.get(&key).await {
            debug!(%collection, rows = table.len(), "snapshot cache hit");
            return table;
        }
        debug!(%collection, "snapshot cache miss");

        let started = Instant::now();
        match self.source.load(collection).await {
            Ok(records) => {
                info!(
                    %collection,
                    source = self.source.name(),
                    rows = records.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "snapshot loaded"
                );
                if let Err(err) = write_table(&table_path(&self.cache_dir, collection), &records).await {
                    warn!(%collection, error = %err, "failed to refresh local snapshot cache");
                }
                let table = Arc::new(records);
                self.cache.insert(key, table.clone()).await;
                table
            }
            Err(err) => {
                warn!(%collection, error = %err, "snapshot source failed, using local cache");
                self.load_local(collection).await
            }
        }
    }

    async fn load_local(&self, collection: Collection) -> Table {
        match read_table(&table_path(&self.cache_dir, collection), collection).await {
            Ok(records) => {
                if records.is_empty() {
                    warn!(%collection, "no local snapshot available, continuing with no data");
                }
                Arc::new(records)
            }
            Err(err) => {
                warn!(%collection, error = %err, "local snapshot unreadable, continuing with no data");
                Arc::new(Vec::new())
            }
        }
    }

    /// Reads straight from the source, skipping the memoized copy. Used by
    /// writers that must see the current state.
    pub async fn load_fresh(&self, collection: Collection) -> Result<Vec<Value>> {
        self.source.load(collection).await
    }

    pub async fn write_update(
        &self,
        collection: Collection,
        predicate: &Record,
        patch: &Record,
        upsert: bool,
    ) -> Result<u64> {
        let written = self
            .source
            .write_update(collection, predicate, patch, upsert)
            .await?;
        self.invalidate(collection).await;
        Ok(written)
    }

    pub async fn invalidate(&self, collection: Collection) {
        let key = self.key(collection);
        self.cache.invalidate(&key).await;
        debug!(%collection, "snapshot cache invalidated");
    }

    /// Fans out one task per collection and joins them before decoding.
    pub async fn load_all(&self) -> Dataset {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for collection in Collection::ALL {
            let store = self.clone();
            tasks.spawn(async move { (collection, store.load(collection).await) });
        }

        let mut dataset = Dataset::default();
        while let Some(joined) = tasks.join_next().await {
            let (collection, table) = match joined {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(error = %err, "snapshot load task failed");
                    continue;
                }
            };
            match collection {
                Collection::Students => dataset.students = decode_table(collection, &table),
                Collection::Grades => dataset.grades = decode_table(collection, &table),
                Collection::Subjects => dataset.subjects = decode_table(collection, &table),
                Collection::Semesters => dataset.semesters = decode_table(collection, &table),
                Collection::Teachers => dataset.teachers = decode_table(collection, &table),
                Collection::Curricula => dataset.curricula = decode_table(collection, &table),
            }
        }

        info!(
            students = dataset.students.len(),
            enrollments = dataset.grades.len(),
            subjects = dataset.subjects.len(),
            semesters = dataset.semesters.len(),
            teachers = dataset.teachers.len(),
            curricula = dataset.curricula.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset primed"
        );
        dataset
    }
}

/// Decodes each record on its own so one bad record only costs itself.
pub fn decode_table<T: DeserializeOwned>(collection: Collection, records: &[Value]) -> Vec<T> {
    records
        .iter()
        .enumerate()
        .filter_map(|(position, record)| match T::deserialize(record) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(%collection, position, error = %err, "skipping undecodable record");
                None
            }
        })
        .collect()
}
