//! Persistent metadata store backed by redb.
//!
//! [`MetaStore::begin`] hands out a [`VolumeTx`] unit of work. The Tx reads
//! from a redb read snapshot and stages writes in memory; `commit` applies
//! them in a single write transaction after checking that no other Tx
//! changed the same keys in between. Dropping a Tx without committing
//! discards its staged writes.

use crate::tables;
use crate::types::VolumeRecord;
use blockctl_common::ExportMode;
use redb::{Database, ReadTransaction, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, error};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record {0} was modified by a concurrent transaction")]
    Conflict(String),
    #[error("store holds {stored} exports but {requested} was requested")]
    ModeMismatch {
        stored: String,
        requested: ExportMode,
    },
    #[error("record {id} carries a {found} descriptor in a {expected} store")]
    DescriptorMismatch {
        id: String,
        expected: ExportMode,
        found: ExportMode,
    },
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

/// Persistent metadata store backed by redb.
pub struct MetaStore {
    db: Database,
    mode: ExportMode,
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    ///
    /// The first open records `mode`; reopening with a different mode fails
    /// so a store never mixes AoE and iSCSI records.
    pub fn open(path: impl AsRef<Path>, mode: ExportMode) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::VOLUMES)?;
            let _t = write_txn.open_table(tables::COUNTERS)?;
            let mut info = write_txn.open_table(tables::STORE_INFO)?;
            let stored = info
                .get(tables::EXPORT_MODE_KEY)?
                .map(|v| v.value().to_string());
            match stored {
                Some(stored) if stored != mode.as_str() => {
                    return Err(MetaStoreError::ModeMismatch {
                        stored,
                        requested: mode,
                    });
                }
                Some(_) => {}
                None => {
                    info.insert(tables::EXPORT_MODE_KEY, mode.as_str())?;
                }
            }
        }
        write_txn.commit()?;

        debug!("Opened metadata store {} ({} mode)", path.display(), mode);
        Ok(Self { db, mode })
    }

    /// Export mode this store was created for
    #[must_use]
    pub const fn mode(&self) -> ExportMode {
        self.mode
    }

    /// Start a unit of work
    pub fn begin(&self) -> MetaStoreResult<VolumeTx<'_>> {
        let snapshot = self.db.begin_read()?;
        Ok(VolumeTx {
            store: self,
            snapshot,
            staged: BTreeMap::new(),
            base: HashMap::new(),
            finished: false,
        })
    }

    // ---- Counters (bincode, read-modify-write in one write txn) ----

    /// Atomically read, mutate and persist the counter stored under `key`.
    ///
    /// `seed` provides the initial value the first time the counter is
    /// touched. redb admits one writer at a time, so concurrent callers are
    /// serialized on the write transaction.
    pub fn update_counter<T, R>(
        &self,
        key: &str,
        seed: impl FnOnce() -> T,
        update: impl FnOnce(&mut T) -> R,
    ) -> MetaStoreResult<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(tables::COUNTERS)?;
            let current = table.get(key)?.map(|v| v.value().to_vec());
            let mut counter: T = match current {
                Some(bytes) => bincode::deserialize(&bytes)?,
                None => seed(),
            };
            let result = update(&mut counter);
            let bytes = bincode::serialize(&counter)?;
            table.insert(key, bytes.as_slice())?;
            result
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Current value of a counter, `None` if it was never touched
    pub fn load_counter<T: DeserializeOwned>(&self, key: &str) -> MetaStoreResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::COUNTERS)?;
        match table.get(key)? {
            Some(val) => Ok(Some(bincode::deserialize(val.value())?)),
            None => Ok(None),
        }
    }
}

/// Unit of work over the `volumes` table.
pub struct VolumeTx<'a> {
    store: &'a MetaStore,
    snapshot: ReadTransaction,
    /// id → new value (`None` = removed)
    staged: BTreeMap<String, Option<VolumeRecord>>,
    /// id → encoded value seen in the snapshot when first staged
    base: HashMap<String, Option<Vec<u8>>>,
    finished: bool,
}

impl VolumeTx<'_> {
    /// Look up a record, including this Tx's own staged writes
    pub fn get(&self, volume_id: &str) -> MetaStoreResult<Option<VolumeRecord>> {
        if let Some(staged) = self.staged.get(volume_id) {
            return Ok(staged.clone());
        }
        match self.snapshot_bytes(volume_id)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All records visible to this Tx, ordered by id
    pub fn get_all(&self) -> MetaStoreResult<Vec<VolumeRecord>> {
        let mut records = BTreeMap::new();
        {
            let table = self.snapshot.open_table(tables::VOLUMES)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                let key = key.value().to_string();
                match bincode::deserialize::<VolumeRecord>(value.value()) {
                    Ok(record) => {
                        records.insert(key, record);
                    }
                    Err(e) => error!("Failed to decode volume record '{}': {}", key, e),
                }
            }
        }
        for (id, staged) in &self.staged {
            match staged {
                Some(record) => {
                    records.insert(id.clone(), record.clone());
                }
                None => {
                    records.remove(id);
                }
            }
        }
        Ok(records.into_values().collect())
    }

    /// Stage a new record; fails if the id is already taken
    pub fn add(&mut self, record: VolumeRecord) -> MetaStoreResult<()> {
        self.check_descriptor(&record)?;
        if self.get(&record.volume_id)?.is_some() {
            return Err(MetaStoreError::Duplicate(record.volume_id));
        }
        let id = record.volume_id.clone();
        self.stage(&id, Some(record))
    }

    /// Stage a replacement for an existing record
    pub fn update(&mut self, record: VolumeRecord) -> MetaStoreResult<()> {
        self.check_descriptor(&record)?;
        if self.get(&record.volume_id)?.is_none() {
            return Err(MetaStoreError::NotFound(record.volume_id));
        }
        let id = record.volume_id.clone();
        self.stage(&id, Some(record))
    }

    /// Stage removal of a record, returning what was removed
    pub fn remove(&mut self, volume_id: &str) -> MetaStoreResult<VolumeRecord> {
        let existing = self
            .get(volume_id)?
            .ok_or_else(|| MetaStoreError::NotFound(volume_id.to_string()))?;
        self.stage(volume_id, None)?;
        Ok(existing)
    }

    /// Number of staged writes
    #[must_use]
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Apply every staged write atomically.
    pub fn commit(mut self) -> MetaStoreResult<()> {
        self.finished = true;
        if self.staged.is_empty() {
            return Ok(());
        }

        let write_txn = self.store.db.begin_write()?;
        let conflict = {
            let mut table = write_txn.open_table(tables::VOLUMES)?;
            let mut conflict = None;
            for (id, value) in &self.staged {
                let current = table.get(id.as_str())?.map(|v| v.value().to_vec());
                let seen = self.base.get(id).cloned().flatten();
                if current != seen {
                    conflict = Some(id.clone());
                    break;
                }
                match value {
                    Some(record) => {
                        let bytes = bincode::serialize(record)?;
                        table.insert(id.as_str(), bytes.as_slice())?;
                    }
                    None => {
                        table.remove(id.as_str())?;
                    }
                }
            }
            conflict
        };

        if let Some(id) = conflict {
            write_txn.abort()?;
            return Err(MetaStoreError::Conflict(id));
        }
        write_txn.commit()?;
        debug!("Committed {} metadata change(s)", self.staged.len());
        Ok(())
    }

    /// Discard every staged write.
    pub fn rollback(mut self) {
        self.finished = true;
        if !self.staged.is_empty() {
            debug!("Rolled back {} metadata change(s)", self.staged.len());
        }
    }

    fn stage(&mut self, volume_id: &str, value: Option<VolumeRecord>) -> MetaStoreResult<()> {
        if !self.base.contains_key(volume_id) {
            let seen = self.snapshot_bytes(volume_id)?;
            self.base.insert(volume_id.to_string(), seen);
        }
        self.staged.insert(volume_id.to_string(), value);
        Ok(())
    }

    fn snapshot_bytes(&self, volume_id: &str) -> MetaStoreResult<Option<Vec<u8>>> {
        let table = self.snapshot.open_table(tables::VOLUMES)?;
        Ok(table.get(volume_id)?.map(|v| v.value().to_vec()))
    }

    fn check_descriptor(&self, record: &VolumeRecord) -> MetaStoreResult<()> {
        match &record.export {
            Some(desc) if desc.mode() != self.store.mode => Err(MetaStoreError::DescriptorMismatch {
                id: record.volume_id.clone(),
                expected: self.store.mode,
                found: desc.mode(),
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for VolumeTx<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(
                "Discarding {} uncommitted metadata change(s)",
                self.staged.len()
            );
        }
    }
}
