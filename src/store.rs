//! Storage of canonical records.
//!
//! The sync pipeline only needs three operations from storage, captured by
//! [`CatalogStore`]. Two implementations ship with the crate:
//!
//! | Store | Backing | Used by |
//! |-------|---------|---------|
//! | [`MemoryStore`] | in-process `Vec` | tests, dry runs |
//! | [`JsonFileStore`] | one JSON file, rewritten on every write | the CLI |
//!
//! Natural keys are unique per collection; inserting a second record with
//! the same key is a [`StorageError::KeyConflict`], which keeps the catalog
//! consistent even when two in-flight items race for the same key.

use crate::error::StorageError;
use crate::models::{CanonicalRecord, Collection, RecordId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// A record together with the id storage assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: CanonicalRecord,
}

/// The "save/find canonical record" interface consumed by the orchestrator.
pub trait CatalogStore {
    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>, StorageError>;

    async fn insert(&self, record: CanonicalRecord) -> Result<RecordId, StorageError>;

    async fn update(&self, id: RecordId, record: CanonicalRecord) -> Result<(), StorageError>;
}

impl<T: CatalogStore> CatalogStore for &T {
    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        (**self).find_by_natural_key(collection, natural_key).await
    }

    async fn insert(&self, record: CanonicalRecord) -> Result<RecordId, StorageError> {
        (**self).insert(record).await
    }

    async fn update(&self, id: RecordId, record: CanonicalRecord) -> Result<(), StorageError> {
        (**self).update(id, record).await
    }
}

/// In-memory catalog contents, shared by both stores.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Catalog {
    next_id: u64,
    records: Vec<StoredRecord>,
}

impl Catalog {
    fn find(&self, collection: Collection, natural_key: &str) -> Option<&StoredRecord> {
        self.records.iter().find(|stored| {
            stored.record.collection() == collection && stored.record.natural_key() == natural_key
        })
    }

    fn insert(&mut self, record: CanonicalRecord) -> Result<RecordId, StorageError> {
        if self.find(record.collection(), record.natural_key()).is_some() {
            return Err(StorageError::KeyConflict {
                collection: record.collection(),
                natural_key: record.natural_key().to_string(),
            });
        }
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.records.push(StoredRecord { id, record });
        Ok(id)
    }

    fn update(&mut self, id: RecordId, record: CanonicalRecord) -> Result<(), StorageError> {
        if let Some(other) = self.find(record.collection(), record.natural_key())
            && other.id != id
        {
            return Err(StorageError::KeyConflict {
                collection: record.collection(),
                natural_key: record.natural_key().to_string(),
            });
        }
        let stored = self
            .records
            .iter_mut()
            .find(|stored| stored.id == id)
            .ok_or(StorageError::NotFound(id))?;
        stored.record = record;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: std::sync::Mutex<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, in insertion order.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Catalog> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CatalogStore for MemoryStore {
    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.lock().find(collection, natural_key).cloned())
    }

    async fn insert(&self, record: CanonicalRecord) -> Result<RecordId, StorageError> {
        self.lock().insert(record)
    }

    async fn update(&self, id: RecordId, record: CanonicalRecord) -> Result<(), StorageError> {
        self.lock().update(id, record)
    }
}

/// Whole catalog in one pretty-printed JSON file.
///
/// Every write serializes the full catalog to `<path>.tmp` and renames it
/// over `<path>`, so a crash mid-write leaves the previous file intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    catalog: tokio::sync::Mutex<Catalog>,
}

impl JsonFileStore {
    /// Load the catalog at `path`, or start empty when the file does not exist.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let catalog = match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str::<Catalog>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No catalog file yet; starting empty");
                Catalog::default()
            }
            Err(e) => return Err(e.into()),
        };
        info!(records = catalog.records.len(), "Opened catalog");
        Ok(Self {
            path,
            catalog: tokio::sync::Mutex::new(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, catalog: &Catalog) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(catalog)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), records = catalog.records.len(), "Wrote catalog");
        Ok(())
    }
}

impl CatalogStore for JsonFileStore {
    async fn find_by_natural_key(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.catalog.lock().await.find(collection, natural_key).cloned())
    }

    async fn insert(&self, record: CanonicalRecord) -> Result<RecordId, StorageError> {
        let mut catalog = self.catalog.lock().await;
        let id = catalog.insert(record)?;
        self.persist(&catalog).await?;
        Ok(id)
    }

    async fn update(&self, id: RecordId, record: CanonicalRecord) -> Result<(), StorageError> {
        let mut catalog = self.catalog.lock().await;
        catalog.update(id, record)?;
        self.persist(&catalog).await
    }
}
