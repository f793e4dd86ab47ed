//! In-process backend. Useful for tests and dry runs that should not touch disk.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Error, StorageOp};
use crate::storage::{
    BlobBucket, Connection, DocumentCollection, StoreConfig, content_id, ensure_connected,
};

pub struct MemoryCollection {
    name: String,
    documents: RwLock<BTreeMap<String, serde_json::Value>>,
    connected: Arc<AtomicBool>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self::attached(name.into(), Arc::new(AtomicBool::new(true)))
    }

    fn attached(name: String, connected: Arc<AtomicBool>) -> Self {
        Self {
            name,
            documents: RwLock::new(BTreeMap::new()),
            connected,
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.documents.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, key: &str, document: &serde_json::Value) -> Result<(), Error> {
        ensure_connected(
            self.connected.load(Ordering::Acquire),
            &self.name,
            StorageOp::Insert,
        )?;
        let mut documents = self.documents.write();
        if documents.contains_key(key) {
            return Err(Error::storage(
                &self.name,
                StorageOp::Insert,
                format!("duplicate key {key}"),
            ));
        }
        documents.insert(key.to_string(), document.clone());
        Ok(())
    }
}

pub struct MemoryBucket {
    name: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self::attached(name.into(), Arc::new(AtomicBool::new(true)))
    }

    fn attached(name: String, connected: Arc<AtomicBool>) -> Self {
        Self {
            name,
            blobs: RwLock::new(HashMap::new()),
            connected,
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self, payload: &[u8]) -> Result<String, Error> {
        ensure_connected(
            self.connected.load(Ordering::Acquire),
            &self.name,
            StorageOp::Store,
        )?;
        let id = content_id(payload);
        self.blobs
            .write()
            .entry(id.clone())
            .or_insert_with(|| payload.to_vec());
        Ok(id)
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>, Error> {
        ensure_connected(
            self.connected.load(Ordering::Acquire),
            &self.name,
            StorageOp::Fetch,
        )?;
        self.blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::storage(&self.name, StorageOp::Fetch, format!("no blob {id}")))
    }
}

/// Connection whose collections and buckets live in process memory.
///
/// Handles for the same name are shared, so every worker sees the same data.
pub struct MemoryConnection {
    database: String,
    connected: Arc<AtomicBool>,
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
    buckets: RwLock<HashMap<String, Arc<MemoryBucket>>>,
}

impl MemoryConnection {
    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        config.validate()?;
        tracing::debug!(database = %config.database_name, "opened in-memory store");
        Ok(Self {
            database: config.database_name.clone(),
            connected: Arc::new(AtomicBool::new(true)),
            collections: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Typed handle for inspecting stored documents.
    pub fn memory_collection(&self, name: &str) -> Result<Arc<MemoryCollection>, Error> {
        ensure_connected(self.is_connected(), name, StorageOp::Connect)?;
        let mut collections = self.collections.write();
        let collection = collections.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryCollection::attached(
                name.to_string(),
                Arc::clone(&self.connected),
            ))
        });
        Ok(Arc::clone(collection))
    }

    pub fn memory_bucket(&self, name: &str) -> Result<Arc<MemoryBucket>, Error> {
        ensure_connected(self.is_connected(), name, StorageOp::Connect)?;
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryBucket::attached(
                name.to_string(),
                Arc::clone(&self.connected),
            ))
        });
        Ok(Arc::clone(bucket))
    }
}

impl Connection for MemoryConnection {
    fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, Error> {
        let collection: Arc<dyn DocumentCollection> = self.memory_collection(name)?;
        Ok(collection)
    }

    fn bucket(&self, name: &str) -> Result<Arc<dyn BlobBucket>, Error> {
        let bucket: Arc<dyn BlobBucket> = self.memory_bucket(name)?;
        Ok(bucket)
    }

    fn disconnect(&self) -> Result<(), Error> {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::debug!(database = %self.database, "closed in-memory store");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
