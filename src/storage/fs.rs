//! File-system backend: each collection is a JSON-lines export file and each
//! bucket a directory of blobs named by id.
//!
//! Export files are created fresh; an existing file is never appended to or
//! overwritten.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::error::{Error, StorageOp};
use crate::storage::{
    BlobBucket, Connection, DocumentCollection, StoreConfig, content_id, ensure_connected,
};

/// Destination of one collection's JSON lines.
trait ExportSink: Write + Seek + Send {
    /// Cuts the sink back to `len` bytes and moves the cursor there.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl ExportSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len)).map(|_| ())
    }
}

struct ExportFile {
    sink: Option<Box<dyn ExportSink>>,
    keys: HashSet<String>,
}

pub struct FsCollection {
    name: String,
    path: PathBuf,
    file: Mutex<ExportFile>,
}

impl FsCollection {
    fn create(name: &str, path: PathBuf) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                Error::storage(name, StorageOp::Connect, format!("{}: {e}", path.display()))
            })?;
        Ok(Self::with_sink(name, path, Box::new(file)))
    }

    fn with_sink(name: &str, path: PathBuf, sink: Box<dyn ExportSink>) -> Self {
        Self {
            name: name.to_string(),
            path,
            file: Mutex::new(ExportFile {
                sink: Some(sink),
                keys: HashSet::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&self) -> Result<(), Error> {
        let mut export = self.file.lock();
        if let Some(mut sink) = export.sink.take() {
            sink.flush()
                .map_err(|e| Error::storage(&self.name, StorageOp::Disconnect, e))?;
        }
        Ok(())
    }
}

impl DocumentCollection for FsCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, key: &str, document: &serde_json::Value) -> Result<(), Error> {
        let mut export = self.file.lock();
        if export.keys.contains(key) {
            return Err(Error::storage(
                &self.name,
                StorageOp::Insert,
                format!("duplicate key {key}"),
            ));
        }

        let mut line = match document {
            serde_json::Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("_id".to_string(), serde_json::Value::from(key));
                serde_json::to_vec(&fields)?
            }
            other => serde_json::to_vec(&serde_json::json!({ "_id": key, "value": other }))?,
        };
        line.push(b'\n');

        let sink = export
            .sink
            .as_mut()
            .ok_or_else(|| Error::storage(&self.name, StorageOp::Insert, "export file closed"))?;
        let offset = sink
            .stream_position()
            .map_err(|e| Error::storage(&self.name, StorageOp::Insert, e))?;
        // A failed line is cut back off so it can never surface in the export later.
        if let Err(e) = sink.write_all(&line).and_then(|()| sink.flush()) {
            if let Err(rollback) = sink.truncate(offset) {
                tracing::error!(
                    collection = %self.name,
                    error = %rollback,
                    "could not remove partial line, closing export file"
                );
                export.sink = None;
            }
            return Err(Error::storage(&self.name, StorageOp::Insert, e));
        }
        export.keys.insert(key.to_string());
        Ok(())
    }
}

pub struct FsBucket {
    name: String,
    dir: PathBuf,
    connected: Arc<AtomicBool>,
}

impl FsBucket {
    fn blob_path(&self, id: &str) -> Result<PathBuf, Error> {
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::storage(
                &self.name,
                StorageOp::Fetch,
                format!("malformed blob id {id:?}"),
            ));
        }
        Ok(self.dir.join(id))
    }
}

impl BlobBucket for FsBucket {
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
        let path = self.dir.join(&id);
        if path.exists() {
            return Ok(id);
        }
        // Each writer gets its own temporary file; blobs only appear at `path` complete.
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::storage(&self.name, StorageOp::Store, e))?;
        tmp.write_all(payload)
            .map_err(|e| Error::storage(&self.name, StorageOp::Store, e))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(id),
            // Another writer published the same content first.
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(id),
            Err(e) => Err(Error::storage(&self.name, StorageOp::Store, e.error)),
        }
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>, Error> {
        ensure_connected(
            self.connected.load(Ordering::Acquire),
            &self.name,
            StorageOp::Fetch,
        )?;
        let path = self.blob_path(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                Error::storage(&self.name, StorageOp::Fetch, format!("no blob {id}"))
            }
            _ => Error::storage(&self.name, StorageOp::Fetch, e),
        })
    }
}

pub struct FsConnection {
    root: PathBuf,
    connected: Arc<AtomicBool>,
    collections: Mutex<HashMap<String, Arc<FsCollection>>>,
    buckets: Mutex<HashMap<String, Arc<FsBucket>>>,
}

impl FsConnection {
    /// Opens `<export_dir>/<database_name>`, creating it if needed.
    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        config.validate()?;
        let export_dir = config.export_dir.as_ref().ok_or_else(|| Error::Config {
            reason: "export_dir is required for the file-system backend".into(),
        })?;
        let root = export_dir.join(&config.database_name);
        fs::create_dir_all(&root)
            .map_err(|e| Error::storage(root.display().to_string(), StorageOp::Connect, e))?;
        tracing::debug!(root = %root.display(), "opened file-system store");
        Ok(Self {
            root,
            connected: Arc::new(AtomicBool::new(true)),
            collections: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.jsonl"))
    }
}

impl Connection for FsConnection {
    fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, Error> {
        ensure_connected(self.is_connected(), name, StorageOp::Connect)?;
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(name) {
            let collection: Arc<dyn DocumentCollection> = existing.clone();
            return Ok(collection);
        }
        let created = Arc::new(FsCollection::create(name, self.collection_path(name))?);
        collections.insert(name.to_string(), Arc::clone(&created));
        Ok(created)
    }

    fn bucket(&self, name: &str) -> Result<Arc<dyn BlobBucket>, Error> {
        ensure_connected(self.is_connected(), name, StorageOp::Connect)?;
        let mut buckets = self.buckets.lock();
        if let Some(existing) = buckets.get(name) {
            let bucket: Arc<dyn BlobBucket> = existing.clone();
            return Ok(bucket);
        }
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|e| Error::storage(name, StorageOp::Connect, e))?;
        let created = Arc::new(FsBucket {
            name: name.to_string(),
            dir,
            connected: Arc::clone(&self.connected),
        });
        buckets.insert(name.to_string(), Arc::clone(&created));
        Ok(created)
    }

    fn disconnect(&self) -> Result<(), Error> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let collections: Vec<Arc<FsCollection>> =
            self.collections.lock().values().cloned().collect();
        for collection in collections {
            collection.close()?;
        }
        tracing::debug!(root = %self.root.display(), "closed file-system store");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
