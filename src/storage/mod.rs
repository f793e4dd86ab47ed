//! Persistence boundary: named document collections for records and named
//! blob buckets for payloads too large to store inline.

pub mod fs;
pub mod memory;
pub mod overflow;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::contract::ContractCodeRecord;
use crate::error::{Error, StorageOp};
use crate::storage::overflow::{OverflowPolicy, OverflowReport};
use crate::trace::record::TransactionRecord;

pub const DEFAULT_DATABASE_URL: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE_NAME: &str = "experiment_fastsync";
pub const DEFAULT_TRANSACTIONS_COLLECTION: &str = "exceptions";
pub const DEFAULT_CONTRACTS_COLLECTION: &str = "contracts";
pub const DEFAULT_OVERFLOW_BUCKET: &str = "exception_bucket";
/// Largest document the document store accepts inline.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub database_name: String,
    pub transactions_collection: String,
    pub contracts_collection: String,
    pub overflow_bucket: String,
    pub max_document_bytes: usize,
    /// Root directory for the file-system backend.
    pub export_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            transactions_collection: DEFAULT_TRANSACTIONS_COLLECTION.to_string(),
            contracts_collection: DEFAULT_CONTRACTS_COLLECTION.to_string(),
            overflow_bucket: DEFAULT_OVERFLOW_BUCKET.to_string(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            export_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_document_bytes == 0 {
            return Err(Error::Config {
                reason: "max_document_bytes must be positive".into(),
            });
        }
        let names = [
            ("database_name", &self.database_name),
            ("transactions_collection", &self.transactions_collection),
            ("contracts_collection", &self.contracts_collection),
            ("overflow_bucket", &self.overflow_bucket),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.is_empty()) {
            return Err(Error::Config {
                reason: format!("{field} must not be empty"),
            });
        }
        if self.transactions_collection == self.contracts_collection {
            return Err(Error::Config {
                reason: "transaction and contract collections must differ".into(),
            });
        }
        Ok(())
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        OverflowPolicy::new(self.max_document_bytes)
    }
}

/// A named collection of JSON documents keyed by a unique id.
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Inserts a new document; an existing `key` is an error.
    fn insert(&self, key: &str, document: &serde_json::Value) -> Result<(), Error>;
}

/// A named bucket of opaque payloads.
pub trait BlobBucket: Send + Sync {
    fn name(&self) -> &str;

    /// Persists `payload` and returns the id to fetch it with.
    fn store(&self, payload: &[u8]) -> Result<String, Error>;

    fn fetch(&self, id: &str) -> Result<Vec<u8>, Error>;
}

/// An open connection to a backend. Handles are shareable across worker threads.
pub trait Connection: Send + Sync {
    fn collection(&self, name: &str) -> Result<Arc<dyn DocumentCollection>, Error>;

    fn bucket(&self, name: &str) -> Result<Arc<dyn BlobBucket>, Error>;

    /// Releases the connection. Calling it again is a no-op.
    fn disconnect(&self) -> Result<(), Error>;

    fn is_connected(&self) -> bool;
}

/// Blob ids are the hex SHA-256 of the payload, so storing the same bytes twice yields one blob.
pub(crate) fn content_id(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

pub(crate) fn ensure_connected(
    connected: bool,
    target: &str,
    operation: StorageOp,
) -> Result<(), Error> {
    if connected {
        Ok(())
    } else {
        Err(Error::storage(target, operation, "connection closed"))
    }
}

/// Writes sealed records to their collections, detaching oversized trace data first.
pub struct TraceStore {
    connection: Arc<dyn Connection>,
    transactions: Arc<dyn DocumentCollection>,
    contracts: Arc<dyn DocumentCollection>,
    overflow: Arc<dyn BlobBucket>,
    policy: OverflowPolicy,
}

impl TraceStore {
    pub fn open(connection: Arc<dyn Connection>, config: &StoreConfig) -> Result<Self, Error> {
        config.validate()?;
        let transactions = connection.collection(&config.transactions_collection)?;
        let contracts = connection.collection(&config.contracts_collection)?;
        let overflow = connection.bucket(&config.overflow_bucket)?;
        Ok(Self {
            connection,
            transactions,
            contracts,
            overflow,
            policy: config.overflow_policy(),
        })
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn overflow_bucket(&self) -> &dyn BlobBucket {
        self.overflow.as_ref()
    }

    /// Detaches oversized data and inserts the record keyed by its hash.
    ///
    /// On error nothing is committed; blobs already written for the record are
    /// left for out-of-band collection.
    pub fn persist_transaction(
        &self,
        mut record: TransactionRecord,
    ) -> Result<OverflowReport, Error> {
        let report = self.policy.apply(&mut record, self.overflow.as_ref())?;
        let document = serde_json::to_value(&record)?;
        self.transactions.insert(&record.tx_hash, &document)?;
        tracing::debug!(
            tx_hash = %record.tx_hash,
            detached_nodes = report.detached_nodes.len(),
            record_detached = report.record_detached,
            "persisted transaction record"
        );
        Ok(report)
    }

    /// Persists each record independently; one failure does not stop the rest.
    pub fn persist_all(
        &self,
        records: impl IntoIterator<Item = TransactionRecord>,
    ) -> Vec<(String, Result<OverflowReport, Error>)> {
        records
            .into_iter()
            .map(|record| {
                let tx_hash = record.tx_hash.clone();
                let result = self.persist_transaction(record);
                if let Err(e) = &result {
                    tracing::warn!(%tx_hash, error = %e, "failed to persist transaction record");
                }
                (tx_hash, result)
            })
            .collect()
    }

    pub fn persist_contract(&self, record: &ContractCodeRecord) -> Result<(), Error> {
        let document = serde_json::to_value(record)?;
        self.contracts.insert(&record.address, &document)
    }

    pub fn close(&self) -> Result<(), Error> {
        self.connection.disconnect()
    }
}
