use std::io;

use serde::Serialize;

use crate::error::Error;
use crate::storage::BlobBucket;
use crate::trace::record::TransactionRecord;
use crate::trace::{ExecutionStep, TraceNode};

/// Which parts of a record were moved into the overflow bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowReport {
    /// Indexes of nodes whose step log was detached.
    pub detached_nodes: Vec<usize>,
    /// Whether the whole trace sequence was detached.
    pub record_detached: bool,
}

impl OverflowReport {
    pub fn is_empty(&self) -> bool {
        self.detached_nodes.is_empty() && !self.record_detached
    }
}

#[derive(Default)]
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size of `value` once encoded as a JSON document.
pub fn encoded_len<T: Serialize + ?Sized>(value: &T) -> Result<usize, Error> {
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.0)
}

/// Moves trace data out of records whose encoding exceeds `max_document_bytes`.
///
/// Step logs of oversized nodes go first; if the record is still too large its
/// whole trace sequence follows. A record is only modified once every blob it
/// needs has been stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowPolicy {
    max_document_bytes: usize,
}

impl OverflowPolicy {
    pub fn new(max_document_bytes: usize) -> Self {
        Self { max_document_bytes }
    }

    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    pub fn exceeds<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool, Error> {
        Ok(encoded_len(value)? > self.max_document_bytes)
    }

    pub fn apply(
        &self,
        record: &mut TransactionRecord,
        bucket: &dyn BlobBucket,
    ) -> Result<OverflowReport, Error> {
        let mut report = OverflowReport::default();
        if !self.exceeds(&*record)? {
            return Ok(report);
        }

        let mut staged = record.clone();
        for (index, node) in staged.traces.iter_mut().enumerate() {
            if node.steps.is_empty() || !self.exceeds(&*node)? {
                continue;
            }
            let payload = serde_json::to_vec(&node.steps)?;
            let id = bucket.store(&payload)?;
            tracing::debug!(
                tx_hash = %record.tx_hash,
                node = index,
                bytes = payload.len(),
                blob = %id,
                "detached node step log"
            );
            node.steps = Vec::new();
            node.trace_doc_id = Some(id);
            report.detached_nodes.push(index);
        }

        if self.exceeds(&staged)? {
            let payload = serde_json::to_vec(&staged.traces)?;
            let id = bucket.store(&payload)?;
            tracing::debug!(
                tx_hash = %record.tx_hash,
                bytes = payload.len(),
                blob = %id,
                "detached trace sequence"
            );
            staged.traces = Vec::new();
            staged.trace_doc_id = Some(id);
            report.record_detached = true;

            let bytes = encoded_len(&staged)?;
            if bytes > self.max_document_bytes {
                return Err(Error::Oversized {
                    key: record.tx_hash.clone(),
                    bytes,
                    limit: self.max_document_bytes,
                });
            }
        }

        *record = staged;
        Ok(report)
    }

    /// Re-attaches detached data fetched from `bucket`. The record is left
    /// unchanged if any fetch or decode fails.
    pub fn restore(
        &self,
        record: &mut TransactionRecord,
        bucket: &dyn BlobBucket,
    ) -> Result<(), Error> {
        let mut traces = match &record.trace_doc_id {
            Some(id) => serde_json::from_slice::<Vec<TraceNode>>(&bucket.fetch(id)?)?,
            None => record.traces.clone(),
        };
        for node in &mut traces {
            if let Some(id) = &node.trace_doc_id {
                let steps: Vec<ExecutionStep> = serde_json::from_slice(&bucket.fetch(id)?)?;
                node.steps = steps;
                node.trace_doc_id = None;
            }
        }
        record.traces = traces;
        record.trace_doc_id = None;
        Ok(())
    }
}
