use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::exceptions::ExceptionKind;
use crate::trace::{FrameOutcome, FrameStart, StatusCode, TraceNode, TraceNodeBuilder};

/// Current persisted layout of [`TransactionRecord`].
pub const SCHEMA_VERSION: u32 = 1;

/// Failure text given to frames still open when a trace is sealed.
pub const ABORTED_FRAME_MESSAGE: &str = "execution aborted before frame completed";

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Fields of the external transaction, known before tracing starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxFields {
    pub block_num: u64,
    pub tx_index: u64,
    pub nonce: u64,
    pub tx_hash: String,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    pub value: String,
    pub input: Vec<u8>,
    pub gas_limit: u64,
    pub gas_price: String,
}

/// Receipt-level result of the external transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalOutcome {
    pub status_code: StatusCode,
    pub contract_address: Option<String>,
}

/// Root document for one traced external transaction.
///
/// Only [`TransactionAssembler::seal`] produces one, so `num_steps` and
/// `has_exception` always agree with the traces. Fields are read-only outside
/// the crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default = "default_schema_version")]
    pub(crate) schema_version: u32,
    pub(crate) block_num: u64,
    pub(crate) tx_index: u64,
    pub(crate) nonce: u64,
    pub(crate) tx_hash: String,
    pub(crate) from: String,
    pub(crate) to: Option<String>,
    pub(crate) value: String,
    #[serde(with = "crate::serde_hex")]
    pub(crate) input: Vec<u8>,
    pub(crate) gas_limit: u64,
    pub(crate) gas_price: String,
    pub(crate) contract_address: Option<String>,
    pub(crate) status_code: StatusCode,
    /// Steps across every frame, counted before any detachment.
    pub(crate) num_steps: u64,
    /// External failure or any frame with an exception.
    pub(crate) has_exception: bool,
    pub(crate) traces: Vec<TraceNode>,
    /// Blob id holding `traces` once they have been detached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) trace_doc_id: Option<String>,
}

impl TransactionRecord {
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    pub fn tx_index(&self) -> u64 {
        self.tx_index
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_price(&self) -> &str {
        &self.gas_price
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.contract_address.as_deref()
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn num_steps(&self) -> u64 {
        self.num_steps
    }

    pub fn has_exception(&self) -> bool {
        self.has_exception
    }

    /// Frames in entry order; empty once the sequence has been detached.
    pub fn traces(&self) -> &[TraceNode] {
        &self.traces
    }

    pub fn trace_doc_id(&self) -> Option<&str> {
        self.trace_doc_id.as_deref()
    }

    pub fn is_detached(&self) -> bool {
        self.trace_doc_id.is_some()
    }

    /// Kinds of every frame that raised an exception, in traversal order.
    pub fn exception_kinds(&self) -> Vec<ExceptionKind> {
        self.traces
            .iter()
            .map(|node| node.error_code)
            .filter(|kind| kind.is_exception())
            .collect()
    }
}

/// Position of a frame in the record's trace sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceHandle(usize);

impl TraceHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
enum Slot {
    Open(TraceNodeBuilder),
    Closed(TraceNode),
    Finalizing,
}

/// Builds one [`TransactionRecord`] while the interpreter walks the call tree.
///
/// Frames are appended in the order they are entered and closed innermost first,
/// mirroring the interpreter's call stack. Steps always go to the innermost open frame.
#[derive(Debug)]
pub struct TransactionAssembler {
    fields: TxFields,
    slots: Vec<Slot>,
    open: Vec<usize>,
}

impl TransactionAssembler {
    pub fn begin(fields: TxFields) -> Self {
        Self {
            fields,
            slots: Vec::new(),
            open: Vec::new(),
        }
    }

    pub fn tx_hash(&self) -> &str {
        &self.fields.tx_hash
    }

    pub fn open_trace(&mut self, start: FrameStart) -> TraceHandle {
        let builder = TraceNodeBuilder::new(self.open.len() as u64, start);
        self.push_open(builder)
    }

    /// Opens a frame whose step log is not wanted.
    pub fn open_trace_without_steps(&mut self, start: FrameStart) -> TraceHandle {
        let builder = TraceNodeBuilder::new(self.open.len() as u64, start).without_steps();
        self.push_open(builder)
    }

    fn push_open(&mut self, builder: TraceNodeBuilder) -> TraceHandle {
        let index = self.slots.len();
        self.slots.push(Slot::Open(builder));
        self.open.push(index);
        TraceHandle(index)
    }

    fn innermost(&mut self) -> Result<&mut TraceNodeBuilder, Error> {
        let index = self.open.last().copied().ok_or_else(|| Error::Trace {
            reason: format!("no open frame in transaction {}", self.fields.tx_hash),
        })?;
        match self.slots.get_mut(index) {
            Some(Slot::Open(builder)) => Ok(builder),
            _ => Err(Error::Trace {
                reason: format!("frame {index} is not open"),
            }),
        }
    }

    pub fn record_step(
        &mut self,
        pc: u64,
        op_code: impl Into<String>,
        immediate: Option<String>,
        gas_remaining: u64,
    ) -> Result<(), Error> {
        self.innermost()?
            .push_step(pc, op_code, immediate, gas_remaining);
        Ok(())
    }

    /// Finalizes the innermost open frame.
    pub fn close_trace(&mut self, outcome: FrameOutcome) -> Result<TraceHandle, Error> {
        let index = self.open.pop().ok_or_else(|| Error::Trace {
            reason: format!(
                "close without open frame in transaction {}",
                self.fields.tx_hash
            ),
        })?;
        self.finalize_slot(index, outcome);
        Ok(TraceHandle(index))
    }

    fn finalize_slot(&mut self, index: usize, outcome: FrameOutcome) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = match std::mem::replace(slot, Slot::Finalizing) {
                Slot::Open(builder) => Slot::Closed(builder.finish(outcome)),
                other => other,
            };
        }
    }

    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    pub fn trace_count(&self) -> usize {
        self.slots.len()
    }

    /// A closed frame; `None` while it is still open.
    pub fn node(&self, handle: TraceHandle) -> Option<&TraceNode> {
        match self.slots.get(handle.0) {
            Some(Slot::Closed(node)) => Some(node),
            _ => None,
        }
    }

    /// Produces the finished record. Frames left open, e.g. because the
    /// interpreter aborted, are kept and finalized as failed rather than dropped.
    pub fn seal(mut self, outcome: ExternalOutcome) -> TransactionRecord {
        while let Some(index) = self.open.pop() {
            tracing::warn!(
                tx_hash = %self.fields.tx_hash,
                frame = index,
                "finalizing frame left open at seal"
            );
            self.finalize_slot(
                index,
                FrameOutcome::failure(ABORTED_FRAME_MESSAGE, 0),
            );
        }

        let traces: Vec<TraceNode> = self
            .slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Closed(node) => Some(node),
                Slot::Open(_) | Slot::Finalizing => None,
            })
            .collect();

        let num_steps: u64 = traces.iter().map(TraceNode::num_steps).sum();
        let has_exception =
            !outcome.status_code.is_success() || traces.iter().any(TraceNode::has_exception);

        let fields = self.fields;
        tracing::debug!(
            tx_hash = %fields.tx_hash,
            traces = traces.len(),
            num_steps,
            has_exception,
            "sealed transaction record"
        );

        TransactionRecord {
            schema_version: SCHEMA_VERSION,
            block_num: fields.block_num,
            tx_index: fields.tx_index,
            nonce: fields.nonce,
            tx_hash: fields.tx_hash,
            from: fields.from,
            to: fields.to,
            value: fields.value,
            input: fields.input,
            gas_limit: fields.gas_limit,
            gas_price: fields.gas_price,
            contract_address: outcome.contract_address,
            status_code: outcome.status_code,
            num_steps,
            has_exception,
            traces,
            trace_doc_id: None,
        }
    }
}
