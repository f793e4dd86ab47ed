#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::dbg_macro,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::panic,
    )
)]

pub mod contract;
pub mod error;
pub mod exceptions;
pub mod serde_hex;
pub mod storage;
pub mod trace;

pub use contract::ContractCodeRecord;
pub use error::{Error, StorageOp};
pub use exceptions::{ExceptionKind, classify, classify_error};
pub use storage::fs::FsConnection;
pub use storage::memory::MemoryConnection;
pub use storage::overflow::{OverflowPolicy, OverflowReport};
pub use storage::{BlobBucket, Connection, DocumentCollection, StoreConfig, TraceStore};
pub use trace::record::{
    ExternalOutcome, SCHEMA_VERSION, TraceHandle, TransactionAssembler, TransactionRecord,
    TxFields,
};
pub use trace::{
    CallType, ExecutionStep, FrameOutcome, FrameStart, StatusCode, TraceNode, TraceNodeBuilder,
};
