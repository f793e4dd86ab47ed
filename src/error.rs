use strum_macros::Display;

/// Storage operation that failed, carried in [`Error::Storage`] so callers can retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageOp {
    Connect,
    Disconnect,
    Insert,
    Store,
    Fetch,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("storage error: {operation} on {target}: {reason}")]
    Storage {
        target: String,
        operation: StorageOp,
        reason: String,
    },

    #[error("document for {key} is {bytes} bytes after detaching traces, limit is {limit}")]
    Oversized {
        key: String,
        bytes: usize,
        limit: usize,
    },

    #[error("trace error: {reason}")]
    Trace { reason: String },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn storage(
        target: impl Into<String>,
        operation: StorageOp,
        reason: impl ToString,
    ) -> Self {
        Self::Storage {
            target: target.into(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Storage and I/O failures are bounded operations a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Io(_))
    }
}
