use serde::{Deserialize, Serialize};

use crate::trace::record::SCHEMA_VERSION;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Deployed code of one contract and the context that created it.
///
/// Written once when the contract is deployed and keyed by `address`. It is
/// linked to a [`TransactionRecord`](crate::TransactionRecord) only through `tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCodeRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub address: String,
    #[serde(with = "crate::serde_hex")]
    pub code: Vec<u8>,
    pub creator: String,
    pub nonce: u64,
    pub value: String,
    pub gas_limit: u64,
    pub gas_price: String,
    /// Constructor code followed by its ABI-encoded arguments.
    #[serde(with = "crate::serde_hex")]
    pub init: Vec<u8>,
    pub tx_hash: String,
    /// Whether the creating transaction was external rather than an internal CREATE.
    pub external: bool,
}

impl ContractCodeRecord {
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Constructor arguments, given the constructor bytecode length.
    pub fn constructor_args(&self, constructor_len: usize) -> Option<&[u8]> {
        self.init.get(constructor_len..)
    }
}
