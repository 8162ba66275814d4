use crate::domain::payment::RawAmount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash of the ledger block carrying a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque position in an account's history; queries resume after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

/// An incoming transfer observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTransfer {
    pub amount: RawAmount,
    pub block_hash: BlockHash,
    pub cursor: Cursor,
}
