//! Error types for claim trie operations

use thiserror::Error;

use crate::claim::Height;

/// Claim trie error type
#[derive(Debug, Error)]
pub enum Error {
    /// Command would introduce an outpoint already present in the node
    #[error("duplicate outpoint")]
    Duplicate,

    /// Spend or update target is absent from the node
    #[error("claim or support not found")]
    NotFound,

    /// Reset requested above the current head
    #[error("invalid height {requested}: current height is {current}")]
    InvalidHeight {
        /// Height the caller asked for
        requested: Height,
        /// Height of the current head commit
        current: Height,
    },

    /// Claim ID string is not 40 lowercase hex characters
    #[error("claim ID must be a 40-character lowercase hexadecimal string")]
    InvalidClaimId,

    /// Persistent store returned unparseable bytes; caller must restart
    /// from the last good commit
    #[error("corrupt store: {0}")]
    Corruption(String),

    /// Script does not start with a claim opcode
    #[error("not a claim script")]
    NotClaimScript,

    /// Script starts with a claim opcode but does not match any claim shape
    #[error("invalid claim script: {0}")]
    InvalidClaimScript(String),

    /// Storage backend error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Bincode serialization error
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for claim trie operations
pub type Result<T> = std::result::Result<T, Error>;
