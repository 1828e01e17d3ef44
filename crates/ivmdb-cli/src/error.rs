//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by the `ivmdb` command.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input file is not valid JSON for the expected shape.
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    /// The engine rejected the query or a change.
    #[error("{0}")]
    Engine(#[from] ivmdb_core::Error),

    /// A scenario change failed in a specific transaction.
    #[error("transaction {transaction}: {source}")]
    Transaction {
        transaction: usize,
        #[source]
        source: ivmdb_core::Error,
    },
}

pub type Result<T> = std::result::Result<T, CliError>;
