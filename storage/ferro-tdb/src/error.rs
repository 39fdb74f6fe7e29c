//! Error types for the Ferro TDB storage engine

use crate::dictionary::NodeId;
use std::path::PathBuf;
use thiserror::Error;

/// TDB error type
#[derive(Error, Debug)]
pub enum TdbError {
    /// I/O error from the underlying storage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed term bytes on decode
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// NodeId with no term in this node table
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Term with no NodeId in this node table
    #[error("Term not found: {0}")]
    TermNotFound(String),

    /// Page-structure invariant violated on read
    #[error("Corrupt index {file:?} at page {page}: {reason}")]
    CorruptIndex {
        /// File holding the damaged page
        file: PathBuf,
        /// Page identifier
        page: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Bulk load stopped on malformed input before any index was committed
    #[error("Load aborted ({source_name}{}): {reason}", .line.map(|l| format!(", line {l}")).unwrap_or_default())]
    LoadAborted {
        /// Input name (file path or `<stream>`)
        source_name: String,
        /// 1-based line number, when known
        line: Option<u64>,
        /// Reason for aborting
        reason: String,
    },

    /// Indexes diverged and could not be reconciled
    #[error("Store inconsistent: {0}")]
    Inconsistent(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No store at the given location
    #[error("No store found at {0:?}")]
    StoreNotFound(PathBuf),

    /// A store already exists at the given location
    #[error("Store already exists at {0:?}")]
    StoreExists(PathBuf),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TdbError {
    /// Errors after which the store instance must not be used for writing
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TdbError::CorruptIndex { .. } | TdbError::Inconsistent(_)
        )
    }

    pub(crate) fn corrupt(file: impl Into<PathBuf>, page: u64, reason: impl Into<String>) -> Self {
        TdbError::CorruptIndex {
            file: file.into(),
            page,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for TdbError {
    fn from(err: bincode::Error) -> Self {
        TdbError::Serialization(err.to_string())
    }
}

/// Result type for TDB operations
pub type Result<T> = std::result::Result<T, TdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_aborted_display() {
        let err = TdbError::LoadAborted {
            source_name: "data.nt".to_string(),
            line: Some(7),
            reason: "missing '.'".to_string(),
        };
        assert_eq!(err.to_string(), "Load aborted (data.nt, line 7): missing '.'");

        let err = TdbError::LoadAborted {
            source_name: "<stream>".to_string(),
            line: None,
            reason: "bad term".to_string(),
        };
        assert_eq!(err.to_string(), "Load aborted (<stream>): bad term");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TdbError::corrupt("SPO.idx", 3, "bad checksum").is_fatal());
        assert!(TdbError::Inconsistent("diverged".into()).is_fatal());
        assert!(!TdbError::NodeNotFound(NodeId::new(9)).is_fatal());
    }
}
