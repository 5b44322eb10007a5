//! Error types for tessera-core.
//!
//! [`RetrievalError`] is the taxonomy every query and index operation reports
//! through. Each variant carries the ids or dimensions involved so a caller can
//! pick a remedy from [`RetrievalError::kind`] without parsing the message.

use crate::search::types::ChunkId;
use crate::storage::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the indexes, the chunk store, and the query orchestrator.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// Backing index or store has not been initialized.
    ///
    /// Recoverable by re-initializing (for example rebuilding the lexical index).
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Vector length disagrees with the index's fixed dimension.
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted index data is missing or unreadable. Requires a rebuild.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// A chunk id is already present in the vector index.
    #[error("Chunk {0} is already indexed; remove it before re-adding")]
    DuplicateId(ChunkId),

    /// A fused chunk id has no row in the chunk store.
    #[error("Chunk {0} is referenced by an index but missing from the chunk store")]
    OrphanedVectorReference(ChunkId),

    /// The embedding collaborator failed. Transient.
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The generation collaborator failed. Transient.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The generation collaborator did not answer in time.
    #[error("Generation timed out after {timeout_ms} ms")]
    GenerationTimeout { timeout_ms: u64 },

    /// An answer cites chunks outside the allow-list.
    #[error("Answer cites chunks outside the allow-list: {invalid_ids:?}")]
    InvalidCitation { invalid_ids: Vec<ChunkId> },

    /// Query rejected before dispatch.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Chunk store failure.
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

/// Machine-readable discriminant of [`RetrievalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    IndexUnavailable,
    DimensionMismatch,
    IndexCorrupt,
    DuplicateId,
    OrphanedVectorReference,
    EmbeddingFailed,
    GenerationFailed,
    GenerationTimeout,
    InvalidCitation,
    InvalidQuery,
    Storage,
}

impl RetrievalError {
    /// Returns the structured kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::IndexCorrupt(_) => ErrorKind::IndexCorrupt,
            Self::DuplicateId(_) => ErrorKind::DuplicateId,
            Self::OrphanedVectorReference(_) => ErrorKind::OrphanedVectorReference,
            Self::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            Self::GenerationFailed(_) => ErrorKind::GenerationFailed,
            Self::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            Self::InvalidCitation { .. } => ErrorKind::InvalidCitation,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for transient collaborator failures. The orchestrator never retries;
    /// callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingFailed(_) | Self::GenerationFailed(_) | Self::GenerationTimeout { .. }
        )
    }

    /// True for errors that abort a query at the index layer.
    pub fn is_index_fault(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable(_) | Self::DimensionMismatch { .. } | Self::IndexCorrupt(_)
        )
    }

    /// `GenerationTimeout` counts as a generation failure with its own reason.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed(_) | Self::GenerationTimeout { .. }
        )
    }
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotInitialized => {
                RetrievalError::IndexUnavailable("chunk store not initialized".to_string())
            }
            other => RetrievalError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_names_both_dimensions() {
        let err = RetrievalError::DimensionMismatch {
            expected: 1024,
            actual: 768,
        };
        let msg = err.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("768"));
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert!(err.is_index_fault());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_generation_failure() {
        let err = RetrievalError::GenerationTimeout { timeout_ms: 500 };
        assert!(err.is_generation_failure());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::GenerationTimeout);
    }

    #[test]
    fn test_store_not_initialized_maps_to_unavailable() {
        let err: RetrievalError = StoreError::NotInitialized.into();
        assert_eq!(err.kind(), ErrorKind::IndexUnavailable);

        let err: RetrievalError = StoreError::IoError("disk".into()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::OrphanedVectorReference).unwrap();
        assert_eq!(json, "\"orphaned_vector_reference\"");
    }
}
