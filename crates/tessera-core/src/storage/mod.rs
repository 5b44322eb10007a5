//! Chunk storage: the canonical identity and text of retrievable units.
//!
//! The [`ChunkStore`] trait is the one place chunk ids are minted. Both indexes
//! key their entries by those ids, so the store is the reference that index
//! drift is measured against.
//!
//! # Implementations
//!
//! - [`InMemoryChunkStore`] - HashMap-backed, for tests and ephemeral use
//! - [`RedbChunkStore`] - redb B-tree database on disk

mod chunk_store;
mod redb_store;

pub use chunk_store::InMemoryChunkStore;
pub use redb_store::RedbChunkStore;

use crate::search::types::{ChunkId, ChunkRecord, DocumentId, DocumentRecord};
use thiserror::Error;

/// Errors that can occur during chunk store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Key not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Store not initialized
    #[error("Store not initialized")]
    NotInitialized,
}

/// Store of documents and their chunks.
///
/// # Design Notes
///
/// - Ids come from persisted high-water marks: they increase monotonically and
///   are never handed out twice, even after the highest id is deleted.
/// - Chunks are immutable once written. Deletion happens per document through
///   the write path, which also removes the chunk from both indexes.
/// - No transaction primitives are exposed; each operation is self-contained.
#[async_trait::async_trait(?Send)]
pub trait ChunkStore {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Reserves the next chunk id.
    async fn next_chunk_id(&self) -> Result<ChunkId, StoreError>;

    /// Reserves the next document id.
    async fn next_document_id(&self) -> Result<DocumentId, StoreError>;

    // =========================================================================
    // Chunk Operations
    // =========================================================================

    /// Retrieves a chunk by ID.
    ///
    /// Returns `Ok(None)` if the chunk doesn't exist.
    async fn get_chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>, StoreError>;

    /// Stores a chunk under `chunk.id`.
    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<(), StoreError>;

    /// Deletes a chunk by ID.
    ///
    /// Returns `Ok(())` even if the chunk didn't exist.
    async fn delete_chunk(&self, id: ChunkId) -> Result<(), StoreError>;

    /// Retrieves multiple chunks by ID in a single operation.
    ///
    /// Returns chunks in the same order as the input IDs. Missing chunks
    /// are skipped (not included in output).
    async fn get_chunks_batch(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Returns every chunk, ordered by id.
    ///
    /// Used to rebuild the lexical index at start-up.
    async fn iter_chunks(&self) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Returns the text of one chunk, or `NotFound`.
    async fn get_chunk_text(&self, id: ChunkId) -> Result<String, StoreError> {
        self.get_chunk(id)
            .await?
            .map(|chunk| chunk.text)
            .ok_or_else(|| StoreError::NotFound(format!("chunk {}", id)))
    }

    // =========================================================================
    // Document Operations
    // =========================================================================

    /// Retrieves a document by ID.
    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError>;

    /// Stores a document under `doc.id`.
    async fn put_document(&self, doc: &DocumentRecord) -> Result<(), StoreError>;

    /// Deletes a document record and returns it.
    ///
    /// Does NOT delete the chunks; the write path does that so the indexes
    /// stay aligned.
    async fn delete_document(&self, id: DocumentId)
        -> Result<Option<DocumentRecord>, StoreError>;

    /// Returns every document, ordered by id.
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError>;

    // =========================================================================
    // Utility Operations
    // =========================================================================

    /// Returns the number of chunks in the store.
    async fn chunk_count(&self) -> Result<usize, StoreError>;

    /// Returns the number of documents in the store.
    async fn document_count(&self) -> Result<usize, StoreError>;

    /// Removes all documents and chunks. Id high-water marks are kept.
    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait::async_trait(?Send)]
impl<T: ChunkStore> ChunkStore for std::sync::Arc<T> {
    async fn next_chunk_id(&self) -> Result<ChunkId, StoreError> {
        (**self).next_chunk_id().await
    }

    async fn next_document_id(&self) -> Result<DocumentId, StoreError> {
        (**self).next_document_id().await
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>, StoreError> {
        (**self).get_chunk(id).await
    }

    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<(), StoreError> {
        (**self).put_chunk(chunk).await
    }

    async fn delete_chunk(&self, id: ChunkId) -> Result<(), StoreError> {
        (**self).delete_chunk(id).await
    }

    async fn get_chunks_batch(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRecord>, StoreError> {
        (**self).get_chunks_batch(ids).await
    }

    async fn iter_chunks(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        (**self).iter_chunks().await
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        (**self).get_document(id).await
    }

    async fn put_document(&self, doc: &DocumentRecord) -> Result<(), StoreError> {
        (**self).put_document(doc).await
    }

    async fn delete_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        (**self).delete_document(id).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        (**self).list_documents().await
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        (**self).chunk_count().await
    }

    async fn document_count(&self) -> Result<usize, StoreError> {
        (**self).document_count().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}
