//! Single write path for the chunk store and both indexes.
//!
//! The chunk store and the vector index share one id space, so every mutation
//! goes through [`IndexWriter`], which performs the store write and both index
//! writes as one ordered operation and names the step that failed. Holding an
//! `IndexWriter` means holding the orchestrator's writer lock: there is at most
//! one writer at a time, and the vector index is persisted inside it.

use crate::error::RetrievalError;
use crate::generation::{Embedder, ModelHandle};
use crate::search::lexical::LexicalIndex;
use crate::search::types::{
    get_current_timestamp, normalize, validate_dimension, ChunkId, ChunkRecord, DocumentId,
    DocumentRecord,
};
use crate::search::vector::VectorIndex;
use crate::storage::{ChunkStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::MutexGuard;
use tracing::{info, instrument, warn};

/// Step of a write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    Validate,
    Embed,
    Store,
    VectorIndex,
    LexicalIndex,
    Persist,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Validate => "validate",
            WriteStage::Embed => "embed",
            WriteStage::Store => "chunk store write",
            WriteStage::VectorIndex => "vector index write",
            WriteStage::LexicalIndex => "lexical index write",
            WriteStage::Persist => "vector index persist",
        };
        f.write_str(name)
    }
}

/// A failed write and the step it failed at.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed: {source}")]
pub struct WriteError {
    pub stage: WriteStage,
    pub source: RetrievalError,
}

impl WriteError {
    fn at(stage: WriteStage) -> impl FnOnce(RetrievalError) -> WriteError {
        move |source| WriteError { stage, source }
    }
}

fn lock_err<T>(e: PoisonError<T>) -> RetrievalError {
    RetrievalError::IndexUnavailable(format!("Index lock poisoned: {}", e))
}

/// Exclusive writer over the chunk store and both indexes.
///
/// Obtained from [`RetrievalOrchestrator::writer`](super::RetrievalOrchestrator::writer).
pub struct IndexWriter<'a, S: ChunkStore, E: Embedder> {
    pub(super) store: &'a S,
    pub(super) embedder: &'a E,
    pub(super) models: &'a ModelHandle,
    pub(super) lexical: &'a RwLock<LexicalIndex>,
    pub(super) vector: &'a RwLock<VectorIndex>,
    pub(super) vector_path: Option<&'a Path>,
    pub(super) _guard: MutexGuard<'a, ()>,
}

impl<'a, S: ChunkStore, E: Embedder> IndexWriter<'a, S, E> {
    /// Adds a pre-chunked document.
    ///
    /// Order: embed every chunk (nothing is written if any embedding fails),
    /// allocate ids, write the document and its chunks to the store, add the
    /// vectors, add the lexical entries, persist the vector index. If an index
    /// write or the persist fails, the store rows and every index entry already
    /// added are rolled back before the error is returned.
    ///
    /// Blank chunks are skipped. Each chunk's metadata is `metadata` plus
    /// `chunk_index`.
    #[must_use = "Document record should be stored or errors handled"]
    #[instrument(skip_all, fields(filename = %filename, chunks = chunks.len()))]
    pub async fn add_document(
        &self,
        filename: &str,
        chunks: &[String],
        metadata: &BTreeMap<String, String>,
    ) -> Result<DocumentRecord, WriteError> {
        let texts: Vec<&str> = chunks
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if texts.is_empty() {
            return Err(WriteError {
                stage: WriteStage::Validate,
                source: RetrievalError::InvalidQuery(format!("{} has no non-empty chunks", filename)),
            });
        }

        let snapshot = self.models.snapshot().map_err(WriteError::at(WriteStage::Validate))?;
        let model_dim = snapshot.config.embedding_dim;
        let index_dim = self
            .vector
            .read()
            .map_err(lock_err)
            .map_err(WriteError::at(WriteStage::Validate))?
            .dimension();
        if let Some(expected) = index_dim {
            validate_dimension(expected, model_dim).map_err(WriteError::at(WriteStage::Validate))?;
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in &texts {
            let mut embedding = self
                .embedder
                .embed(&snapshot.config, text)
                .await
                .map_err(WriteError::at(WriteStage::Embed))?;
            validate_dimension(index_dim.unwrap_or(model_dim), embedding.len())
                .map_err(WriteError::at(WriteStage::Embed))?;
            normalize(&mut embedding);
            embeddings.push(embedding);
        }

        let record = self.write_store(filename, &texts, metadata).await?;

        if let Err(source) = self.add_vectors(&record.chunk_ids, embeddings) {
            self.rollback(&record).await;
            return Err(WriteError {
                stage: WriteStage::VectorIndex,
                source,
            });
        }

        let lexical_result = self.lexical.write().map_err(lock_err).and_then(|mut lexical| {
            for (chunk_id, text) in record.chunk_ids.iter().zip(&texts) {
                lexical.add(*chunk_id, text.to_string())?;
            }
            Ok(())
        });
        if let Err(source) = lexical_result {
            self.rollback(&record).await;
            return Err(WriteError {
                stage: WriteStage::LexicalIndex,
                source,
            });
        }

        if let Err(e) = self.persist() {
            self.rollback(&record).await;
            return Err(e);
        }

        info!(
            "Indexed {} ({} chunks) as document {}",
            record.filename,
            record.chunk_ids.len(),
            record.id
        );
        Ok(record)
    }

    async fn write_store(
        &self,
        filename: &str,
        texts: &[&str],
        metadata: &BTreeMap<String, String>,
    ) -> Result<DocumentRecord, WriteError> {
        let store_err = |e: StoreError| WriteError {
            stage: WriteStage::Store,
            source: RetrievalError::from(e),
        };

        let document_id = self.store.next_document_id().await.map_err(store_err)?;
        let mut chunk_ids = Vec::with_capacity(texts.len());
        for _ in texts {
            chunk_ids.push(self.store.next_chunk_id().await.map_err(store_err)?);
        }

        let record = DocumentRecord {
            id: document_id,
            filename: filename.to_string(),
            chunk_ids: chunk_ids.clone(),
            created_at: get_current_timestamp(),
        };
        self.store.put_document(&record).await.map_err(store_err)?;

        for (ordinal, (chunk_id, text)) in chunk_ids.iter().zip(texts).enumerate() {
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert("chunk_index".to_string(), ordinal.to_string());
            let chunk = ChunkRecord {
                id: *chunk_id,
                document_id,
                ordinal,
                text: text.to_string(),
                metadata: chunk_metadata,
            };
            if let Err(e) = self.store.put_chunk(&chunk).await {
                self.rollback(&record).await;
                return Err(store_err(e));
            }
        }
        Ok(record)
    }

    fn add_vectors(&self, chunk_ids: &[ChunkId], embeddings: Vec<Vec<f32>>) -> Result<(), RetrievalError> {
        let mut vector = self.vector.write().map_err(lock_err)?;
        for (i, (chunk_id, embedding)) in chunk_ids.iter().zip(embeddings).enumerate() {
            if let Err(e) = vector.add(*chunk_id, embedding) {
                for added in &chunk_ids[..i] {
                    vector.remove(*added);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Best-effort undo of a partially written document.
    async fn rollback(&self, record: &DocumentRecord) {
        if let Ok(mut vector) = self.vector.write() {
            for chunk_id in &record.chunk_ids {
                vector.remove(*chunk_id);
            }
        }
        if let Ok(mut lexical) = self.lexical.write() {
            if let Err(e) = lexical.remove(&record.chunk_ids) {
                warn!("Rollback of lexical entries for document {} failed: {}", record.id, e);
            }
        }
        for chunk_id in &record.chunk_ids {
            if let Err(e) = self.store.delete_chunk(*chunk_id).await {
                warn!("Rollback of chunk {} failed: {}", chunk_id, e);
            }
        }
        if let Err(e) = self.store.delete_document(record.id).await {
            warn!("Rollback of document {} failed: {}", record.id, e);
        }
    }

    /// Deletes a document and all its chunks from both indexes and the store.
    ///
    /// Index entries go first so a concurrent query never fuses a chunk whose
    /// row is already gone. Returns `None` if the document does not exist.
    #[instrument(skip_all, fields(document_id = %document_id))]
    pub async fn delete_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<DocumentRecord>, WriteError> {
        let store_err = |e: StoreError| WriteError {
            stage: WriteStage::Store,
            source: RetrievalError::from(e),
        };

        let Some(record) = self.store.get_document(document_id).await.map_err(store_err)? else {
            return Ok(None);
        };

        {
            let mut vector = self
                .vector
                .write()
                .map_err(lock_err)
                .map_err(WriteError::at(WriteStage::VectorIndex))?;
            for chunk_id in &record.chunk_ids {
                vector.remove(*chunk_id);
            }
        }

        self.lexical
            .write()
            .map_err(lock_err)
            .and_then(|mut lexical| lexical.remove(&record.chunk_ids))
            .map_err(WriteError::at(WriteStage::LexicalIndex))?;

        for chunk_id in &record.chunk_ids {
            self.store.delete_chunk(*chunk_id).await.map_err(store_err)?;
        }
        self.store.delete_document(document_id).await.map_err(store_err)?;

        self.persist()?;

        info!(
            "Deleted document {} ({}, {} chunks)",
            record.id,
            record.filename,
            record.chunk_ids.len()
        );
        Ok(Some(record))
    }

    /// Rebuilds the vector graph without tombstones and persists it.
    pub fn compact(&self) -> Result<usize, WriteError> {
        let removed = {
            let mut vector = self
                .vector
                .write()
                .map_err(lock_err)
                .map_err(WriteError::at(WriteStage::VectorIndex))?;
            let before = vector.tombstone_count();
            vector.compact();
            before
        };
        self.persist()?;
        Ok(removed)
    }

    /// Drops every document, chunk and index entry, and unfixes the vector
    /// dimension so the next write may use a different embedding model.
    ///
    /// Indexes are emptied before the store so no query fuses a chunk whose
    /// row is gone. Returns the number of documents removed.
    #[instrument(skip_all)]
    pub async fn reset(&self) -> Result<usize, WriteError> {
        let store_err = |e: StoreError| WriteError {
            stage: WriteStage::Store,
            source: RetrievalError::from(e),
        };
        let documents = self.store.document_count().await.map_err(store_err)?;

        *self
            .vector
            .write()
            .map_err(lock_err)
            .map_err(WriteError::at(WriteStage::VectorIndex))? = VectorIndex::new();
        *self
            .lexical
            .write()
            .map_err(lock_err)
            .map_err(WriteError::at(WriteStage::LexicalIndex))? = LexicalIndex::new();

        self.store.clear().await.map_err(store_err)?;
        self.persist()?;

        info!("Reset index, removed {} documents", documents);
        Ok(documents)
    }

    fn persist(&self) -> Result<(), WriteError> {
        let Some(path) = self.vector_path else {
            return Ok(());
        };
        let vector = self
            .vector
            .read()
            .map_err(lock_err)
            .map_err(WriteError::at(WriteStage::Persist))?;
        vector.persist(path).map_err(WriteError::at(WriteStage::Persist))
    }
}
