//! In-memory chunk store.

use super::{ChunkStore, StoreError};
use crate::search::types::{ChunkId, ChunkRecord, DocumentId, DocumentRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// In-memory chunk store for testing.
///
/// Stores everything in ordered maps and doesn't persist anything to disk.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<BTreeMap<u64, ChunkRecord>>,
    documents: RwLock<BTreeMap<u64, DocumentRecord>>,
    next_chunk: AtomicU64,
    next_document: AtomicU64,
}

impl InMemoryChunkStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: PoisonError<T>) -> StoreError {
    StoreError::DatabaseError(format!("Lock poisoned: {}", e))
}

#[async_trait::async_trait(?Send)]
impl ChunkStore for InMemoryChunkStore {
    async fn next_chunk_id(&self) -> Result<ChunkId, StoreError> {
        Ok(ChunkId::from_u64(
            self.next_chunk.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    async fn next_document_id(&self) -> Result<DocumentId, StoreError> {
        Ok(DocumentId::from_u64(
            self.next_document.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>, StoreError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.get(&id.as_u64()).cloned())
    }

    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.insert(chunk.id.as_u64(), chunk.clone());
        Ok(())
    }

    async fn delete_chunk(&self, id: ChunkId) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.remove(&id.as_u64());
        Ok(())
    }

    async fn get_chunks_batch(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRecord>, StoreError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| chunks.get(&id.as_u64()).cloned())
            .collect())
    }

    async fn iter_chunks(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.values().cloned().collect())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        let docs = self.documents.read().map_err(poisoned)?;
        Ok(docs.get(&id.as_u64()).cloned())
    }

    async fn put_document(&self, doc: &DocumentRecord) -> Result<(), StoreError> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        docs.insert(doc.id.as_u64(), doc.clone());
        Ok(())
    }

    async fn delete_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let mut docs = self.documents.write().map_err(poisoned)?;
        Ok(docs.remove(&id.as_u64()))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let docs = self.documents.read().map_err(poisoned)?;
        Ok(docs.values().cloned().collect())
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        Ok(self.chunks.read().map_err(poisoned)?.len())
    }

    async fn document_count(&self) -> Result<usize, StoreError> {
        Ok(self.documents.read().map_err(poisoned)?.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.chunks.write().map_err(poisoned)?.clear();
        self.documents.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_chunk(id: u64, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: ChunkId::from_u64(id),
            document_id: DocumentId::from_u64(1),
            ordinal: 0,
            text: text.to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_chunk_crud() {
        let store = InMemoryChunkStore::new();
        let id = ChunkId::from_u64(1);

        assert!(store.get_chunk(id).await.unwrap().is_none());

        store.put_chunk(&make_test_chunk(1, "Hello world")).await.unwrap();
        let retrieved = store.get_chunk(id).await.unwrap().unwrap();
        assert_eq!(retrieved.text, "Hello world");
        assert_eq!(store.get_chunk_text(id).await.unwrap(), "Hello world");

        store.delete_chunk(id).await.unwrap();
        assert!(store.get_chunk(id).await.unwrap().is_none());
        assert!(matches!(
            store.get_chunk_text(id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_get_skips_missing() {
        let store = InMemoryChunkStore::new();
        store.put_chunk(&make_test_chunk(1, "one")).await.unwrap();
        store.put_chunk(&make_test_chunk(3, "three")).await.unwrap();

        let ids = [3, 2, 1].map(ChunkId::from_u64);
        let batch = store.get_chunks_batch(&ids).await.unwrap();
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "one"]);
    }

    #[tokio::test]
    async fn test_ids_monotonic_and_not_reused() {
        let store = InMemoryChunkStore::new();
        let a = store.next_chunk_id().await.unwrap();
        let b = store.next_chunk_id().await.unwrap();
        assert!(b > a);

        store.put_chunk(&make_test_chunk(b.as_u64(), "x")).await.unwrap();
        store.delete_chunk(b).await.unwrap();
        store.clear().await.unwrap();

        let c = store.next_chunk_id().await.unwrap();
        assert!(c > b);
    }

    #[tokio::test]
    async fn test_document_crud() {
        let store = InMemoryChunkStore::new();
        let doc_id = store.next_document_id().await.unwrap();
        let doc = DocumentRecord {
            id: doc_id,
            filename: "notes.md".to_string(),
            chunk_ids: vec![ChunkId::from_u64(1)],
            created_at: 0,
        };
        store.put_document(&doc).await.unwrap();
        assert_eq!(store.document_count().await.unwrap(), 1);
        assert_eq!(store.list_documents().await.unwrap(), vec![doc.clone()]);

        let removed = store.delete_document(doc_id).await.unwrap();
        assert_eq!(removed, Some(doc));
        assert!(store.delete_document(doc_id).await.unwrap().is_none());
    }
}
