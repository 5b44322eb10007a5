//! Redb-backed chunk store.
//!
//! Uses [redb](https://github.com/cberner/redb), a pure Rust, ACID-compliant
//! embedded B-tree database.
//!
//! # Tables
//!
//! - `chunks`: ChunkId (u64) -> ChunkRecord (JSON)
//! - `documents`: DocumentId (u64) -> DocumentRecord (JSON)
//! - `counters`: name (string) -> last issued id (u64)

use super::{ChunkStore, StoreError};
use crate::search::types::{ChunkId, ChunkRecord, DocumentId, DocumentRecord};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type RecordTable = TableDefinition<'static, u64, &'static [u8]>;

const CHUNKS_TABLE: RecordTable = TableDefinition::new("chunks");
const DOCUMENTS_TABLE: RecordTable = TableDefinition::new("documents");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const CHUNK_COUNTER: &str = "chunk";
const DOCUMENT_COUNTER: &str = "document";

fn db_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::DatabaseError(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value)
        .map_err(|e| StoreError::SerializationError(format!("Failed to serialize: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::SerializationError(format!("Failed to deserialize: {}", e)))
}

/// Redb-backed chunk store for native platforms.
///
/// # Example
///
/// ```ignore
/// use tessera_core::storage::{ChunkStore, RedbChunkStore};
///
/// let store = RedbChunkStore::open("./data/chunks.redb")?;
/// let id = store.next_chunk_id().await?;
/// ```
pub struct RedbChunkStore {
    db: Arc<Database>,
}

impl RedbChunkStore {
    /// Opens or creates a redb database at the given path.
    ///
    /// Creates the database file and all required tables if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| StoreError::IoError(format!("Failed to open database: {}", e)))?;

        let write_txn = db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        write_txn
            .open_table(CHUNKS_TABLE)
            .map_err(db_err("Failed to create chunks table"))?;
        write_txn
            .open_table(DOCUMENTS_TABLE)
            .map_err(db_err("Failed to create documents table"))?;
        write_txn
            .open_table(COUNTERS_TABLE)
            .map_err(db_err("Failed to create counters table"))?;
        write_txn
            .commit()
            .map_err(db_err("Failed to commit table creation"))?;

        debug!("Opened chunk store at {}", path.as_ref().display());
        Ok(Self { db: Arc::new(db) })
    }

    /// Increments a named counter and returns the new value.
    fn bump_counter(&self, name: &str) -> Result<u64, StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        let next = {
            let mut table = write_txn
                .open_table(COUNTERS_TABLE)
                .map_err(db_err("Failed to open counters table"))?;
            let current = table
                .get(name)
                .map_err(db_err("Failed to read counter"))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let next = current + 1;
            table
                .insert(name, next)
                .map_err(db_err("Failed to write counter"))?;
            next
        };
        write_txn
            .commit()
            .map_err(db_err("Failed to commit counter"))?;
        Ok(next)
    }

    fn get_record<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
        key: u64,
    ) -> Result<Option<T>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(db_err("Failed to open table"))?;
        match table.get(key).map_err(db_err("Failed to get record"))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_record(
        &self,
        table_def: RecordTable,
        key: u64,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(db_err("Failed to open table"))?;
            table
                .insert(key, bytes)
                .map_err(db_err("Failed to insert record"))?;
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit record"))
    }

    fn remove_record(
        &self,
        table_def: RecordTable,
        key: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        let removed = {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(db_err("Failed to open table"))?;
            let removed = table
                .remove(key)
                .map_err(db_err("Failed to remove record"))?;
            removed.map(|guard| guard.value().to_vec())
        };
        write_txn
            .commit()
            .map_err(db_err("Failed to commit removal"))?;
        Ok(removed)
    }

    fn all_records<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
    ) -> Result<Vec<T>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(db_err("Failed to open table"))?;
        let mut records = Vec::new();
        for entry in table.iter().map_err(db_err("Failed to iterate table"))? {
            let (_, value) = entry.map_err(db_err("Failed to read entry"))?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn count(&self, table_def: RecordTable) -> Result<usize, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(db_err("Failed to open table"))?;
        let count = table.len().map_err(db_err("Failed to count table"))?;
        Ok(count as usize)
    }
}

#[async_trait::async_trait(?Send)]
impl ChunkStore for RedbChunkStore {
    async fn next_chunk_id(&self) -> Result<ChunkId, StoreError> {
        self.bump_counter(CHUNK_COUNTER).map(ChunkId::from_u64)
    }

    async fn next_document_id(&self) -> Result<DocumentId, StoreError> {
        self.bump_counter(DOCUMENT_COUNTER).map(DocumentId::from_u64)
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<Option<ChunkRecord>, StoreError> {
        self.get_record(CHUNKS_TABLE, id.as_u64())
    }

    async fn put_chunk(&self, chunk: &ChunkRecord) -> Result<(), StoreError> {
        let bytes = encode(chunk)?;
        self.put_record(CHUNKS_TABLE, chunk.id.as_u64(), &bytes)
    }

    async fn delete_chunk(&self, id: ChunkId) -> Result<(), StoreError> {
        self.remove_record(CHUNKS_TABLE, id.as_u64()).map(|_| ())
    }

    async fn get_chunks_batch(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRecord>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(CHUNKS_TABLE)
            .map_err(db_err("Failed to open chunks table"))?;

        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table
                .get(id.as_u64())
                .map_err(db_err("Failed to get chunk"))?
            {
                chunks.push(decode(guard.value())?);
            }
        }
        Ok(chunks)
    }

    async fn iter_chunks(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        self.all_records(CHUNKS_TABLE)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        self.get_record(DOCUMENTS_TABLE, id.as_u64())
    }

    async fn put_document(&self, doc: &DocumentRecord) -> Result<(), StoreError> {
        let bytes = encode(doc)?;
        self.put_record(DOCUMENTS_TABLE, doc.id.as_u64(), &bytes)
    }

    async fn delete_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        match self.remove_record(DOCUMENTS_TABLE, id.as_u64())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        self.all_records(DOCUMENTS_TABLE)
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        self.count(CHUNKS_TABLE)
    }

    async fn document_count(&self) -> Result<usize, StoreError> {
        self.count(DOCUMENTS_TABLE)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        // Counters survive so ids are never reissued.
        write_txn
            .delete_table(CHUNKS_TABLE)
            .map_err(db_err("Failed to drop chunks table"))?;
        write_txn
            .delete_table(DOCUMENTS_TABLE)
            .map_err(db_err("Failed to drop documents table"))?;
        write_txn
            .open_table(CHUNKS_TABLE)
            .map_err(db_err("Failed to recreate chunks table"))?;
        write_txn
            .open_table(DOCUMENTS_TABLE)
            .map_err(db_err("Failed to recreate documents table"))?;
        write_txn
            .commit()
            .map_err(db_err("Failed to commit clear"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbChunkStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = RedbChunkStore::open(&db_path).unwrap();
        (store, temp_dir)
    }

    fn make_test_chunk(id: u64, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: ChunkId::from_u64(id),
            document_id: DocumentId::from_u64(1),
            ordinal: id as usize,
            text: text.to_string(),
            metadata: [("page".to_string(), "3".to_string())].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_chunk_crud() {
        let (store, _dir) = create_test_store();
        let id = ChunkId::from_u64(1);

        assert!(store.get_chunk(id).await.unwrap().is_none());
        store.put_chunk(&make_test_chunk(1, "Hello world")).await.unwrap();

        let chunk = store.get_chunk(id).await.unwrap().unwrap();
        assert_eq!(chunk, make_test_chunk(1, "Hello world"));
        assert_eq!(store.chunk_count().await.unwrap(), 1);

        store.delete_chunk(id).await.unwrap();
        assert!(store.get_chunk(id).await.unwrap().is_none());
        assert_eq!(store.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_and_iter() {
        let (store, _dir) = create_test_store();
        for (id, text) in [(3, "c"), (1, "a"), (2, "b")] {
            store.put_chunk(&make_test_chunk(id, text)).await.unwrap();
        }

        let batch = store
            .get_chunks_batch(&[ChunkId::from_u64(2), ChunkId::from_u64(9)])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text, "b");

        let all: Vec<u64> = store
            .iter_chunks()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id.as_u64())
            .collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_document_delete_returns_record() {
        let (store, _dir) = create_test_store();
        let doc = DocumentRecord {
            id: DocumentId::from_u64(4),
            filename: "paper.pdf".to_string(),
            chunk_ids: vec![ChunkId::from_u64(1), ChunkId::from_u64(2)],
            created_at: 10,
        };
        store.put_document(&doc).await.unwrap();
        assert_eq!(store.list_documents().await.unwrap(), vec![doc.clone()]);

        assert_eq!(store.delete_document(doc.id).await.unwrap(), Some(doc));
        assert_eq!(store.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_counters() {
        let (store, _dir) = create_test_store();
        let first = store.next_chunk_id().await.unwrap();
        store.put_chunk(&make_test_chunk(first.as_u64(), "x")).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        assert!(store.next_chunk_id().await.unwrap() > first);
    }

    #[tokio::test]
    async fn test_persistence_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("persist.redb");

        let issued = {
            let store = RedbChunkStore::open(&db_path).unwrap();
            let id = store.next_chunk_id().await.unwrap();
            store.put_chunk(&make_test_chunk(id.as_u64(), "Persisted")).await.unwrap();
            id
        };

        {
            let store = RedbChunkStore::open(&db_path).unwrap();
            assert_eq!(store.get_chunk_text(issued).await.unwrap(), "Persisted");
            assert!(store.next_chunk_id().await.unwrap() > issued);
            assert_eq!(store.next_document_id().await.unwrap(), DocumentId::from_u64(1));
        }
    }
}
