// rust-cv/hnsw inner-product search keyed by chunk id, with redb persistence

use super::types::{validate_dimension, ChunkId, VectorHit};
use crate::config::MIN_EF_SEARCH;
use crate::error::RetrievalError;
use hnsw::{Hnsw, Searcher};
use rand::rngs::StdRng;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use space::{Metric, Neighbor};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument};

const VECTORS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const MANIFEST_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("manifest");
const MANIFEST_KEY: &str = "vector_index";

/// Current on-disk schema version.
const SCHEMA_VERSION: u32 = 1;

/// Inner-product distance for unit vectors: `1 - dot`, scaled to u32.
///
/// Vectors are expected to be unit-normalized by the caller, so `dot` is the
/// cosine similarity and the distance lies in [0, 2].
struct InnerProductDistance;

impl Metric<Box<[f32]>> for InnerProductDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let distance = (1.0 - dot(a, b)).clamp(0.0, 2.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

type Graph = Hnsw<InnerProductDistance, Box<[f32]>, StdRng, 16, 32>;

/// Persisted description of a vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorManifest {
    schema_version: u32,
    dimension: Option<usize>,
    count: usize,
}

/// Dense similarity index over chunk embeddings.
///
/// The dimension is fixed by the first insert (or at construction with
/// [`with_dimension`](Self::with_dimension)); every later insert and every
/// query must match it exactly. The index never normalizes: callers pass
/// unit vectors (see [`normalize`](super::types::normalize)) so inner product
/// equals cosine similarity.
///
/// # HNSW Parameters
///
/// - **M = 16**: bidirectional links per node at layers > 0
/// - **M0 = 32**: links at layer 0 (2*M)
///
/// Deletion is a tombstone: the node stays in the graph but is filtered from
/// results, and the chunk id becomes free to re-add. [`compact`](Self::compact)
/// rebuilds the graph without tombstoned nodes.
///
/// # Thread Safety
///
/// Search takes `&self` and allocates its own searcher, so concurrent readers
/// only need shared access. Mutation and [`persist`](Self::persist) need
/// exclusive access; the orchestrator serializes them behind one write lock.
pub struct VectorIndex {
    graph: Graph,
    /// Graph node -> chunk id
    slots: Vec<ChunkId>,
    /// Graph node -> vector (kept for exact scoring and persistence)
    vectors: Vec<Box<[f32]>>,
    /// Live chunk id -> graph node
    positions: HashMap<ChunkId, usize>,
    /// Soft-deleted graph nodes
    tombstones: HashSet<usize>,
    dimension: Option<usize>,
}

impl VectorIndex {
    /// Creates an empty index whose dimension is fixed by the first insert.
    pub fn new() -> Self {
        Self {
            graph: Hnsw::new(InnerProductDistance),
            slots: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
            tombstones: HashSet::new(),
            dimension: None,
        }
    }

    /// Creates an empty index with a fixed dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        let mut index = Self::new();
        index.dimension = Some(dimension);
        index
    }

    /// Fixed dimension, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Adds a chunk embedding.
    ///
    /// # Errors
    ///
    /// - `DimensionMismatch` if the vector length disagrees with the fixed dimension
    /// - `DuplicateId` if the chunk is already present
    ///
    /// On error the index is unchanged.
    #[instrument(skip_all, fields(chunk_id = %chunk_id, index_size = self.positions.len()))]
    pub fn add(&mut self, chunk_id: ChunkId, vector: Vec<f32>) -> Result<(), RetrievalError> {
        if vector.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "embedding vector is empty".to_string(),
            ));
        }
        if let Some(expected) = self.dimension {
            validate_dimension(expected, vector.len())?;
        }
        if self.positions.contains_key(&chunk_id) {
            return Err(RetrievalError::DuplicateId(chunk_id));
        }

        self.dimension.get_or_insert(vector.len());
        let boxed = vector.into_boxed_slice();
        let mut searcher = Searcher::default();
        let node = self.graph.insert(boxed.clone(), &mut searcher);
        debug_assert_eq!(node, self.slots.len());

        self.slots.push(chunk_id);
        self.vectors.push(boxed);
        self.positions.insert(chunk_id, node);
        Ok(())
    }

    /// Removes a chunk. Returns `false` if it was not present.
    pub fn remove(&mut self, chunk_id: ChunkId) -> bool {
        match self.positions.remove(&chunk_id) {
            Some(node) => {
                self.tombstones.insert(node);
                true
            }
            None => false,
        }
    }

    /// Returns true if the chunk has a live vector.
    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.positions.contains_key(&chunk_id)
    }

    /// Returns the stored vector for a chunk.
    pub fn get(&self, chunk_id: ChunkId) -> Option<&[f32]> {
        self.positions
            .get(&chunk_id)
            .map(|&node| self.vectors[node].as_ref())
    }

    /// Live chunk ids in ascending order.
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.positions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Searches for the `k` chunks most similar to `query`.
    ///
    /// Results are ordered by descending inner product; equal scores are
    /// ordered by ascending chunk id.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query length disagrees with the
    /// fixed dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, RetrievalError> {
        let Some(expected) = self.dimension else {
            return Ok(Vec::new());
        };
        validate_dimension(expected, query.len())?;

        if self.positions.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch by the tombstone count so filtering cannot starve the result.
        let wanted = std::cmp::min(k + self.tombstones.len(), self.slots.len());
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0
            };
            wanted
        ];
        let ef_search = std::cmp::max(wanted * 2, MIN_EF_SEARCH);
        let query_box: Box<[f32]> = query.to_vec().into_boxed_slice();
        let mut searcher = Searcher::default();
        let found = self
            .graph
            .nearest(&query_box, ef_search, &mut searcher, &mut neighbors)
            .len();

        let mut hits: Vec<VectorHit> = neighbors[..found]
            .iter()
            .filter(|n| n.index != !0)
            .filter(|n| !self.tombstones.contains(&n.index))
            .map(|n| VectorHit {
                chunk_id: self.slots[n.index],
                score: dot(query, &self.vectors[n.index]),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if no live vectors are indexed.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of tombstoned graph nodes.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Rebuilds the graph from live vectors, dropping tombstoned nodes.
    pub fn compact(&mut self) {
        if self.tombstones.is_empty() {
            return;
        }
        let dimension = self.dimension;
        let live: Vec<(ChunkId, Box<[f32]>)> = self
            .chunk_ids()
            .into_iter()
            .filter_map(|id| self.get(id).map(|v| (id, Box::<[f32]>::from(v))))
            .collect();
        let removed = self.tombstones.len();

        *self = Self::new();
        self.dimension = dimension;
        for (chunk_id, vector) in live {
            let mut searcher = Searcher::default();
            let node = self.graph.insert(vector.clone(), &mut searcher);
            self.slots.push(chunk_id);
            self.vectors.push(vector);
            self.positions.insert(chunk_id, node);
        }
        info!("Compacted vector index, dropped {} tombstones", removed);
    }

    /// Writes every live vector and the fixed dimension to a redb file.
    ///
    /// The rewrite happens in one write transaction, so a crash leaves either
    /// the previous or the new contents. Callers hold the index write lock for
    /// the duration; two concurrent persists to one file are not supported.
    #[instrument(skip_all, fields(vectors = self.positions.len()))]
    pub fn persist(&self, path: &Path) -> Result<(), RetrievalError> {
        let db = Database::create(path).map_err(|e| {
            RetrievalError::IndexUnavailable(format!(
                "Failed to open vector index file {}: {}",
                path.display(),
                e
            ))
        })?;

        let manifest = VectorManifest {
            schema_version: SCHEMA_VERSION,
            dimension: self.dimension,
            count: self.positions.len(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| {
            RetrievalError::IndexCorrupt(format!("Failed to serialize manifest: {}", e))
        })?;

        let write_txn = db.begin_write().map_err(write_err)?;
        {
            write_txn.delete_table(VECTORS_TABLE).map_err(write_err)?;
            let mut vectors = write_txn.open_table(VECTORS_TABLE).map_err(write_err)?;
            for chunk_id in self.chunk_ids() {
                if let Some(vector) = self.get(chunk_id) {
                    let bytes = serialize_vector(vector);
                    vectors
                        .insert(chunk_id.as_u64(), bytes.as_slice())
                        .map_err(write_err)?;
                }
            }

            let mut meta = write_txn.open_table(MANIFEST_TABLE).map_err(write_err)?;
            meta.insert(MANIFEST_KEY, manifest_bytes.as_slice())
                .map_err(write_err)?;
        }
        write_txn.commit().map_err(write_err)?;

        debug!("Persisted {} vectors to {}", manifest.count, path.display());
        Ok(())
    }

    /// Loads an index written by [`persist`](Self::persist).
    ///
    /// # Errors
    ///
    /// `IndexCorrupt` if the file is missing, empty, unreadable, lacks a
    /// manifest, or holds vectors that disagree with the manifest.
    #[instrument(skip_all)]
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        if !path.exists() {
            return Err(RetrievalError::IndexCorrupt(format!(
                "No vector index at {}",
                path.display()
            )));
        }
        let db = Database::open(path).map_err(|e| {
            RetrievalError::IndexCorrupt(format!(
                "Unreadable vector index {}: {}",
                path.display(),
                e
            ))
        })?;
        let read_txn = db.begin_read().map_err(corrupt_err)?;

        let meta = read_txn.open_table(MANIFEST_TABLE).map_err(corrupt_err)?;
        let manifest_guard = meta
            .get(MANIFEST_KEY)
            .map_err(corrupt_err)?
            .ok_or_else(|| RetrievalError::IndexCorrupt("Missing manifest".to_string()))?;
        let manifest: VectorManifest =
            serde_json::from_slice(manifest_guard.value()).map_err(corrupt_err)?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(RetrievalError::IndexCorrupt(format!(
                "Unsupported schema version {}",
                manifest.schema_version
            )));
        }

        let mut index = Self::new();
        index.dimension = manifest.dimension;

        let vectors = read_txn.open_table(VECTORS_TABLE).map_err(corrupt_err)?;
        for entry in vectors.iter().map_err(corrupt_err)? {
            let (key, value) = entry.map_err(corrupt_err)?;
            let chunk_id = ChunkId::from_u64(key.value());
            let vector = deserialize_vector(value.value()).ok_or_else(|| {
                RetrievalError::IndexCorrupt(format!("Truncated vector for chunk {}", chunk_id))
            })?;
            match manifest.dimension {
                Some(dim) if dim == vector.len() => {}
                _ => {
                    return Err(RetrievalError::IndexCorrupt(format!(
                        "Vector for chunk {} has length {}, manifest says {:?}",
                        chunk_id,
                        vector.len(),
                        manifest.dimension
                    )))
                }
            }
            index.add(chunk_id, vector)?;
        }

        if index.len() != manifest.count {
            return Err(RetrievalError::IndexCorrupt(format!(
                "Manifest lists {} vectors, found {}",
                manifest.count,
                index.len()
            )));
        }

        info!(
            "Loaded vector index: {} vectors, dimension {:?}",
            index.len(),
            index.dimension
        );
        Ok(index)
    }

    /// Loads the index at `path`, or returns an empty one if no file exists.
    ///
    /// An existing but unreadable file is still `IndexCorrupt`.
    pub fn load_or_new(path: &Path) -> Result<Self, RetrievalError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn write_err<E: std::fmt::Display>(e: E) -> RetrievalError {
    RetrievalError::IndexUnavailable(format!("Vector index write failed: {}", e))
}

fn corrupt_err<E: std::fmt::Display>(e: E) -> RetrievalError {
    RetrievalError::IndexCorrupt(e.to_string())
}

/// Little-endian f32 values packed sequentially.
fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &val in vector {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

fn deserialize_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::normalize;
    use tempfile::TempDir;

    fn id(n: u64) -> ChunkId {
        ChunkId::from_u64(n)
    }

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        normalize(&mut v);
        v
    }

    #[test]
    fn test_vector_search() {
        let mut index = VectorIndex::new();
        index.add(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();
        index.add(id(2), unit(&[0.0, 1.0, 0.0])).unwrap();
        index.add(id(3), unit(&[0.9, 0.1, 0.0])).unwrap();

        let hits = index.search(&unit(&[1.0, 0.0, 0.0]), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, id(1));
        assert_eq!(hits[1].chunk_id, id(3));
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_dimension_fixed_at_first_write() {
        let mut index = VectorIndex::new();
        assert_eq!(index.dimension(), None);
        index.add(id(1), vec![0.0; 1024]).unwrap();
        assert_eq!(index.dimension(), Some(1024));

        let result = index.add(id(2), vec![0.0; 768]);
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch {
                expected: 1024,
                actual: 768
            })
        ));
        assert_eq!(index.len(), 1);
        assert!(!index.contains(id(2)));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = VectorIndex::with_dimension(3);
        index.add(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();
        let result = index.search(&[1.0, 0.0], 5);
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected_until_removed() {
        let mut index = VectorIndex::new();
        index.add(id(7), unit(&[1.0, 0.0])).unwrap();
        assert!(matches!(
            index.add(id(7), unit(&[0.0, 1.0])),
            Err(RetrievalError::DuplicateId(cid)) if cid == id(7)
        ));

        assert!(index.remove(id(7)));
        assert!(!index.remove(id(7)));
        index.add(id(7), unit(&[0.0, 1.0])).unwrap();

        let hits = index.search(&unit(&[0.0, 1.0]), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tombstoned_entries_filtered() {
        let mut index = VectorIndex::new();
        index.add(id(1), unit(&[1.0, 0.0])).unwrap();
        index.add(id(2), unit(&[0.8, 0.2])).unwrap();
        index.remove(id(1));

        let hits = index.search(&unit(&[1.0, 0.0]), 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, id(2));
        assert_eq!(index.tombstone_count(), 1);

        index.compact();
        assert_eq!(index.tombstone_count(), 0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn test_equal_scores_ordered_by_chunk_id() {
        let mut index = VectorIndex::new();
        index.add(id(30), unit(&[1.0, 0.0])).unwrap();
        index.add(id(10), unit(&[1.0, 0.0])).unwrap();
        index.add(id(20), unit(&[1.0, 0.0])).unwrap();

        let hits = index.search(&unit(&[1.0, 0.0]), 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id.as_u64()).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_persist_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.redb");

        let mut index = VectorIndex::new();
        index.add(id(1), unit(&[1.0, 0.0, 0.0])).unwrap();
        index.add(id(2), unit(&[0.0, 1.0, 0.0])).unwrap();
        index.add(id(3), unit(&[0.5, 0.5, 0.1])).unwrap();
        index.add(id(4), unit(&[0.0, 0.0, 1.0])).unwrap();
        index.remove(id(4));
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.dimension(), Some(3));
        assert_eq!(loaded.chunk_ids(), index.chunk_ids());
        for chunk_id in index.chunk_ids() {
            assert_eq!(loaded.get(chunk_id), index.get(chunk_id));
        }

        for query in [[1.0, 0.0, 0.0], [0.2, 0.9, 0.1], [0.0, 0.0, 1.0]] {
            let q = unit(&query);
            assert_eq!(index.search(&q, 3).unwrap(), loaded.search(&q, 3).unwrap());
        }
    }

    #[test]
    fn test_persist_overwrites_previous_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.redb");

        let mut index = VectorIndex::new();
        index.add(id(1), unit(&[1.0, 0.0])).unwrap();
        index.add(id(2), unit(&[0.0, 1.0])).unwrap();
        index.persist(&path).unwrap();

        index.remove(id(1));
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.chunk_ids(), vec![id(2)]);
    }

    #[test]
    fn test_load_empty_file_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.redb");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_load_garbage_file_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.redb");
        std::fs::write(&path, b"definitely not a database").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.redb");
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexCorrupt(_))
        ));
        assert!(VectorIndex::load_or_new(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_database_without_manifest_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.redb");
        {
            let db = Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            txn.open_table(VECTORS_TABLE).unwrap();
            txn.commit().unwrap();
        }
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RetrievalError::IndexCorrupt(_))
        ));
    }
}
