use crate::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Returns the current Unix timestamp (seconds since UNIX_EPOCH).
///
/// If the system time is before UNIX_EPOCH, returns 0 instead of panicking.
pub fn get_current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unique chunk identifier.
///
/// Assigned by the chunk store, monotonically, and never reused. The same value
/// is the vector index's external key and the lexical index's document key, so
/// all three share one identity space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(u64);

impl ChunkId {
    /// Creates a ChunkId from a raw u64 value.
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value of this ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique document identifier (owner of a group of chunks).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    /// Creates a DocumentId from a raw u64 value.
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value of this ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored chunk: the unit of retrieval.
///
/// Immutable once written; removed only together with its owning document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    /// Owning document
    pub document_id: DocumentId,
    /// Position within the owning document (0-based)
    pub ordinal: usize,
    /// Raw chunk text
    pub text: String,
    /// Free-form key/value metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Stored document: groups chunks and carries the display filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub filename: String,
    /// Chunks in ordinal order
    pub chunk_ids: Vec<ChunkId>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

/// One hit from the lexical channel.
///
/// `score` follows the FTS5 convention: lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LexicalHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// One hit from the vector channel.
///
/// `score` is the inner product of unit vectors, in [-1, 1]; higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// A retrieval path contributing to a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Lexical,
    Vector,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Lexical => write!(f, "lexical"),
            Channel::Vector => write!(f, "vector"),
        }
    }
}

/// Which channels surfaced a fused chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Lexical,
    Vector,
    Both,
}

impl Provenance {
    /// Derives provenance from the two presence flags. `None` if neither is set.
    pub fn from_presence(in_lexical: bool, in_vector: bool) -> Option<Self> {
        match (in_lexical, in_vector) {
            (true, true) => Some(Provenance::Both),
            (true, false) => Some(Provenance::Lexical),
            (false, true) => Some(Provenance::Vector),
            (false, false) => None,
        }
    }
}

/// Validates that a vector has the expected dimension.
///
/// Returns `Ok(())` if dimensions match, or `DimensionMismatch` naming both.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<(), RetrievalError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RetrievalError::DimensionMismatch { expected, actual })
    }
}

/// Scales a vector to unit length in place.
///
/// Zero vectors are left untouched. Callers normalize before insertion and
/// before querying; the vector index never does it for them.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
