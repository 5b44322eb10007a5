//! Hybrid retrieval primitives: lexical index, vector index, and rank fusion.
//!
//! # Architecture
//!
//! ```text
//! query text ──► QueryMode::tokenize ──► LexicalIndex::search ──► Vec<LexicalHit> ─┐
//!                                                                                  ├─► fuse ──► Vec<FusedHit>
//! query vector (unit length) ─────────► VectorIndex::search  ──► Vec<VectorHit> ──┘
//! ```
//!
//! Both indexes are keyed by the chunk store's [`ChunkId`], so a fused id can be
//! joined back to its text without translation.
//!
//! # Score Conventions
//!
//! - Lexical: negated BM25 relevance, lower is better
//! - Vector: inner product of unit vectors in [-1, 1], higher is better
//! - Fused: RRF score, higher is better; only ranks cross the channel boundary,
//!   so the incompatible raw scales never mix
//!
//! # Usage
//!
//! ```
//! use tessera_core::search::{fuse, FusionConfig, LexicalIndex, QueryMode, VectorIndex};
//! use tessera_core::search::types::{normalize, ChunkId};
//!
//! let mut lexical = LexicalIndex::new();
//! let mut vectors = VectorIndex::new();
//!
//! let id = ChunkId::from_u64(1);
//! lexical.add(id, "hybrid retrieval with rank fusion".to_string()).unwrap();
//! let mut embedding = vec![0.3, 0.4];
//! normalize(&mut embedding);
//! vectors.add(id, embedding.clone()).unwrap();
//!
//! let terms = QueryMode::default().tokenize("what is rank fusion?");
//! let lexical_hits = lexical.search(&terms.terms, 10).unwrap();
//! let vector_hits = vectors.search(&embedding, 10).unwrap();
//! let fused = fuse(&lexical_hits, &vector_hits, &FusionConfig::default());
//! assert_eq!(fused[0].chunk_id, id);
//! assert!(fused[0].in_both());
//! ```

pub mod fusion;
pub mod lexical;
pub mod query;
pub mod types;
pub mod vector;

pub use fusion::{fuse, fuse_top_k, FusedHit, FusionConfig, RRF_K};
pub use lexical::LexicalIndex;
pub use query::{QueryMode, QueryTerms};
pub use types::{
    normalize, validate_dimension, Channel, ChunkId, ChunkRecord, DocumentId, DocumentRecord,
    LexicalHit, Provenance, VectorHit,
};
pub use vector::VectorIndex;
