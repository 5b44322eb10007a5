//! Retrieval tuning constants and per-query settings.
//!
//! The constants are the defaults the orchestrator and the CLI agree on.
//! [`RetrievalSettings`] bundles the per-query knobs so callers can override
//! any subset and serialize the effective values into debug output.
//!
//! # Usage
//!
//! ```
//! use tessera_core::config::{RetrievalSettings, DEFAULT_TOP_K, RRF_K};
//!
//! let settings = RetrievalSettings::default();
//! assert_eq!(settings.top_k, DEFAULT_TOP_K);
//! assert_eq!(settings.rrf_k, RRF_K);
//! ```

use crate::search::query::QueryMode;
use serde::{Deserialize, Serialize};

// =============================================================================
// Fusion
// =============================================================================

/// Reciprocal Rank Fusion smoothing constant.
///
/// Dampens the dominance of rank-1 items while still rewarding top ranks.
/// Reference: Cormack, Clarke & Buettcher (2009).
pub const RRF_K: usize = 60;

// =============================================================================
// Channel Depths
// =============================================================================

/// Lexical candidates fetched per query before fusion.
pub const DEFAULT_BM25_K: usize = 20;

/// Vector candidates fetched per query before fusion.
pub const DEFAULT_VEC_K: usize = 20;

/// Fused results kept as generation context (and as the citation allow-list).
pub const DEFAULT_TOP_K: usize = 8;

/// Maximum number of terms kept by the heuristic lexical query mode.
pub const DEFAULT_MAX_QUERY_TERMS: usize = 10;

// =============================================================================
// Generation
// =============================================================================

/// Prior chat turns replayed to the generator when session memory is on.
pub const DEFAULT_MEMORY_TURNS: usize = 6;

/// Upper bound on a single generation call.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Minimum distinct citations an answer must carry.
pub const DEFAULT_MIN_UNIQUE_CITATIONS: usize = 1;

// =============================================================================
// Vector Index
// =============================================================================

/// Minimum ef_search for HNSW queries.
///
/// Queries use `max(k * 2, MIN_EF_SEARCH)`, which keeps recall effectively
/// exact for the corpus sizes a local index holds.
pub const MIN_EF_SEARCH: usize = 50;

/// Per-query retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Lexical channel depth.
    pub bm25_k: usize,
    /// Vector channel depth.
    pub vec_k: usize,
    /// Fused results kept after fusion.
    pub top_k: usize,
    /// RRF smoothing constant.
    pub rrf_k: usize,
    /// Weight applied to lexical RRF contributions.
    pub lexical_weight: f32,
    /// Weight applied to vector RRF contributions.
    pub vector_weight: f32,
    /// How the raw query becomes lexical terms.
    pub query_mode: QueryMode,
    /// Prior turns replayed from session memory.
    pub memory_turns: usize,
    /// Minimum distinct citations for a valid answer.
    pub min_unique_citations: usize,
    /// Whether every paragraph must carry a citation.
    pub require_citation_per_paragraph: bool,
    /// Whether the orchestrator appends citations to uncited paragraphs.
    pub repair_citations: bool,
    /// Whether repair also points out-of-list citations at the top source.
    /// When set, the returned validation no longer shows the invalid ids;
    /// `generated_validation` still does.
    pub rewrite_invalid_citations: bool,
    /// Generation timeout in milliseconds.
    pub generation_timeout_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            bm25_k: DEFAULT_BM25_K,
            vec_k: DEFAULT_VEC_K,
            top_k: DEFAULT_TOP_K,
            rrf_k: RRF_K,
            lexical_weight: 1.0,
            vector_weight: 1.0,
            query_mode: QueryMode::default(),
            memory_turns: DEFAULT_MEMORY_TURNS,
            min_unique_citations: DEFAULT_MIN_UNIQUE_CITATIONS,
            require_citation_per_paragraph: true,
            repair_citations: true,
            rewrite_invalid_citations: false,
            generation_timeout_ms: DEFAULT_GENERATION_TIMEOUT_SECS * 1000,
        }
    }
}

impl RetrievalSettings {
    /// Overrides the three channel depths in one call.
    pub fn with_depths(mut self, bm25_k: usize, vec_k: usize, top_k: usize) -> Self {
        self.bm25_k = bm25_k;
        self.vec_k = vec_k;
        self.top_k = top_k;
        self
    }
}
