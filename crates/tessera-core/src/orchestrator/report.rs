// Response and diagnostic payloads returned by the orchestrator

use super::state::StateTrace;
use crate::citation::{CitationReport, ValidationResult};
use crate::error::{ErrorKind, RetrievalError};
use crate::search::fusion::FusedHit;
use crate::search::types::{Channel, ChunkId, DocumentId, LexicalHit, Provenance, VectorHit};
use serde::Serialize;
use std::collections::BTreeSet;

/// One cited-able source of an answer, in fused order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub filename: String,
    pub ordinal: usize,
    /// Fused RRF score
    pub score: f32,
    /// Which channels surfaced the chunk
    pub channel: Provenance,
}

/// A search channel that failed while the other one carried the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFailure {
    pub channel: Channel,
    pub kind: ErrorKind,
    pub message: String,
}

impl ChannelFailure {
    pub fn new(channel: Channel, err: &RetrievalError) -> Self {
        Self {
            channel,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Non-fatal faults observed while answering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Channels that failed; fusion ran on the remaining one
    pub channel_failures: Vec<ChannelFailure>,
    /// Fused ids with no chunk-store row, skipped from the context
    pub orphaned_chunks: Vec<ChunkId>,
}

impl Diagnostics {
    /// True when fusion ran on a single channel.
    pub fn degraded(&self) -> bool {
        !self.channel_failures.is_empty()
    }
}

/// Wall-clock time spent per retrieval step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub lexical_ms: f64,
    /// Query embedding plus vector search
    pub vector_ms: f64,
    pub fusion_ms: f64,
    pub total_ms: f64,
}

/// Channel outputs and their fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelResults {
    pub lexical: Vec<LexicalHit>,
    pub vector: Vec<VectorHit>,
    pub fused: Vec<FusedHit>,
}

/// Debug payload attached to every answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerDebug {
    #[serde(flatten)]
    pub results: ChannelResults,
    /// Validation of the returned text against the allow-list
    pub validation: ValidationResult,
    /// `None` when no generation happened
    pub citation_report: Option<CitationReport>,
    /// Raw generator output; `None` when no generation happened
    pub generated_answer: Option<String>,
    /// Validation of the raw generator output
    pub generated_validation: ValidationResult,
    /// Report for the cleaned generator output, before any repair
    pub generated_report: Option<CitationReport>,
    /// True if citation repair changed the generated text
    pub repaired: bool,
    pub diagnostics: Diagnostics,
    pub states: StateTrace,
    pub model_version: u64,
}

/// Answer to a query.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub debug: AnswerDebug,
}

impl Answer {
    /// The ids the answer was allowed to cite.
    pub fn allow_list(&self) -> BTreeSet<ChunkId> {
        self.sources.iter().map(|s| s.chunk_id).collect()
    }
}

/// How the raw query became lexical terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnalysis {
    pub mode: &'static str,
    pub original_tokens: Vec<String>,
    pub terms: Vec<String>,
    pub removed_tokens: Vec<String>,
    pub lexical_query: String,
}

/// How much the two channels agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapAnalysis {
    pub both: Vec<ChunkId>,
    pub lexical_only: Vec<ChunkId>,
    pub vector_only: Vec<ChunkId>,
    /// Shared ids as a percentage of the smaller channel
    pub overlap_pct: f64,
}

impl OverlapAnalysis {
    pub fn compute(lexical: &[LexicalHit], vector: &[VectorHit]) -> Self {
        let lexical_ids: BTreeSet<ChunkId> = lexical.iter().map(|h| h.chunk_id).collect();
        let vector_ids: BTreeSet<ChunkId> = vector.iter().map(|h| h.chunk_id).collect();

        let both: Vec<ChunkId> = lexical_ids.intersection(&vector_ids).copied().collect();
        let smaller = lexical_ids.len().min(vector_ids.len());
        let overlap_pct = if smaller == 0 {
            0.0
        } else {
            both.len() as f64 * 100.0 / smaller as f64
        };

        Self {
            lexical_only: lexical_ids.difference(&vector_ids).copied().collect(),
            vector_only: vector_ids.difference(&lexical_ids).copied().collect(),
            both,
            overlap_pct,
        }
    }
}

/// Retrieval introspection, no generation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalDebug {
    pub query: QueryAnalysis,
    #[serde(flatten)]
    pub results: ChannelResults,
    pub overlap: OverlapAnalysis,
    pub timings: Timings,
    pub diagnostics: Diagnostics,
    pub model_version: u64,
}

/// Citation diagnostics for one full pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct CitationDebug {
    pub answer: String,
    /// Markers the generator emitted, before cleanup or repair
    pub extracted_citations: BTreeSet<ChunkId>,
    pub allow_list: BTreeSet<ChunkId>,
    /// Validation of the generator's text
    pub generated_validation: ValidationResult,
    /// Validation of the returned answer
    pub validation: ValidationResult,
    pub report: Option<CitationReport>,
    pub repaired: bool,
}

/// Index and store counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub lexical_chunks: usize,
    pub vector_chunks: usize,
    pub vector_tombstones: usize,
    pub dimension: Option<usize>,
    pub model_version: u64,
    pub chat_model: String,
    pub embed_model: String,
}
