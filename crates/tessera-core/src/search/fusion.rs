// Reciprocal Rank Fusion (RRF) of the lexical and vector channels

use super::types::{ChunkId, LexicalHit, Provenance, VectorHit};
pub use crate::config::RRF_K;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Fusion parameters.
///
/// Weights scale each channel's RRF contribution. With both at 1.0 this is
/// plain RRF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Smoothing constant added to every rank
    pub k: usize,
    pub lexical_weight: f32,
    pub vector_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: RRF_K,
            lexical_weight: 1.0,
            vector_weight: 1.0,
        }
    }
}

impl FusionConfig {
    /// Unweighted RRF with smoothing constant `k`.
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

/// One entry of a fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    /// Sum of the per-channel contributions
    pub fused_score: f32,
    /// 1-based rank in the lexical list
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the vector list
    pub vector_rank: Option<usize>,
    /// Raw lexical score (lower is better)
    pub lexical_score: Option<f32>,
    /// Raw vector similarity (higher is better)
    pub vector_score: Option<f32>,
    pub lexical_contribution: f32,
    pub vector_contribution: f32,
}

impl FusedHit {
    fn new(chunk_id: ChunkId) -> Self {
        Self {
            chunk_id,
            fused_score: 0.0,
            lexical_rank: None,
            vector_rank: None,
            lexical_score: None,
            vector_score: None,
            lexical_contribution: 0.0,
            vector_contribution: 0.0,
        }
    }

    pub fn in_lexical(&self) -> bool {
        self.lexical_rank.is_some()
    }

    pub fn in_vector(&self) -> bool {
        self.vector_rank.is_some()
    }

    pub fn in_both(&self) -> bool {
        self.in_lexical() && self.in_vector()
    }

    /// Which channels surfaced this chunk.
    pub fn provenance(&self) -> Provenance {
        // Fusion only emits hits ranked by at least one channel.
        Provenance::from_presence(self.in_lexical(), self.in_vector()).unwrap_or(Provenance::Vector)
    }
}

/// Combine the lexical and vector rankings with RRF.
///
/// RRF Formula: `score(d) = sum_r w_r / (k + rank_r(d))`
///
/// Where rank is the 1-based position of `d` in ranker `r`; a chunk absent
/// from a list contributes nothing for it. If a chunk id repeats within one
/// list, its first (best) position counts.
///
/// Output is ordered by descending fused score. Ties go first to chunks found
/// by both channels, then to the lower chunk id. Nothing is truncated here;
/// use [`fuse_top_k`] to cut after fusion.
pub fn fuse(lexical: &[LexicalHit], vector: &[VectorHit], config: &FusionConfig) -> Vec<FusedHit> {
    let k = config.k as f32;
    let mut fused: HashMap<ChunkId, FusedHit> = HashMap::new();

    for (position, hit) in lexical.iter().enumerate() {
        let entry = fused
            .entry(hit.chunk_id)
            .or_insert_with(|| FusedHit::new(hit.chunk_id));
        if entry.lexical_rank.is_some() {
            continue;
        }
        let rank = position + 1;
        entry.lexical_rank = Some(rank);
        entry.lexical_score = Some(hit.score);
        entry.lexical_contribution = config.lexical_weight / (k + rank as f32);
    }

    for (position, hit) in vector.iter().enumerate() {
        let entry = fused
            .entry(hit.chunk_id)
            .or_insert_with(|| FusedHit::new(hit.chunk_id));
        if entry.vector_rank.is_some() {
            continue;
        }
        let rank = position + 1;
        entry.vector_rank = Some(rank);
        entry.vector_score = Some(hit.score);
        entry.vector_contribution = config.vector_weight / (k + rank as f32);
    }

    let mut combined: Vec<FusedHit> = fused
        .into_values()
        .map(|mut hit| {
            hit.fused_score = hit.lexical_contribution + hit.vector_contribution;
            hit
        })
        .collect();
    combined.sort_by(compare_fused);
    combined
}

/// [`fuse`], then keep the best `top_k`.
pub fn fuse_top_k(
    lexical: &[LexicalHit],
    vector: &[VectorHit],
    config: &FusionConfig,
    top_k: usize,
) -> Vec<FusedHit> {
    let mut fused = fuse(lexical, vector, config);
    fused.truncate(top_k);
    fused
}

fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| b.in_both().cmp(&a.in_both()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
