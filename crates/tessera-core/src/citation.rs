//! Citation extraction and allow-list validation.
//!
//! Generated answers reference chunks with one of two markers:
//!
//! - bare: `[cid:42]`
//! - source annotation: `[Source: report.pdf | cid:42]` (any bracket that
//!   opens with `Source:` and contains `cid:<n>`)
//!
//! Both resolve to the same [`ChunkId`]; a chunk cited in both forms counts once.
//! A citation is valid only if its id is in the query's allow-list, i.e. the
//! fused result set the answer was generated from.
//!
//! The validator only reports. Cleanup and repair are orchestrator policy
//! (see [`crate::orchestrator::repair`]).

use crate::error::RetrievalError;
use crate::search::types::ChunkId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;

static BARE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[cid:(\d+)\]").expect("static regex"));

static SOURCE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Source:[^\]]*?\bcid:(\d+)\b[^\]]*\]").expect("static regex")
});

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n+").expect("static regex"));

/// Renders the canonical bare marker for a chunk.
pub fn citation_marker(chunk_id: ChunkId) -> String {
    format!("[cid:{}]", chunk_id)
}

/// Renders the source-annotation marker for a chunk.
pub fn source_marker(filename: &str, chunk_id: ChunkId) -> String {
    format!("[Source: {} | cid:{}]", filename, chunk_id)
}

/// Collects every cited chunk id in `text`.
///
/// Ids too large for a u64 are ignored.
pub fn extract_citations(text: &str) -> BTreeSet<ChunkId> {
    BARE_MARKER
        .captures_iter(text)
        .chain(SOURCE_MARKER.captures_iter(text))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .map(ChunkId::from_u64)
        .collect()
}

/// Splits text into paragraphs on blank lines. Empty paragraphs are dropped.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(text.trim())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Outcome of checking a citation set against an allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// True when at least one citation exists and every citation is allowed
    pub valid: bool,
    /// Cited ids outside the allow-list
    pub invalid_ids: BTreeSet<ChunkId>,
    /// True when the text carries no citations at all
    pub missing_coverage: bool,
}

impl ValidationResult {
    /// Converts invalid citations into `InvalidCitation` for callers that
    /// want to treat them as an error.
    pub fn into_result(self) -> Result<(), RetrievalError> {
        if self.invalid_ids.is_empty() {
            Ok(())
        } else {
            Err(RetrievalError::InvalidCitation {
                invalid_ids: self.invalid_ids.into_iter().collect(),
            })
        }
    }
}

/// Thresholds for the detailed report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CitationPolicy {
    pub min_unique_citations: usize,
    pub require_citation_per_paragraph: bool,
}

impl Default for CitationPolicy {
    fn default() -> Self {
        Self {
            min_unique_citations: crate::config::DEFAULT_MIN_UNIQUE_CITATIONS,
            require_citation_per_paragraph: true,
        }
    }
}

/// Why a detailed check passed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationVerdict {
    Ok,
    NotEnoughUniqueCitations,
    InvalidCitationIds,
    ParagraphsMissingCitations,
}

impl CitationVerdict {
    pub fn reason(&self) -> &'static str {
        match self {
            CitationVerdict::Ok => "ok",
            CitationVerdict::NotEnoughUniqueCitations => "not enough unique citations",
            CitationVerdict::InvalidCitationIds => "contains invalid citation ids",
            CitationVerdict::ParagraphsMissingCitations => "some paragraphs are missing citations",
        }
    }
}

/// Paragraph-level citation diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationReport {
    pub ok: bool,
    pub verdict: CitationVerdict,
    pub reason: &'static str,
    pub paragraph_count: usize,
    pub found_citations: BTreeSet<ChunkId>,
    pub unique_citations_count: usize,
    pub invalid_ids: BTreeSet<ChunkId>,
    /// 0-based indexes of paragraphs without a citation (only filled when
    /// the policy requires per-paragraph citations)
    pub missing_paragraphs: Vec<usize>,
    pub per_paragraph_citations: Vec<BTreeSet<ChunkId>>,
    pub policy: CitationPolicy,
}

/// Checks generated text against a query's allow-list.
#[derive(Debug, Clone, Copy, Default)]
pub struct CitationValidator {
    policy: CitationPolicy,
}

impl CitationValidator {
    pub fn new(policy: CitationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CitationPolicy {
        self.policy
    }

    /// Validates an extracted citation set.
    ///
    /// `missing_coverage` is reported separately from invalid ids: an answer
    /// with no citations has no invalid ones, yet is still not valid.
    pub fn validate(
        &self,
        citations: &BTreeSet<ChunkId>,
        allow_list: &BTreeSet<ChunkId>,
    ) -> ValidationResult {
        let invalid_ids: BTreeSet<ChunkId> = citations.difference(allow_list).copied().collect();
        let missing_coverage = citations.is_empty();
        ValidationResult {
            valid: !missing_coverage && invalid_ids.is_empty(),
            invalid_ids,
            missing_coverage,
        }
    }

    /// Extracts and validates in one step.
    pub fn validate_text(&self, text: &str, allow_list: &BTreeSet<ChunkId>) -> ValidationResult {
        self.validate(&extract_citations(text), allow_list)
    }

    /// Full diagnostics under this validator's policy.
    ///
    /// Checks run in order: unique-citation minimum, invalid ids, per-paragraph
    /// coverage. The first failing check decides the verdict.
    pub fn report(&self, text: &str, allow_list: &BTreeSet<ChunkId>) -> CitationReport {
        let paragraphs = split_paragraphs(text);
        let per_paragraph_citations: Vec<BTreeSet<ChunkId>> =
            paragraphs.iter().map(|p| extract_citations(p)).collect();

        let missing_paragraphs: Vec<usize> = if self.policy.require_citation_per_paragraph {
            per_paragraph_citations
                .iter()
                .enumerate()
                .filter(|(_, cids)| cids.is_empty())
                .map(|(i, _)| i)
                .collect()
        } else {
            Vec::new()
        };

        let found_citations: BTreeSet<ChunkId> =
            per_paragraph_citations.iter().flatten().copied().collect();
        let invalid_ids: BTreeSet<ChunkId> =
            found_citations.difference(allow_list).copied().collect();

        let verdict = if found_citations.len() < self.policy.min_unique_citations {
            CitationVerdict::NotEnoughUniqueCitations
        } else if !invalid_ids.is_empty() {
            CitationVerdict::InvalidCitationIds
        } else if !missing_paragraphs.is_empty() {
            CitationVerdict::ParagraphsMissingCitations
        } else {
            CitationVerdict::Ok
        };

        CitationReport {
            ok: verdict == CitationVerdict::Ok,
            verdict,
            reason: verdict.reason(),
            paragraph_count: paragraphs.len(),
            unique_citations_count: found_citations.len(),
            found_citations,
            invalid_ids,
            missing_paragraphs,
            per_paragraph_citations,
            policy: self.policy,
        }
    }
}
