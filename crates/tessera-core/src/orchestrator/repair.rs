//! Answer cleanup and deterministic citation repair.
//!
//! Both run after generation and before the final validation. Repair never
//! calls the generator again: it appends citation tokens to uncited paragraphs
//! and, only when asked to, points invalid markers at the top-ranked source.
//! Each step re-validates.

use super::context::ContextChunk;
use crate::citation::{split_paragraphs, CitationReport, CitationValidator};
use crate::search::types::ChunkId;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use std::collections::BTreeSet;
use tracing::warn;

static PREAMBLES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?:okay|ok|sure|certainly|of course)[,.]?\s*(?:here'?s?|i'?ll|let me)[^.]*[.!]\s*",
        r"(?i)^(?:here is|here's|below is)[^.]*[.!:]\s*",
        r"(?i)^(?:based on|according to) (?:the )?(?:provided |given )?(?:context|documents?|sources?)[,.]?\s*",
        r"(?i)^i (?:understand|see)[^.]*[.!]\s*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static BIBLIOGRAPHY: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)\n+(?:references|bibliography|sources|works cited):?[ \t]*\n.*$",
        r"(?s)\n+\[\d+\][^\[]*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static EXTRA_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Strips model preambles and trailing reference sections, and collapses
/// runs of blank lines.
pub fn clean_answer(answer: &str) -> String {
    let mut cleaned = answer.trim().to_string();
    for pattern in PREAMBLES.iter() {
        cleaned = pattern.replace(&cleaned, "").into_owned();
    }
    for pattern in BIBLIOGRAPHY.iter() {
        cleaned = pattern.replace(&cleaned, "").into_owned();
    }
    EXTRA_BLANK_LINES
        .replace_all(cleaned.trim(), "\n\n")
        .into_owned()
}

/// Result of a repair attempt.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub text: String,
    /// Report for `text`
    pub report: CitationReport,
    /// True if `text` differs from the input
    pub repaired: bool,
}

/// Appends a citation token to each listed paragraph, cycling through the
/// sources' tokens by paragraph index.
pub fn inject_citations(answer: &str, sources: &[ContextChunk], missing_paragraphs: &[usize]) -> String {
    if sources.is_empty() {
        return answer.to_string();
    }
    let tokens: Vec<String> = sources.iter().map(ContextChunk::cite_token).collect();
    let mut paragraphs: Vec<String> = split_paragraphs(answer)
        .into_iter()
        .map(str::to_string)
        .collect();
    for &idx in missing_paragraphs {
        if let Some(paragraph) = paragraphs.get_mut(idx) {
            let token = &tokens[idx % tokens.len()];
            paragraph.push(' ');
            paragraph.push_str(token);
        }
    }
    paragraphs.join("\n\n")
}

/// Rewrites every marker naming an invalid id to cite the top-ranked source.
pub fn replace_invalid_citations(answer: &str, sources: &[ContextChunk], invalid_ids: &BTreeSet<ChunkId>) -> String {
    let Some(top) = sources.first() else {
        return answer.to_string();
    };
    let replacement = top.cite_token();
    let mut text = answer.to_string();
    for id in invalid_ids {
        let patterns = [
            format!(r"\[Source:[^\]]*?\bcid:{}\b[^\]]*\]", id),
            format!(r"\[cid:{}\]", id),
        ];
        for pattern in &patterns {
            if let Ok(re) = Regex::new(pattern) {
                text = re.replace_all(&text, NoExpand(&replacement)).into_owned();
            }
        }
    }
    text
}

/// Repairs `answer` against `report`, re-validating after each step.
///
/// Uncited paragraphs always get a citation. Invalid ids are left in place
/// unless `rewrite_invalid` is set, so they stay visible to validation.
pub fn repair_citations(
    answer: &str,
    report: CitationReport,
    sources: &[ContextChunk],
    validator: &CitationValidator,
    allow_list: &BTreeSet<ChunkId>,
    rewrite_invalid: bool,
) -> RepairOutcome {
    let mut text = answer.to_string();
    let mut report = report;

    if !report.ok && !report.missing_paragraphs.is_empty() {
        text = inject_citations(&text, sources, &report.missing_paragraphs);
        report = validator.report(&text, allow_list);
    }

    if rewrite_invalid && !report.ok && !report.invalid_ids.is_empty() {
        warn!(
            "Rewriting invalid citations {:?} to the top-ranked source",
            report.invalid_ids
        );
        text = replace_invalid_citations(&text, sources, &report.invalid_ids);
        report = validator.report(&text, allow_list);
    }

    RepairOutcome {
        repaired: text != answer,
        text,
        report,
    }
}
