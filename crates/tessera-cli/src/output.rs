//! Output formatting for command results.
//!
//! Every command has a human-readable terminal rendering and a JSON rendering
//! for scripting. JSON output is the core's own serde shape, unmodified.

use serde::Serialize;
use std::collections::BTreeSet;
use tessera_core::orchestrator::{
    Answer, CitationDebug, Diagnostics, IndexStats, RetrievalDebug, Source,
};
use tessera_core::search::{ChunkId, DocumentRecord};

/// Pretty JSON for any serializable result.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Answer text followed by a numbered source list.
pub fn format_answer(answer: &Answer) -> String {
    let mut output = String::new();
    output.push_str(answer.answer.trim());
    output.push_str("\n\n");

    if answer.sources.is_empty() {
        output.push_str("No sources.");
    } else {
        output.push_str("Sources:\n");
        for (i, source) in answer.sources.iter().enumerate() {
            output.push_str(&format!("  {}\n", format_source(i + 1, source)));
        }
    }

    let validation = &answer.debug.validation;
    if !validation.valid {
        output.push_str(&format!(
            "\nwarning: citations not valid (invalid: {}, missing coverage: {})",
            join_ids(&validation.invalid_ids),
            validation.missing_coverage
        ));
    }
    if answer.debug.repaired {
        output.push_str("\nnote: citations were repaired");
    }
    push_diagnostics(&mut output, &answer.debug.diagnostics);

    output.trim_end().to_string()
}

fn format_source(rank: usize, source: &Source) -> String {
    format!(
        "{}. [cid:{}] {} #{} (score: {:.4}, {:?})",
        rank, source.chunk_id, source.filename, source.ordinal, source.score, source.channel
    )
}

/// Per-channel and fused rankings with query and overlap analysis.
pub fn format_retrieval(debug: &RetrievalDebug) -> String {
    let mut output = String::new();
    let query = &debug.query;
    output.push_str(&format!("Query mode: {}\n", query.mode));
    output.push_str(&format!("Lexical query: \"{}\"\n", query.lexical_query));
    if !query.removed_tokens.is_empty() {
        output.push_str(&format!("Removed: {}\n", query.removed_tokens.join(", ")));
    }

    output.push_str(&format!("\nLexical ({} hits):\n", debug.results.lexical.len()));
    for (i, hit) in debug.results.lexical.iter().enumerate() {
        output.push_str(&format!("  {:>2}. cid:{} bm25 {:.4}\n", i + 1, hit.chunk_id, hit.score));
    }
    output.push_str(&format!("\nVector ({} hits):\n", debug.results.vector.len()));
    for (i, hit) in debug.results.vector.iter().enumerate() {
        output.push_str(&format!("  {:>2}. cid:{} cosine {:.4}\n", i + 1, hit.chunk_id, hit.score));
    }
    output.push_str(&format!("\nFused ({} kept):\n", debug.results.fused.len()));
    for (i, hit) in debug.results.fused.iter().enumerate() {
        output.push_str(&format!(
            "  {:>2}. cid:{} rrf {:.5} (lexical #{} +{:.5}, vector #{} +{:.5})\n",
            i + 1,
            hit.chunk_id,
            hit.fused_score,
            rank_label(hit.lexical_rank),
            hit.lexical_contribution,
            rank_label(hit.vector_rank),
            hit.vector_contribution
        ));
    }

    let overlap = &debug.overlap;
    output.push_str(&format!(
        "\nOverlap: {:.1}% (both {}, lexical only {}, vector only {})\n",
        overlap.overlap_pct,
        overlap.both.len(),
        overlap.lexical_only.len(),
        overlap.vector_only.len()
    ));
    let timings = &debug.timings;
    output.push_str(&format!(
        "Timings: lexical {:.1} ms, vector {:.1} ms, fusion {:.1} ms, total {:.1} ms\n",
        timings.lexical_ms, timings.vector_ms, timings.fusion_ms, timings.total_ms
    ));
    push_diagnostics(&mut output, &debug.diagnostics);

    output.trim_end().to_string()
}

fn rank_label(rank: Option<usize>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Extracted citations against the allow-list, with the detailed report.
pub fn format_citations(debug: &CitationDebug) -> String {
    let mut output = String::new();
    output.push_str(debug.answer.trim());
    output.push_str("\n\n");
    output.push_str(&format!("Allowed:   {}\n", join_ids(&debug.allow_list)));
    output.push_str(&format!("Extracted: {}\n", join_ids(&debug.extracted_citations)));
    output.push_str(&format!("Valid:     {}\n", debug.validation.valid));
    if !debug.generated_validation.invalid_ids.is_empty() {
        output.push_str(&format!(
            "Invalid:   {}\n",
            join_ids(&debug.generated_validation.invalid_ids)
        ));
    }
    if let Some(report) = &debug.report {
        output.push_str(&format!(
            "Report:    {} ({} paragraphs, {} unique citations)\n",
            report.reason, report.paragraph_count, report.unique_citations_count
        ));
        if !report.missing_paragraphs.is_empty() {
            let missing: Vec<String> = report
                .missing_paragraphs
                .iter()
                .map(|p| (p + 1).to_string())
                .collect();
            output.push_str(&format!("Uncited paragraphs: {}\n", missing.join(", ")));
        }
    }
    if debug.repaired {
        output.push_str("Repaired:  true\n");
    }
    output.trim_end().to_string()
}

pub fn format_stats(stats: &IndexStats) -> String {
    let dimension = stats
        .dimension
        .map(|d| d.to_string())
        .unwrap_or_else(|| "unset".to_string());
    format!(
        "Documents:       {}\n\
         Chunks:          {}\n\
         Lexical entries: {}\n\
         Vectors:         {} ({} tombstoned)\n\
         Dimension:       {}\n\
         Chat model:      {}\n\
         Embed model:     {} (config v{})",
        stats.documents,
        stats.chunks,
        stats.lexical_chunks,
        stats.vector_chunks,
        stats.vector_tombstones,
        dimension,
        stats.chat_model,
        stats.embed_model,
        stats.model_version
    )
}

pub fn format_ingested(documents: &[DocumentRecord]) -> String {
    let chunks: usize = documents.iter().map(|d| d.chunk_ids.len()).sum();
    let mut output = format!(
        "Ingested {} document{} ({} chunks)\n",
        documents.len(),
        if documents.len() == 1 { "" } else { "s" },
        chunks
    );
    for doc in documents {
        output.push_str(&format!("  {} {} ({} chunks)\n", doc.id, doc.filename, doc.chunk_ids.len()));
    }
    output.trim_end().to_string()
}

fn push_diagnostics(output: &mut String, diagnostics: &Diagnostics) {
    for failure in &diagnostics.channel_failures {
        output.push_str(&format!(
            "\nwarning: {} channel failed, results are degraded: {}",
            failure.channel, failure.message
        ));
    }
    if !diagnostics.orphaned_chunks.is_empty() {
        let ids: BTreeSet<ChunkId> = diagnostics.orphaned_chunks.iter().copied().collect();
        output.push_str(&format!(
            "\nwarning: skipped chunks missing from the store: {}",
            join_ids(&ids)
        ));
    }
}

fn join_ids(ids: &BTreeSet<ChunkId>) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::search::DocumentId;

    fn doc(id: u64, filename: &str, chunks: &[u64]) -> DocumentRecord {
        DocumentRecord {
            id: DocumentId::from_u64(id),
            filename: filename.to_string(),
            chunk_ids: chunks.iter().copied().map(ChunkId::from_u64).collect(),
            created_at: 0,
        }
    }

    #[test]
    fn test_format_ingested() {
        let output = format_ingested(&[doc(1, "a.md", &[1, 2]), doc(2, "b.md", &[3])]);
        assert!(output.starts_with("Ingested 2 documents (3 chunks)"));
        assert!(output.contains("a.md (2 chunks)"));
    }

    #[test]
    fn test_join_ids() {
        assert_eq!(join_ids(&BTreeSet::new()), "none");
        let ids: BTreeSet<ChunkId> = [9, 5].into_iter().map(ChunkId::from_u64).collect();
        assert_eq!(join_ids(&ids), "5, 9");
    }

    #[test]
    fn test_format_json_uses_core_shape() {
        let output = format_json(&doc(7, "x.md", &[4]));
        assert!(output.contains("\"filename\": \"x.md\""));
        assert!(output.contains("\"chunk_ids\": [\n    4\n  ]"));
    }
}
