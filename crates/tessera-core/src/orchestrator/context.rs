//! Context assembly for the generation step.

use crate::citation::source_marker;
use crate::search::fusion::FusedHit;
use crate::search::types::{ChunkId, DocumentId};
use serde::Serialize;

/// Separator between chunks in the generation context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Answer returned without a generation call when nothing was retrieved.
pub const FALLBACK_ANSWER: &str =
    "I don't have enough information in the indexed documents to answer this question.";

/// A fused chunk joined against the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextChunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub filename: String,
    pub ordinal: usize,
    pub text: String,
    pub hit: FusedHit,
}

impl ContextChunk {
    /// The citation token the generator is asked to use for this chunk.
    pub fn cite_token(&self) -> String {
        source_marker(&self.filename, self.chunk_id)
    }
}

/// Renders chunks as `[cid:N] from <filename>:\n<text>`, in fused order.
pub fn format_context(chunks: &[ContextChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[cid:{}] from {}:\n{}", c.chunk_id, c.filename, c.text.trim()))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Builds the system prompt naming the allowed chunk ids.
pub fn system_prompt(allowed_ids: &[ChunkId]) -> String {
    let cid_list = allowed_ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are a research assistant. Answer questions using ONLY the provided source documents.\n\
         \n\
         RESPONSE FORMAT:\n\
         - Write 2 to 3 concise paragraphs that directly answer the question\n\
         - End each paragraph with a citation: [Source: filename | cid:NUMBER]\n\
         - Use ONLY these citation IDs: {cid_list}\n\
         \n\
         STRICT RULES:\n\
         - Start the answer immediately with the content. No introductions.\n\
         - Do not include bibliography entries or reference lists.\n\
         - Synthesize the information in your own words; do not copy chunks verbatim.\n\
         - If the sources do not answer the question, say \"I don't have enough information to answer this question.\""
    )
}
