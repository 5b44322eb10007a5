//! BM25 lexical index over chunk text.
//!
//! Wraps the `bm25` crate's in-memory engine keyed by [`ChunkId`]. The index is
//! derived data: it is rebuilt from the chunk store at start-up with
//! [`LexicalIndex::rebuild_from`] and kept current by the write path.
//!
//! Scores are reported in the FTS5 convention (negated relevance, lower is
//! better) so callers can treat every lexical backend alike. Ties are broken
//! by ascending chunk id, which makes fusion reproducible.

use super::types::{ChunkId, LexicalHit};
use crate::error::RetrievalError;
use bm25::{Document, Language, SearchEngine, SearchEngineBuilder};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// In-memory BM25 engine plus the texts needed to rebuild it.
struct Bm25Corpus {
    engine: SearchEngine<u64>,
    texts: BTreeMap<u64, String>,
}

impl Bm25Corpus {
    fn build(texts: BTreeMap<u64, String>) -> Self {
        let docs: Vec<Document<u64>> = texts
            .iter()
            .map(|(id, text)| Document {
                id: *id,
                contents: text.clone(),
            })
            .collect();
        let engine = SearchEngineBuilder::<u64>::with_documents(Language::English, docs).build();
        Self { engine, texts }
    }
}

/// Sparse-term search over chunk text.
///
/// # Algorithm Details
///
/// BM25 with the `bm25` crate defaults (k1 = 1.2, b = 0.75), English
/// tokenization with stemming.
///
/// # Thread Safety
///
/// Not internally synchronized. The orchestrator keeps it behind an `RwLock`
/// so queries share read access and the write path takes the write lock.
pub struct LexicalIndex {
    corpus: Option<Bm25Corpus>,
}

impl LexicalIndex {
    /// Creates an empty, initialized index.
    pub fn new() -> Self {
        Self {
            corpus: Some(Bm25Corpus::build(BTreeMap::new())),
        }
    }

    /// Creates an index that rejects every operation with `IndexUnavailable`
    /// until [`rebuild_from`](Self::rebuild_from) is called.
    pub fn uninitialized() -> Self {
        Self { corpus: None }
    }

    /// True once the index can serve queries.
    pub fn is_available(&self) -> bool {
        self.corpus.is_some()
    }

    /// Replaces the contents with `chunks` and marks the index available.
    pub fn rebuild_from<I>(&mut self, chunks: I)
    where
        I: IntoIterator<Item = (ChunkId, String)>,
    {
        let texts: BTreeMap<u64, String> = chunks
            .into_iter()
            .map(|(id, text)| (id.as_u64(), text))
            .collect();
        debug!("Rebuilding lexical index with {} chunks", texts.len());
        self.corpus = Some(Bm25Corpus::build(texts));
    }

    fn corpus(&self) -> Result<&Bm25Corpus, RetrievalError> {
        self.corpus.as_ref().ok_or_else(|| {
            RetrievalError::IndexUnavailable("lexical index not initialized".to_string())
        })
    }

    fn corpus_mut(&mut self) -> Result<&mut Bm25Corpus, RetrievalError> {
        self.corpus.as_mut().ok_or_else(|| {
            RetrievalError::IndexUnavailable("lexical index not initialized".to_string())
        })
    }

    /// Adds (or replaces) a chunk's text.
    #[instrument(skip_all, fields(chunk_id = %chunk_id, text_len = text.len()))]
    pub fn add(&mut self, chunk_id: ChunkId, text: String) -> Result<(), RetrievalError> {
        let corpus = self.corpus_mut()?;
        corpus.engine.upsert(Document {
            id: chunk_id.as_u64(),
            contents: text.clone(),
        });
        corpus.texts.insert(chunk_id.as_u64(), text);
        Ok(())
    }

    /// Removes chunks. Returns how many were present.
    ///
    /// The bm25 engine has no delete, so the corpus is rebuilt without them.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> Result<usize, RetrievalError> {
        let corpus = self.corpus_mut()?;
        let mut texts = std::mem::take(&mut corpus.texts);
        let removed = chunk_ids
            .iter()
            .filter(|id| texts.remove(&id.as_u64()).is_some())
            .count();
        *corpus = Bm25Corpus::build(texts);
        Ok(removed)
    }

    /// Returns true if the chunk is indexed.
    pub fn contains(&self, chunk_id: ChunkId) -> bool {
        self.corpus
            .as_ref()
            .is_some_and(|c| c.texts.contains_key(&chunk_id.as_u64()))
    }

    /// Searches for chunks matching `terms`.
    ///
    /// Returns at most `limit` hits ordered best first (ascending score), ties
    /// broken by ascending chunk id. An empty term list or no matching term
    /// yields an empty vector.
    pub fn search(&self, terms: &[String], limit: usize) -> Result<Vec<LexicalHit>, RetrievalError> {
        let corpus = self.corpus()?;
        if terms.is_empty() || limit == 0 || corpus.texts.is_empty() {
            return Ok(Vec::new());
        }

        // Score every match so the tie-break, not the engine, decides the cut.
        let query = terms.join(" ");
        let mut hits: Vec<LexicalHit> = corpus
            .engine
            .search(&query, corpus.texts.len())
            .into_iter()
            .map(|result| LexicalHit {
                chunk_id: ChunkId::from_u64(result.document.id),
                score: -result.score,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Returns the number of indexed chunks (0 when uninitialized).
    pub fn len(&self) -> usize {
        self.corpus.as_ref().map_or(0, |c| c.texts.len())
    }

    /// Returns `true` if no chunks are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}
