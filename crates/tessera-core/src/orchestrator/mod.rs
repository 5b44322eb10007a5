//! Query orchestration: one retrieval-and-answer transaction per call.
//!
//! # Architecture
//!
//! ```text
//! query ──┬──> LexicalIndex (BM25) ─────────────┐
//!         │                                     ├──> RRF fusion ──> top_k
//!         └──> Embedder ──> VectorIndex (HNSW) ─┘                    │
//!                                                                    v
//!                                ChunkStore join ──> context + allow-list
//!                                                                    │
//!                                    Generator (timeout) <───────────┘
//!                                          │
//!                                          v
//!                         cleanup ──> CitationValidator ──> repair ──> Answer
//! ```
//!
//! The two channels run concurrently. Index faults (`IndexUnavailable`,
//! `DimensionMismatch`, `IndexCorrupt`) abort the query. Any other failure of
//! one channel degrades the query to the remaining channel and is reported in
//! [`Diagnostics`]. Orphaned chunk ids are skipped and reported, never silently
//! dropped. No index lock is held across the generation call.
//!
//! Mutation goes through [`IndexWriter`], the single write path.

pub mod context;
pub mod repair;
mod report;
mod state;
mod writer;


pub use context::{format_context, system_prompt, ContextChunk, FALLBACK_ANSWER};
pub use report::{
    Answer, AnswerDebug, ChannelFailure, ChannelResults, CitationDebug, Diagnostics, IndexStats,
    OverlapAnalysis, QueryAnalysis, RetrievalDebug, Source, Timings,
};
pub use state::{QueryState, StateTrace};
pub use writer::{IndexWriter, WriteError, WriteStage};

use crate::citation::{extract_citations, CitationPolicy, CitationValidator};
use crate::config::RetrievalSettings;
use crate::error::RetrievalError;
use crate::generation::{
    Embedder, GenerationRequest, Generator, ModelConfig, ModelHandle, ModelSnapshot, Role,
};
use crate::memory::SessionMemory;
use crate::search::fusion::{fuse_top_k, FusionConfig, FusedHit};
use crate::search::lexical::LexicalIndex;
use crate::search::query::QueryTerms;
use crate::search::types::{normalize, validate_dimension, Channel, ChunkId, DocumentId, LexicalHit, VectorHit};
use crate::search::vector::VectorIndex;
use crate::storage::ChunkStore;
use instant::Instant;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

fn lock_err<T>(e: PoisonError<T>) -> RetrievalError {
    RetrievalError::IndexUnavailable(format!("Index lock poisoned: {}", e))
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Retrieval output before context assembly.
struct Retrieval {
    terms: QueryTerms,
    results: ChannelResults,
    diagnostics: Diagnostics,
    timings: Timings,
}

/// Applies the channel failure policy.
///
/// Index faults abort, with a vector-side `DimensionMismatch` reported first.
/// If exactly one channel failed otherwise, the query continues on the other
/// and the failure is recorded. If both failed, the vector error is returned.
fn settle_channels(
    lexical: Result<Vec<LexicalHit>, RetrievalError>,
    vector: Result<Vec<VectorHit>, RetrievalError>,
) -> Result<(Vec<LexicalHit>, Vec<VectorHit>, Diagnostics), RetrievalError> {
    if let Err(err @ RetrievalError::DimensionMismatch { .. }) = &vector {
        return Err(err.clone());
    }
    for err in [lexical.as_ref().err(), vector.as_ref().err()].into_iter().flatten() {
        if err.is_index_fault() {
            return Err(err.clone());
        }
    }

    let mut diagnostics = Diagnostics::default();
    match (lexical, vector) {
        (Ok(lexical), Ok(vector)) => Ok((lexical, vector, diagnostics)),
        (Ok(lexical), Err(err)) => {
            warn!("Vector channel failed, continuing with lexical results only: {}", err);
            diagnostics
                .channel_failures
                .push(ChannelFailure::new(Channel::Vector, &err));
            Ok((lexical, Vec::new(), diagnostics))
        }
        (Err(err), Ok(vector)) => {
            warn!("Lexical channel failed, continuing with vector results only: {}", err);
            diagnostics
                .channel_failures
                .push(ChannelFailure::new(Channel::Lexical, &err));
            Ok((Vec::new(), vector, diagnostics))
        }
        (Err(_), Err(err)) => Err(err),
    }
}

fn validate_request(query: &str, settings: &RetrievalSettings) -> Result<(), RetrievalError> {
    if query.trim().is_empty() {
        return Err(RetrievalError::InvalidQuery(
            "Query text cannot be empty".to_string(),
        ));
    }
    if settings.top_k == 0 {
        return Err(RetrievalError::InvalidQuery(
            "top_k must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Coordinates retrieval, fusion, generation, and citation enforcement.
///
/// Owns both indexes, the chunk store they reference, the model handle, and
/// session memory. Queries take shared read access to the indexes only for
/// the duration of each search; all mutation goes through [`writer`](Self::writer).
pub struct RetrievalOrchestrator<S: ChunkStore, E: Embedder, G: Generator> {
    store: S,
    embedder: E,
    generator: G,
    models: ModelHandle,
    lexical: RwLock<LexicalIndex>,
    vector: RwLock<VectorIndex>,
    vector_path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
    memory: SessionMemory,
}

impl<S: ChunkStore, E: Embedder, G: Generator> RetrievalOrchestrator<S, E, G> {
    /// Assembles an orchestrator from existing parts without touching the store.
    ///
    /// The lexical index is used as given; pass [`LexicalIndex::uninitialized`]
    /// and call [`rebuild_lexical`](Self::rebuild_lexical) to populate it later.
    pub fn from_parts(
        store: S,
        embedder: E,
        generator: G,
        models: ModelHandle,
        lexical: LexicalIndex,
        vector: VectorIndex,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            models,
            lexical: RwLock::new(lexical),
            vector: RwLock::new(vector),
            vector_path: None,
            write_lock: tokio::sync::Mutex::new(()),
            memory: SessionMemory::new(),
        }
    }

    /// Creates an orchestrator with an in-memory vector index and a lexical
    /// index rebuilt from the store.
    pub async fn new(
        store: S,
        embedder: E,
        generator: G,
        model: ModelConfig,
    ) -> Result<Self, RetrievalError> {
        let orchestrator = Self::from_parts(
            store,
            embedder,
            generator,
            ModelHandle::new(model),
            LexicalIndex::uninitialized(),
            VectorIndex::new(),
        );
        orchestrator.rebuild_lexical().await?;
        Ok(orchestrator)
    }

    /// Opens an orchestrator whose vector index persists to `vector_path`.
    ///
    /// A missing file starts an empty index; an unreadable one fails with
    /// `IndexCorrupt`. Count or dimension disagreements between the store,
    /// the loaded index, and the model are logged, not fatal: they surface as
    /// orphan diagnostics or `DimensionMismatch` at query time.
    pub async fn open(
        store: S,
        embedder: E,
        generator: G,
        model: ModelConfig,
        vector_path: impl Into<PathBuf>,
    ) -> Result<Self, RetrievalError> {
        let vector_path = vector_path.into();
        let vector = VectorIndex::load_or_new(&vector_path)?;
        let model_dim = model.embedding_dim;

        let mut orchestrator = Self::from_parts(
            store,
            embedder,
            generator,
            ModelHandle::new(model),
            LexicalIndex::uninitialized(),
            vector,
        );
        orchestrator.vector_path = Some(vector_path);
        let chunks = orchestrator.rebuild_lexical().await?;

        let (vectors, dimension) = {
            let vector = orchestrator.vector.read().map_err(lock_err)?;
            (vector.len(), vector.dimension())
        };
        if vectors != chunks {
            warn!(
                "Vector index holds {} vectors but the chunk store has {} chunks",
                vectors, chunks
            );
        }
        if let Some(dimension) = dimension.filter(|&d| d != model_dim) {
            warn!(
                "Vector index dimension {} differs from the embedding model's {}; queries will fail until the index is reset and re-ingested",
                dimension, model_dim
            );
        }
        info!("Opened index: {} chunks, {} vectors", chunks, vectors);
        Ok(orchestrator)
    }

    /// Rebuilds the lexical index from every chunk in the store.
    ///
    /// Returns the number of chunks indexed.
    pub async fn rebuild_lexical(&self) -> Result<usize, RetrievalError> {
        let chunks = self.store.iter_chunks().await?;
        let count = chunks.len();
        let mut lexical = self.lexical.write().map_err(lock_err)?;
        lexical.rebuild_from(chunks.into_iter().map(|c| (c.id, c.text)));
        Ok(count)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn models(&self) -> &ModelHandle {
        &self.models
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn vector_path(&self) -> Option<&Path> {
        self.vector_path.as_deref()
    }

    /// Waits for exclusive write access and returns the write-path coordinator.
    pub async fn writer(&self) -> IndexWriter<'_, S, E> {
        let guard = self.write_lock.lock().await;
        IndexWriter {
            store: &self.store,
            embedder: &self.embedder,
            models: &self.models,
            lexical: &self.lexical,
            vector: &self.vector,
            vector_path: self.vector_path.as_deref(),
            _guard: guard,
        }
    }

    fn search_lexical(&self, terms: &QueryTerms, limit: usize) -> Result<Vec<LexicalHit>, RetrievalError> {
        let lexical = self.lexical.read().map_err(lock_err)?;
        lexical.search(&terms.terms, limit)
    }

    async fn search_vector(
        &self,
        query: &str,
        model: &ModelConfig,
        limit: usize,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        // Fail on a swapped model before spending an embedding call.
        let dimension = self.vector.read().map_err(lock_err)?.dimension();
        if let Some(expected) = dimension {
            validate_dimension(expected, model.embedding_dim)?;
        }

        let mut embedding = self.embedder.embed(model, query).await?;
        normalize(&mut embedding);

        let vector = self.vector.read().map_err(lock_err)?;
        vector.search(&embedding, limit)
    }

    async fn retrieve(
        &self,
        query: &str,
        settings: &RetrievalSettings,
        model: &ModelConfig,
    ) -> Result<Retrieval, RetrievalError> {
        let started = Instant::now();
        let terms = settings.query_mode.tokenize(query);

        let vector_search = async {
            let start = Instant::now();
            let result = self.search_vector(query, model, settings.vec_k).await;
            (result, elapsed_ms(start))
        };
        let lexical_search = async {
            let start = Instant::now();
            (self.search_lexical(&terms, settings.bm25_k), elapsed_ms(start))
        };
        // Vector first: the lexical future never yields.
        let ((vector, vector_ms), (lexical, lexical_ms)) = tokio::join!(vector_search, lexical_search);

        let (lexical, vector, diagnostics) = settle_channels(lexical, vector)?;

        let fusion_start = Instant::now();
        let fusion = FusionConfig {
            k: settings.rrf_k,
            lexical_weight: settings.lexical_weight,
            vector_weight: settings.vector_weight,
        };
        let fused = fuse_top_k(&lexical, &vector, &fusion, settings.top_k);
        let fusion_ms = elapsed_ms(fusion_start);

        debug!(
            "Retrieved {} lexical, {} vector, {} fused (terms: {:?})",
            lexical.len(),
            vector.len(),
            fused.len(),
            terms.terms
        );

        Ok(Retrieval {
            terms,
            results: ChannelResults {
                lexical,
                vector,
                fused,
            },
            diagnostics,
            timings: Timings {
                lexical_ms,
                vector_ms,
                fusion_ms,
                total_ms: elapsed_ms(started),
            },
        })
    }

    /// Joins fused hits against the store, skipping and reporting orphans.
    async fn build_context(
        &self,
        fused: &[FusedHit],
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<ContextChunk>, RetrievalError> {
        let ids: Vec<ChunkId> = fused.iter().map(|h| h.chunk_id).collect();
        let mut chunks: HashMap<ChunkId, _> = self
            .store
            .get_chunks_batch(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let mut filenames: HashMap<DocumentId, String> = HashMap::new();

        let mut context = Vec::with_capacity(fused.len());
        for hit in fused {
            let Some(chunk) = chunks.remove(&hit.chunk_id) else {
                warn!("{}; skipping it", RetrievalError::OrphanedVectorReference(hit.chunk_id));
                diagnostics.orphaned_chunks.push(hit.chunk_id);
                continue;
            };

            let filename = match filenames.get(&chunk.document_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .get_document(chunk.document_id)
                        .await?
                        .map(|d| d.filename)
                        .unwrap_or_else(|| format!("document-{}", chunk.document_id));
                    filenames.insert(chunk.document_id, name.clone());
                    name
                }
            };

            context.push(ContextChunk {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                filename,
                ordinal: chunk.ordinal,
                text: chunk.text,
                hit: hit.clone(),
            });
        }
        Ok(context)
    }

    async fn generate(
        &self,
        model: &ModelConfig,
        request: &GenerationRequest,
        timeout_ms: u64,
    ) -> Result<String, RetrievalError> {
        let generation = self.generator.generate(model, request);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), generation).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::GenerationTimeout { timeout_ms }),
        }
    }

    /// Retrieves, generates, and validates an answer to `query`.
    ///
    /// With a `session_id`, the last `settings.memory_turns` turns of that
    /// session are replayed to the generator and both the question and the
    /// answer are recorded.
    ///
    /// # Errors
    ///
    /// - `InvalidQuery` for an empty query or `top_k == 0`
    /// - `IndexUnavailable`, `DimensionMismatch`, `IndexCorrupt` from either index
    /// - `EmbeddingFailed` / lexical failures only when both channels fail
    /// - `GenerationFailed`, `GenerationTimeout` from the generation step
    ///
    /// Orphaned chunks and citation problems do not fail the query; they are
    /// reported in [`Answer::debug`].
    #[instrument(skip_all, fields(query_len = query.len(), top_k = settings.top_k))]
    pub async fn retrieve_and_answer(
        &self,
        query: &str,
        settings: &RetrievalSettings,
        session_id: Option<&str>,
    ) -> Result<Answer, RetrievalError> {
        let mut trace = StateTrace::new();
        let result = self.answer(query, settings, session_id, &mut trace).await;
        if let Err(err) = &result {
            trace.fail();
            warn!(kind = ?err.kind(), states = ?trace.states(), "Query failed: {}", err);
        }
        result
    }

    async fn answer(
        &self,
        query: &str,
        settings: &RetrievalSettings,
        session_id: Option<&str>,
        trace: &mut StateTrace,
    ) -> Result<Answer, RetrievalError> {
        validate_request(query, settings)?;
        let snapshot = self.models.snapshot()?;

        let history = match session_id {
            Some(id) if settings.memory_turns > 0 => self.memory.recent(id, settings.memory_turns)?,
            _ => Vec::new(),
        };
        if let Some(id) = session_id {
            self.memory.append(id, Role::User, query)?;
        }

        trace.advance(QueryState::LexicalAndVectorDispatched);
        let Retrieval {
            results,
            mut diagnostics,
            ..
        } = self.retrieve(query, settings, &snapshot.config).await?;
        trace.advance(QueryState::Fused);

        if results.fused.is_empty() {
            return self.fallback(results, diagnostics, trace, session_id, &snapshot);
        }

        let sources = self.build_context(&results.fused, &mut diagnostics).await?;
        trace.advance(QueryState::ContextBuilt);
        if sources.is_empty() {
            return self.fallback(results, diagnostics, trace, session_id, &snapshot);
        }

        let allowed_ids: Vec<ChunkId> = sources.iter().map(|c| c.chunk_id).collect();
        let allow_list: BTreeSet<ChunkId> = allowed_ids.iter().copied().collect();
        let request = GenerationRequest {
            system_prompt: system_prompt(&allowed_ids),
            history,
            question: query.to_string(),
            context: format_context(&sources),
        };

        trace.advance(QueryState::AwaitingGeneration);
        let generated = self
            .generate(&snapshot.config, &request, settings.generation_timeout_ms)
            .await?;

        let validator = CitationValidator::new(CitationPolicy {
            min_unique_citations: settings.min_unique_citations,
            require_citation_per_paragraph: settings.require_citation_per_paragraph,
        });
        let cleaned = repair::clean_answer(&generated);
        let generated_validation = validator.validate_text(&generated, &allow_list);
        let generated_report = validator.report(&cleaned, &allow_list);
        if !generated_validation.invalid_ids.is_empty() {
            warn!(
                invalid = ?generated_validation.invalid_ids,
                "Generator cited chunks outside the allow-list"
            );
        }

        let (text, report, repaired) = if !generated_report.ok && settings.repair_citations {
            let outcome = repair::repair_citations(
                &cleaned,
                generated_report.clone(),
                &sources,
                &validator,
                &allow_list,
                settings.rewrite_invalid_citations,
            );
            (outcome.text, outcome.report, outcome.repaired)
        } else {
            (cleaned, generated_report.clone(), false)
        };
        let validation = validator.validate_text(&text, &allow_list);
        if !validation.valid {
            warn!(
                invalid = ?validation.invalid_ids,
                missing_coverage = validation.missing_coverage,
                "Returning answer with citation problems: {}",
                report.reason
            );
        }
        trace.advance(QueryState::Validated);

        if let Some(id) = session_id {
            self.memory.append(id, Role::Assistant, text.clone())?;
        }
        trace.advance(QueryState::Done);

        Ok(Answer {
            answer: text,
            sources: sources.iter().map(Source::from).collect(),
            debug: AnswerDebug {
                results,
                validation,
                citation_report: Some(report),
                generated_answer: Some(generated),
                generated_validation,
                generated_report: Some(generated_report),
                repaired,
                diagnostics,
                states: trace.clone(),
                model_version: snapshot.version,
            },
        })
    }

    fn fallback(
        &self,
        results: ChannelResults,
        diagnostics: Diagnostics,
        trace: &mut StateTrace,
        session_id: Option<&str>,
        snapshot: &ModelSnapshot,
    ) -> Result<Answer, RetrievalError> {
        info!("No sources retrieved; returning the fallback answer");
        if let Some(id) = session_id {
            self.memory.append(id, Role::Assistant, FALLBACK_ANSWER)?;
        }
        trace.advance(QueryState::Done);

        let validation = CitationValidator::default().validate(&BTreeSet::new(), &BTreeSet::new());
        Ok(Answer {
            answer: FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            debug: AnswerDebug {
                results,
                generated_validation: validation.clone(),
                validation,
                citation_report: None,
                generated_answer: None,
                generated_report: None,
                repaired: false,
                diagnostics,
                states: trace.clone(),
                model_version: snapshot.version,
            },
        })
    }

    /// Runs retrieval and fusion only, with per-step introspection.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub async fn debug_retrieval(
        &self,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Result<RetrievalDebug, RetrievalError> {
        validate_request(query, settings)?;
        let snapshot = self.models.snapshot()?;
        let retrieval = self.retrieve(query, settings, &snapshot.config).await?;

        let overlap = OverlapAnalysis::compute(&retrieval.results.lexical, &retrieval.results.vector);
        let terms = &retrieval.terms;
        Ok(RetrievalDebug {
            query: QueryAnalysis {
                mode: settings.query_mode.label(),
                original_tokens: terms.original_tokens.clone(),
                terms: terms.terms.clone(),
                removed_tokens: terms.removed_tokens(),
                lexical_query: terms.as_query(),
            },
            overlap,
            timings: retrieval.timings,
            diagnostics: retrieval.diagnostics,
            model_version: snapshot.version,
            results: retrieval.results,
        })
    }

    /// Runs the full pipeline without session memory and reports citation
    /// extraction and validation for the generated and the returned text.
    pub async fn debug_citations(
        &self,
        query: &str,
        settings: &RetrievalSettings,
    ) -> Result<CitationDebug, RetrievalError> {
        let answer = self.retrieve_and_answer(query, settings, None).await?;
        let generated = answer.debug.generated_answer.as_deref().unwrap_or(&answer.answer);
        Ok(CitationDebug {
            extracted_citations: extract_citations(generated),
            allow_list: answer.allow_list(),
            generated_validation: answer.debug.generated_validation,
            validation: answer.debug.validation,
            report: answer.debug.citation_report,
            repaired: answer.debug.repaired,
            answer: answer.answer,
        })
    }

    /// Store and index counters.
    pub async fn stats(&self) -> Result<IndexStats, RetrievalError> {
        let documents = self.store.document_count().await?;
        let chunks = self.store.chunk_count().await?;
        let lexical_chunks = self.lexical.read().map_err(lock_err)?.len();
        let (vector_chunks, vector_tombstones, dimension) = {
            let vector = self.vector.read().map_err(lock_err)?;
            (vector.len(), vector.tombstone_count(), vector.dimension())
        };
        let snapshot: Arc<ModelSnapshot> = self.models.snapshot()?;

        Ok(IndexStats {
            documents,
            chunks,
            lexical_chunks,
            vector_chunks,
            vector_tombstones,
            dimension,
            model_version: snapshot.version,
            chat_model: snapshot.config.chat_model.clone(),
            embed_model: snapshot.config.embed_model.clone(),
        })
    }
}

impl From<&ContextChunk> for Source {
    fn from(chunk: &ContextChunk) -> Self {
        Source {
            chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            filename: chunk.filename.clone(),
            ordinal: chunk.ordinal,
            score: chunk.hit.fused_score,
            channel: chunk.hit.provenance(),
        }
    }
}
