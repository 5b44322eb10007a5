//! End-to-end tests for the retrieval pipeline.
//!
//! These tests exercise the full workflow against deterministic collaborators:
//! 1. Write path: embed → chunk store → vector index → lexical index → persist
//! 2. Query: lexical + vector search → RRF fusion → context → generation → citations
//!
//! Run with: `cargo test -p tessera-core --test integration_tests`

mod common;

use common::{corpus, model, BagOfWordsEmbedder, EchoGenerator};
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;
use tessera_core::citation::{extract_citations, CitationValidator};
use tessera_core::config::RetrievalSettings;
use tessera_core::orchestrator::{QueryState, RetrievalOrchestrator, FALLBACK_ANSWER};
use tessera_core::search::{
    fuse, ChunkId, FusionConfig, LexicalHit, Provenance, VectorHit, VectorIndex,
};
use tessera_core::storage::{ChunkStore, InMemoryChunkStore, RedbChunkStore};
use tessera_core::{ErrorKind, RetrievalError};

const DIM: usize = 32;

// ============================================================================
// Fixtures
// ============================================================================

async fn ingest<S: ChunkStore>(
    orchestrator: &RetrievalOrchestrator<S, BagOfWordsEmbedder, EchoGenerator>,
) {
    let writer = orchestrator.writer().await;
    for (filename, chunks) in corpus() {
        writer
            .add_document(filename, &chunks, &BTreeMap::new())
            .await
            .expect("ingest corpus");
    }
}

type MemoryOrchestrator =
    RetrievalOrchestrator<InMemoryChunkStore, BagOfWordsEmbedder, EchoGenerator>;

async fn in_memory(generator: EchoGenerator) -> MemoryOrchestrator {
    let orchestrator = RetrievalOrchestrator::new(
        InMemoryChunkStore::new(),
        BagOfWordsEmbedder::default(),
        generator,
        model(DIM),
    )
    .await
    .unwrap();
    ingest(&orchestrator).await;
    orchestrator
}

fn ids(values: &[u64]) -> BTreeSet<ChunkId> {
    values.iter().copied().map(ChunkId::from_u64).collect()
}

// ============================================================================
// Component scenarios
// ============================================================================

#[test]
fn test_rrf_scenario() {
    let lexical = vec![
        LexicalHit {
            chunk_id: ChunkId::from_u64(5),
            score: -3.2,
        },
        LexicalHit {
            chunk_id: ChunkId::from_u64(9),
            score: -1.1,
        },
    ];
    let vector = vec![
        VectorHit {
            chunk_id: ChunkId::from_u64(9),
            score: 0.91,
        },
        VectorHit {
            chunk_id: ChunkId::from_u64(7),
            score: 0.80,
        },
    ];

    let fused = fuse(&lexical, &vector, &FusionConfig::with_k(60));
    let order: Vec<u64> = fused.iter().map(|h| h.chunk_id.as_u64()).collect();
    assert_eq!(order, vec![9, 5, 7]);

    assert!((fused[0].fused_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
    assert_eq!(fused[0].provenance(), Provenance::Both);
    assert!((fused[1].fused_score - 1.0 / 61.0).abs() < 1e-6);
    assert!((fused[2].fused_score - 1.0 / 62.0).abs() < 1e-6);
}

#[test]
fn test_citation_scenarios() {
    let validator = CitationValidator::default();
    let allow = ids(&[7, 9, 5]);

    let result = validator.validate_text("The answer [cid:42].", &allow);
    assert!(!result.valid);
    assert_eq!(result.invalid_ids, ids(&[42]));
    assert!(!result.missing_coverage);

    let result = validator.validate_text("An answer with no markers.", &allow);
    assert!(result.missing_coverage);

    let both_forms = "One [cid:9]. Two [Source: b.md | cid:9].";
    assert_eq!(extract_citations(both_forms), ids(&[9]));
}

#[test]
fn test_dimension_mismatch_leaves_index_unchanged() {
    let mut index = VectorIndex::new();
    index.add(ChunkId::from_u64(1), vec![0.5; 1024]).unwrap();

    let err = index.add(ChunkId::from_u64(2), vec![0.5; 768]).unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::DimensionMismatch {
            expected: 1024,
            actual: 768
        }
    ));
    assert_eq!(index.len(), 1);
    assert!(!index.contains(ChunkId::from_u64(2)));
    assert_eq!(index.dimension(), Some(1024));
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_full_pipeline() {
    let orchestrator = in_memory(EchoGenerator::default()).await;
    let answer = orchestrator
        .retrieve_and_answer(
            "how does reciprocal rank fusion work",
            &RetrievalSettings::default(),
            None,
        )
        .await
        .unwrap();

    assert!(!answer.sources.is_empty());
    assert!(answer.sources.len() <= 8);
    assert!(answer.debug.validation.valid, "{:?}", answer.debug.validation);
    assert!(!answer.debug.repaired);
    assert_eq!(answer.debug.states.states().last(), Some(&QueryState::Done));
    assert_eq!(answer.sources[0].filename, "fusion.md");

    let cited = extract_citations(&answer.answer);
    assert!(cited.is_subset(&answer.allow_list()));
}

#[tokio::test]
async fn test_top_k_truncates_after_fusion() {
    let orchestrator = in_memory(EchoGenerator::default()).await;
    let settings = RetrievalSettings::default().with_depths(20, 20, 2);
    let debug = orchestrator
        .debug_retrieval("reciprocal rank fusion", &settings)
        .await
        .unwrap();

    assert_eq!(debug.results.fused.len(), 2);
    assert!(debug
        .results
        .fused
        .windows(2)
        .all(|w| w[0].fused_score >= w[1].fused_score));
    assert!(debug.results.vector.len() > 2);
}

#[tokio::test]
async fn test_answer_json_shape() {
    let orchestrator = in_memory(EchoGenerator::default()).await;
    let answer = orchestrator
        .retrieve_and_answer("cosine similarity", &RetrievalSettings::default(), None)
        .await
        .unwrap();

    let json = serde_json::to_value(&answer).unwrap();
    assert!(json["answer"].is_string());
    assert!(json["sources"][0]["chunk_id"].is_u64());
    assert!(json["sources"][0]["channel"].is_string());
    assert!(json["debug"]["lexical"].is_array());
    assert!(json["debug"]["vector"].is_array());
    assert!(json["debug"]["fused"].is_array());
    assert_eq!(json["debug"]["states"][0], "idle");
}

#[tokio::test]
async fn test_degraded_vector_channel() {
    let embedder = BagOfWordsEmbedder::default();
    let failing = embedder.failing.clone();
    let orchestrator = RetrievalOrchestrator::new(
        InMemoryChunkStore::new(),
        embedder,
        EchoGenerator::default(),
        model(DIM),
    )
    .await
    .unwrap();
    ingest(&orchestrator).await;
    failing.set(true);

    let answer = orchestrator
        .retrieve_and_answer("term frequency", &RetrievalSettings::default(), None)
        .await
        .unwrap();
    assert!(answer.debug.diagnostics.degraded());
    assert_eq!(
        answer.debug.diagnostics.channel_failures[0].kind,
        ErrorKind::EmbeddingFailed
    );
    assert_eq!(answer.sources[0].filename, "bm25.md");
    assert_eq!(answer.sources[0].channel, Provenance::Lexical);
}

#[tokio::test]
async fn test_repair_cites_uncited_paragraph() {
    let orchestrator = in_memory(EchoGenerator::replying(
        "Fusion sums reciprocal ranks [cid:999].\n\nThe constant dampens first place.",
    ))
    .await;

    let answer = orchestrator
        .retrieve_and_answer("reciprocal rank fusion", &RetrievalSettings::default(), None)
        .await
        .unwrap();
    assert!(answer.debug.repaired);
    assert!(answer.answer.starts_with("Fusion sums reciprocal ranks [cid:999]."));
    let paragraphs: Vec<&str> = answer.answer.split("\n\n").collect();
    assert_eq!(paragraphs.len(), 2);
    assert!(!extract_citations(paragraphs[1]).is_empty());

    let invalid: BTreeSet<ChunkId> = [ChunkId::from_u64(999)].into_iter().collect();
    assert!(!answer.debug.validation.valid);
    assert_eq!(answer.debug.validation.invalid_ids, invalid);
    assert_eq!(answer.debug.generated_validation.invalid_ids, invalid);
}

#[tokio::test]
async fn test_model_swap_dimension_mismatch() {
    let orchestrator = in_memory(EchoGenerator::default()).await;
    let snapshot = orchestrator.models().swap(model(DIM * 2)).unwrap();
    assert_eq!(snapshot.version, 2);

    let err = orchestrator
        .retrieve_and_answer("rank fusion", &RetrievalSettings::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    assert_eq!(
        err.to_string(),
        format!(
            "Embedding dimension mismatch: index expects {}, got {}",
            DIM,
            DIM * 2
        )
    );
}

#[tokio::test]
async fn test_no_match_returns_fallback() {
    let orchestrator = RetrievalOrchestrator::new(
        InMemoryChunkStore::new(),
        BagOfWordsEmbedder::default(),
        EchoGenerator::default(),
        model(DIM),
    )
    .await
    .unwrap();

    let answer = orchestrator
        .retrieve_and_answer("anything", &RetrievalSettings::default(), Some("session"))
        .await
        .unwrap();
    assert_eq!(answer.answer, FALLBACK_ANSWER);
    assert_eq!(orchestrator.memory().len("session").unwrap(), 2);
}

#[tokio::test]
async fn test_persistent_pipeline_round_trip() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("chunks.redb");
    let vector_path = dir.path().join("vectors.redb");

    let before = {
        let orchestrator = RetrievalOrchestrator::open(
            RedbChunkStore::open(&store_path).unwrap(),
            BagOfWordsEmbedder::default(),
            EchoGenerator::default(),
            model(DIM),
            &vector_path,
        )
        .await
        .unwrap();
        ingest(&orchestrator).await;
        orchestrator
            .debug_retrieval("dense vectors cosine", &RetrievalSettings::default())
            .await
            .unwrap()
    };

    let reopened = RetrievalOrchestrator::open(
        RedbChunkStore::open(&store_path).unwrap(),
        BagOfWordsEmbedder::default(),
        EchoGenerator::default(),
        model(DIM),
        &vector_path,
    )
    .await
    .unwrap();
    let after = reopened
        .debug_retrieval("dense vectors cosine", &RetrievalSettings::default())
        .await
        .unwrap();

    let ids_of = |hits: &[VectorHit]| hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>();
    assert_eq!(ids_of(&before.results.vector), ids_of(&after.results.vector));
    assert_eq!(before.results.lexical, after.results.lexical);

    // Deleting through the write path keeps store and indexes aligned on disk.
    let writer = reopened.writer().await;
    let documents = reopened.store().list_documents().await.unwrap();
    let vectors_doc = documents
        .iter()
        .find(|d| d.filename == "vectors.md")
        .unwrap();
    writer.delete_document(vectors_doc.id).await.unwrap();
    drop(writer);

    let loaded = VectorIndex::load(&vector_path).unwrap();
    for chunk_id in &vectors_doc.chunk_ids {
        assert!(!loaded.contains(*chunk_id));
    }
    assert_eq!(loaded.len(), reopened.stats().await.unwrap().chunks);
}
