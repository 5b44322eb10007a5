//! Command implementations.
//!
//! Each command opens the on-disk index in the data directory, runs one
//! orchestrator operation, and returns the rendered output.

use crate::config::{self, CliConfig};
use crate::ollama::OllamaClient;
use crate::output;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tessera_core::orchestrator::RetrievalOrchestrator;
use tessera_core::search::types::get_current_timestamp;
use tessera_core::search::{DocumentId, DocumentRecord};
use tessera_core::storage::RedbChunkStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

pub type Engine = RetrievalOrchestrator<RedbChunkStore, Arc<OllamaClient>, Arc<OllamaClient>>;

/// One line of an ingest file.
#[derive(Debug, Deserialize)]
struct IngestLine {
    filename: String,
    chunks: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Opens (or creates) the chunk store and vector index under `data_dir`.
pub async fn open_engine(config: &CliConfig, data_dir: &Path) -> Result<Engine> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let chunks_path = config::chunks_path(data_dir);
    info!("Opening chunk store: {}", chunks_path.display());
    let store = RedbChunkStore::open(&chunks_path)
        .with_context(|| format!("Failed to open chunk store: {}", chunks_path.display()))?;

    let client = Arc::new(OllamaClient::new(config)?);
    RetrievalOrchestrator::open(
        store,
        client.clone(),
        client,
        config.model(),
        config::vectors_path(data_dir),
    )
    .await
    .context("Failed to open index")
}

/// Ingests a JSONL file of pre-chunked documents.
///
/// Each line is `{"filename": .., "chunks": [..], "metadata": {..}}`; blank
/// lines are skipped. Documents before a failing line stay ingested.
pub async fn ingest(engine: &Engine, path: &Path, json: bool) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let writer = engine.writer().await;
    let mut documents = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let location = format!("{}:{}", path.display(), number + 1);
        let entry: IngestLine = serde_json::from_str(line)
            .with_context(|| format!("{}: not a valid document line", location))?;
        let record = writer
            .add_document(&entry.filename, &entry.chunks, &entry.metadata)
            .await
            .with_context(|| format!("{}: failed to ingest {}", location, entry.filename))?;
        documents.push(record);
    }

    Ok(if json {
        output::format_json(&documents)
    } else {
        output::format_ingested(&documents)
    })
}

pub async fn ask(engine: &Engine, config: &CliConfig, query: &str, json: bool) -> Result<String> {
    let answer = engine
        .retrieve_and_answer(query, &config.retrieval, None)
        .await
        .context("Query failed")?;
    Ok(if json {
        output::format_json(&answer)
    } else {
        output::format_answer(&answer)
    })
}

/// Interactive loop with session memory. Ends on EOF, `exit`, or `quit`.
pub async fn chat(engine: &Engine, config: &CliConfig, json: bool) -> Result<()> {
    let session_id = format!("cli-{}", get_current_timestamp());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }

        match engine
            .retrieve_and_answer(query, &config.retrieval, Some(&session_id))
            .await
        {
            Ok(answer) => {
                let rendered = if json {
                    output::format_json(&answer)
                } else {
                    output::format_answer(&answer)
                };
                stdout.write_all(format!("{}\n\n", rendered).as_bytes()).await?;
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

pub async fn debug_retrieval(
    engine: &Engine,
    config: &CliConfig,
    query: &str,
    json: bool,
) -> Result<String> {
    let debug = engine
        .debug_retrieval(query, &config.retrieval)
        .await
        .context("Retrieval failed")?;
    Ok(if json {
        output::format_json(&debug)
    } else {
        output::format_retrieval(&debug)
    })
}

pub async fn debug_citations(
    engine: &Engine,
    config: &CliConfig,
    query: &str,
    json: bool,
) -> Result<String> {
    let debug = engine
        .debug_citations(query, &config.retrieval)
        .await
        .context("Query failed")?;
    Ok(if json {
        output::format_json(&debug)
    } else {
        output::format_citations(&debug)
    })
}

pub async fn stats(engine: &Engine, json: bool) -> Result<String> {
    let stats = engine.stats().await?;
    Ok(if json {
        output::format_json(&stats)
    } else {
        output::format_stats(&stats)
    })
}

pub async fn delete(engine: &Engine, id: u64, json: bool) -> Result<String> {
    let writer = engine.writer().await;
    let removed: Option<DocumentRecord> = writer.delete_document(DocumentId::from_u64(id)).await?;
    let record = removed.ok_or_else(|| anyhow!("No document with id {}", id))?;
    Ok(if json {
        output::format_json(&record)
    } else {
        format!(
            "Deleted document {} ({}, {} chunks)",
            record.id,
            record.filename,
            record.chunk_ids.len()
        )
    })
}

/// Drops every document and both indexes. The vector dimension is unset, so
/// the next ingest may use a different embedding model.
pub async fn reset(engine: &Engine, confirmed: bool, json: bool) -> Result<String> {
    if !confirmed {
        bail!("Reset deletes every indexed document; pass --yes to confirm");
    }
    let removed = engine.writer().await.reset().await?;
    Ok(if json {
        output::format_json(&serde_json::json!({ "documents_removed": removed }))
    } else {
        format!(
            "Reset index, removed {} document{}",
            removed,
            if removed == 1 { "" } else { "s" }
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ingest_line_parses() {
        let entry: IngestLine =
            serde_json::from_str(r#"{"filename":"a.md","chunks":["one","two"]}"#).unwrap();
        assert_eq!(entry.filename, "a.md");
        assert_eq!(entry.chunks.len(), 2);
        assert!(entry.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_open_engine_creates_empty_index() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let engine = open_engine(&CliConfig::default(), &data_dir).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.dimension, None);
        assert!(config::chunks_path(&data_dir).exists());
    }

    #[tokio::test]
    async fn test_ingest_rejects_malformed_line() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&CliConfig::default(), dir.path()).await.unwrap();
        let path = dir.path().join("docs.jsonl");
        std::fs::write(&path, "\n{\"filename\": \"a.md\"}\n").unwrap();

        let err = ingest(&engine, &path, false).await.unwrap_err();
        assert!(format!("{:#}", err).contains("docs.jsonl:2"));
    }

    #[tokio::test]
    async fn test_delete_unknown_document() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&CliConfig::default(), dir.path()).await.unwrap();
        let err = delete(&engine, 42, false).await.unwrap_err();
        assert!(err.to_string().contains("No document with id 42"));
    }

    #[tokio::test]
    async fn test_reset_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&CliConfig::default(), dir.path()).await.unwrap();
        let err = reset(&engine, false, false).await.unwrap_err();
        assert!(err.to_string().contains("--yes"));

        let output = reset(&engine, true, false).await.unwrap();
        assert_eq!(output, "Reset index, removed 0 documents");
        assert_eq!(engine.stats().await.unwrap().dimension, None);
    }
}
