//! # Tessera Core
//!
//! Hybrid retrieval engine: BM25 lexical search and dense vector search fused with
//! Reciprocal Rank Fusion, followed by citation enforcement on the generated answer.
//!
//! This crate holds the algorithms and the consistency rules. Embedding and text
//! generation are external collaborators reached through the traits in [`generation`];
//! frontends (the `tessera` CLI, an HTTP layer) sit on top of [`orchestrator`].
//!
//! ## Modules
//!
//! - [`search`] - Lexical index (BM25), vector index (HNSW), query modes, RRF fusion
//! - [`storage`] - Chunk store trait with in-memory and redb backends
//! - [`citation`] - Citation marker extraction and allow-list validation
//! - [`orchestrator`] - Query state machine, write-path coordinator, diagnostics
//! - [`generation`] - Embedder/generator traits and the versioned model handle
//! - [`memory`] - Per-session chat history
//! - [`config`] - Default tuning constants and [`config::RetrievalSettings`]
//! - [`error`] - Retrieval error taxonomy

pub mod citation;
pub mod config;
pub mod error;
pub mod generation;
pub mod memory;
pub mod orchestrator;
pub mod search;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ErrorKind, RetrievalError};
