//! Test utilities for tessera-core.
//!
//! Deterministic stand-ins for the embedding and generation collaborators.
//! Only compiled when running tests.

use crate::citation::extract_citations;
use crate::error::RetrievalError;
use crate::generation::{Embedder, GenerationRequest, Generator, ModelConfig};
use crate::search::query::word_tokens;
use std::cell::{Cell, RefCell};
use std::time::Duration;

/// Model config used across unit tests.
pub fn test_model(dim: usize) -> ModelConfig {
    ModelConfig {
        chat_model: "test-chat".to_string(),
        embed_model: "test-embed".to_string(),
        embedding_dim: dim,
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

/// Bag-of-words embedder: each word token adds 1.0 to a hashed bucket.
///
/// Produces `model.embedding_dim` values, so swapping the model handle changes
/// the output length. Texts sharing words get similar vectors.
#[derive(Default)]
pub struct HashEmbedder {
    failing: Cell<bool>,
    calls: Cell<usize>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `EmbeddingFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

#[async_trait::async_trait(?Send)]
impl Embedder for HashEmbedder {
    async fn embed(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.calls.set(self.calls.get() + 1);
        if self.failing.get() {
            return Err(RetrievalError::EmbeddingFailed(
                "embedding backend unreachable".to_string(),
            ));
        }
        let mut vector = vec![0.0; model.embedding_dim];
        for token in word_tokens(text) {
            let bucket = (fnv1a(&token) % model.embedding_dim as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// How [`ScriptedGenerator`] answers.
pub enum Script {
    /// Returns the text verbatim
    Reply(String),
    /// Cites the first chunk of the context with a bare marker
    CiteFirst,
    /// Fails with `GenerationFailed`
    Fail,
    /// Sleeps, then replies
    Slow(Duration),
}

/// Generator that follows a [`Script`] and records every request.
pub struct ScriptedGenerator {
    script: Script,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn reply(text: &str) -> Self {
        Self::new(Script::Reply(text.to_string()))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

#[async_trait::async_trait(?Send)]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _model: &ModelConfig,
        request: &GenerationRequest,
    ) -> Result<String, RetrievalError> {
        self.requests.borrow_mut().push(request.clone());
        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::CiteFirst => {
                let first = request
                    .context
                    .lines()
                    .find_map(|line| extract_citations(line).into_iter().next());
                Ok(match first {
                    Some(id) => format!("The sources describe this [cid:{}].", id),
                    None => "Nothing to cite.".to_string(),
                })
            }
            Script::Fail => Err(RetrievalError::GenerationFailed(
                "model returned 500".to_string(),
            )),
            Script::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok("late answer".to_string())
            }
        }
    }
}
