//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tessera_core::generation::{Embedder, GenerationRequest, Generator, ModelConfig};
use tessera_core::RetrievalError;

pub fn model(dim: usize) -> ModelConfig {
    ModelConfig {
        chat_model: "fake-chat".to_string(),
        embed_model: "fake-embed".to_string(),
        embedding_dim: dim,
    }
}

/// Maps each lowercase word to a fixed bucket; similar texts share buckets.
///
/// `failing` is shared so a test can flip it after handing the embedder over.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    pub failing: Rc<Cell<bool>>,
}

#[async_trait::async_trait(?Send)]
impl Embedder for BagOfWordsEmbedder {
    async fn embed(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if self.failing.get() {
            return Err(RetrievalError::EmbeddingFailed("offline".to_string()));
        }
        let mut vector = vec![0.0f32; model.embedding_dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
                % model.embedding_dim;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }
}

/// Replies with a fixed text, or, when none is set, cites every chunk in the
/// context paragraph by paragraph.
#[derive(Default)]
pub struct EchoGenerator {
    pub reply: RefCell<Option<String>>,
    pub calls: Cell<usize>,
}

impl EchoGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: RefCell::new(Some(text.to_string())),
            calls: Cell::new(0),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Generator for EchoGenerator {
    async fn generate(
        &self,
        _model: &ModelConfig,
        request: &GenerationRequest,
    ) -> Result<String, RetrievalError> {
        self.calls.set(self.calls.get() + 1);
        if let Some(reply) = self.reply.borrow().as_ref() {
            return Ok(reply.clone());
        }
        let paragraphs: Vec<String> = request
            .context
            .split("\n\n---\n\n")
            .filter_map(|block| {
                let header = block.lines().next()?;
                let marker_end = header.find(']')?;
                Some(format!("A supporting passage {}.", &header[..=marker_end]))
            })
            .collect();
        Ok(paragraphs.join("\n\n"))
    }
}

pub fn corpus() -> Vec<(&'static str, Vec<String>)> {
    vec![
        (
            "fusion.md",
            vec![
                "Reciprocal rank fusion merges ranked lists by summing reciprocal ranks.".to_string(),
                "A smoothing constant of sixty dampens the dominance of first place.".to_string(),
            ],
        ),
        (
            "bm25.md",
            vec!["BM25 scores documents by term frequency and inverse document frequency.".to_string()],
        ),
        (
            "vectors.md",
            vec!["Dense vectors are compared with cosine similarity after normalization.".to_string()],
        ),
    ]
}
