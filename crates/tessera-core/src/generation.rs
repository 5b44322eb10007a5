//! Seams to the embedding and chat-completion collaborators.
//!
//! The engine never hosts a model. It calls an [`Embedder`] for query and chunk
//! vectors and a [`Generator`] for answers, passing the [`ModelConfig`] snapshot
//! the current query runs under. Swapping models goes through [`ModelHandle`],
//! which versions every change so a dimension change surfaces as an explicit
//! `DimensionMismatch` instead of a silently wrong search.

use crate::error::RetrievalError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Names and shape of the models a query runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Chat-completion model name
    pub chat_model: String,
    /// Embedding model name
    pub embed_model: String,
    /// Length of the vectors the embedding model produces
    pub embedding_dim: usize,
}

/// Immutable view of the model configuration at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSnapshot {
    pub version: u64,
    pub config: ModelConfig,
}

/// Shared, swappable model configuration.
///
/// Readers take a cheap [`snapshot`](Self::snapshot) at the start of a query
/// and use it throughout, so a concurrent swap never changes models mid-query.
/// Every [`swap`](Self::swap) bumps the version.
#[derive(Debug)]
pub struct ModelHandle {
    current: RwLock<Arc<ModelSnapshot>>,
}

impl ModelHandle {
    /// Creates a handle at version 1.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ModelSnapshot { version: 1, config })),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Result<Arc<ModelSnapshot>, RetrievalError> {
        let guard = self.current.read().map_err(|e| {
            RetrievalError::IndexUnavailable(format!("Model config lock poisoned: {}", e))
        })?;
        Ok(Arc::clone(&guard))
    }

    /// Replaces the configuration and returns the new snapshot.
    pub fn swap(&self, config: ModelConfig) -> Result<Arc<ModelSnapshot>, RetrievalError> {
        let mut guard = self.current.write().map_err(|e| {
            RetrievalError::IndexUnavailable(format!("Model config lock poisoned: {}", e))
        })?;
        let next = Arc::new(ModelSnapshot {
            version: guard.version + 1,
            config,
        });
        info!(
            "Model config v{}: chat={}, embed={} ({} dims)",
            next.version, next.config.chat_model, next.config.embed_model, next.config.embedding_dim
        );
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything the generator receives for one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Prior turns, oldest first
    pub history: Vec<ChatMessage>,
    pub question: String,
    /// Retrieved chunks with their citation markers
    pub context: String,
}

impl GenerationRequest {
    /// Flattens the request into the chat message list most chat APIs take.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new(
            Role::User,
            format!(
                "Question: {}\n\nSource Documents:\n{}",
                self.question, self.context
            ),
        ));
        messages
    }
}

/// Produces embedding vectors.
///
/// Implementations return `EmbeddingFailed` on any backend error. Vectors do
/// not need to be normalized; the engine normalizes before indexing and
/// querying.
#[async_trait::async_trait(?Send)]
pub trait Embedder {
    async fn embed(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Produces answer text.
///
/// Implementations return `GenerationFailed` on any backend error. Timeouts
/// are enforced by the caller.
#[async_trait::async_trait(?Send)]
pub trait Generator {
    async fn generate(
        &self,
        model: &ModelConfig,
        request: &GenerationRequest,
    ) -> Result<String, RetrievalError>;
}

#[async_trait::async_trait(?Send)]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    async fn embed(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, RetrievalError> {
        (**self).embed(model, text).await
    }
}

#[async_trait::async_trait(?Send)]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(
        &self,
        model: &ModelConfig,
        request: &GenerationRequest,
    ) -> Result<String, RetrievalError> {
        (**self).generate(model, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dim: usize) -> ModelConfig {
        ModelConfig {
            chat_model: "chat".to_string(),
            embed_model: "embed".to_string(),
            embedding_dim: dim,
        }
    }

    #[test]
    fn test_swap_bumps_version() {
        let handle = ModelHandle::new(config(4));
        let before = handle.snapshot().unwrap();
        assert_eq!(before.version, 1);

        let after = handle.swap(config(8)).unwrap();
        assert_eq!(after.version, 2);
        assert_eq!(handle.snapshot().unwrap().config.embedding_dim, 8);

        // Earlier snapshots are unaffected.
        assert_eq!(before.config.embedding_dim, 4);
    }

    #[test]
    fn test_request_to_messages() {
        let request = GenerationRequest {
            system_prompt: "be brief".to_string(),
            history: vec![
                ChatMessage::new(Role::User, "hi"),
                ChatMessage::new(Role::Assistant, "hello"),
            ],
            question: "what is rrf?".to_string(),
            context: "[cid:1] from a.txt:\nrank fusion".to_string(),
        };
        let messages = request.to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[2].content, "hello");
        assert!(messages[3].content.starts_with("Question: what is rrf?"));
        assert!(messages[3].content.contains("[cid:1]"));
    }
}
