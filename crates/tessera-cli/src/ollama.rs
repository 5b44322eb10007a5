//! Embedding and chat calls against an Ollama-compatible HTTP API.
//!
//! One pooled `reqwest::Client` serves both endpoints:
//! - `POST /api/embed` for query and chunk vectors
//! - `POST /api/chat` (non-streaming) for answers
//!
//! Generation deadlines are enforced by the orchestrator, so only embedding
//! requests carry a client-side timeout.

use crate::config::CliConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::generation::{ChatMessage, Embedder, GenerationRequest, Generator, ModelConfig};
use tessera_core::RetrievalError;
use tracing::debug;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Client for a local Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    embed_timeout: Duration,
    num_predict: u32,
}

impl OllamaClient {
    pub fn new(config: &CliConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            embed_timeout: config.embed_timeout(),
            num_predict: config.num_predict,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait::async_trait(?Send)]
impl Embedder for OllamaClient {
    async fn embed(&self, model: &ModelConfig, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let failed = |e: reqwest::Error| {
            RetrievalError::EmbeddingFailed(format!("{} ({})", e, model.embed_model))
        };
        let response = self
            .http
            .post(self.url("/api/embed"))
            .timeout(self.embed_timeout)
            .json(&EmbedRequest {
                model: &model.embed_model,
                input: text,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;

        let body: EmbedResponse = response.json().await.map_err(failed)?;
        body.embeddings.into_iter().next().ok_or_else(|| {
            RetrievalError::EmbeddingFailed(format!(
                "{} returned no embedding",
                model.embed_model
            ))
        })
    }
}

#[async_trait::async_trait(?Send)]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        model: &ModelConfig,
        request: &GenerationRequest,
    ) -> Result<String, RetrievalError> {
        let failed = |e: reqwest::Error| {
            RetrievalError::GenerationFailed(format!("{} ({})", e, model.chat_model))
        };
        let messages = request.to_messages();
        debug!(
            "Chat request to {} with {} messages",
            model.chat_model,
            messages.len()
        );

        let response = self
            .http
            .post(self.url("/api/chat"))
            .json(&ChatRequest {
                model: &model.chat_model,
                messages,
                stream: false,
                options: ChatOptions {
                    temperature: 0.0,
                    num_predict: self.num_predict,
                },
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;

        let body: ChatResponse = response.json().await.map_err(failed)?;
        Ok(body.message.content)
    }
}
