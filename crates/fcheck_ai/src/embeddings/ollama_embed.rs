use std::time::Duration;

use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::OllamaClient;

/// Requests above this many bytes are cut before being sent.
const MAX_PROMPT_BYTES: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let prompt = truncate_at_boundary(input, MAX_PROMPT_BYTES);
        let req = EmbeddingsRequest {
            model: &self.model,
            prompt,
        };
        let resp: EmbeddingsResponse =
            self.client
                .post_json("/api/embeddings", &req, Duration::from_secs(10))?;
        if resp.embedding.is_empty() {
            return Err(AppError::new(
                codes::MODEL_CALL_FAILED,
                "Embeddings response was empty",
            )
            .with_details(format!("model={}", self.model)));
        }
        Ok(resp.embedding)
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
