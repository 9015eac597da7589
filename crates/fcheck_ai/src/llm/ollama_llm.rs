use std::time::Duration;

use fcheck_core::config::GenerationConfig;
use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::explain::prompts::{ChatMessage, Prompt};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
}

impl OllamaLlm {
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
struct Options {
    num_predict: u32,
    temperature: f32,
}

impl From<&GenerationConfig> for Options {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            num_predict: cfg.max_new_tokens,
            // Greedy decoding is temperature zero on Ollama.
            temperature: if cfg.do_sample { cfg.temperature } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: Options,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

impl Llm for OllamaLlm {
    fn generate(&self, prompt: &Prompt, cfg: &GenerationConfig) -> Result<String, AppError> {
        let timeout = Duration::from_secs(30);
        let text = match prompt {
            Prompt::Text(p) => {
                let req = GenerateRequest {
                    model: &self.model,
                    prompt: p,
                    stream: false,
                    options: cfg.into(),
                };
                let resp: GenerateResponse = self.client.post_json("/api/generate", &req, timeout)?;
                resp.response
            }
            Prompt::Chat(messages) => {
                let req = ChatRequest {
                    model: &self.model,
                    messages,
                    stream: false,
                    options: cfg.into(),
                };
                let resp: ChatResponse = self.client.post_json("/api/chat", &req, timeout)?;
                resp.message.content
            }
        };

        if text.trim().is_empty() {
            return Err(
                AppError::new(codes::MODEL_CALL_FAILED, "Generation response was empty")
                    .with_details(format!("model={}", self.model)),
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_config_maps_to_zero_temperature() {
        let opts = Options::from(&GenerationConfig::default());
        assert_eq!(opts.num_predict, 256);
        assert_eq!(opts.temperature, 0.0);

        let sampled = GenerationConfig {
            do_sample: true,
            ..GenerationConfig::default()
        };
        assert_eq!(Options::from(&sampled).temperature, 0.1);
    }
}
