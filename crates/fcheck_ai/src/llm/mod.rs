use fcheck_core::config::GenerationConfig;
use fcheck_core::error::AppError;

use crate::explain::prompts::Prompt;

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;

pub trait Llm: Send + Sync {
    fn generate(&self, prompt: &Prompt, cfg: &GenerationConfig) -> Result<String, AppError>;
}
