use fcheck_core::error::AppError;

mod cached;
pub mod ollama_embed;

pub use cached::CachedEmbedder;
pub use ollama_embed::OllamaEmbedder;

/// Text to fixed-dimension vector. Must be deterministic for identical input.
pub trait Embedder: Send + Sync {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        (**self).embed(input)
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        (**self).embed(input)
    }
}
