use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use fcheck_core::error::{codes, AppError};

use super::Embedder;

#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

/// Memoises another embedder. With a capacity, the oldest entry is evicted first.
pub struct CachedEmbedder<E> {
    inner: E,
    capacity: Option<usize>,
    cache: Mutex<Cache>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            capacity: None,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn with_capacity(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            capacity: Some(capacity.max(1)),
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> AppError {
        AppError::new(codes::MODEL_CALL_FAILED, "Embedding cache lock poisoned")
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        {
            let cache = self.cache.lock().map_err(|_| Self::poisoned())?;
            if let Some(v) = cache.entries.get(input) {
                return Ok(v.clone());
            }
        }

        // The lock is not held across the model call.
        let vector = self.inner.embed(input)?;

        let mut cache = self.cache.lock().map_err(|_| Self::poisoned())?;
        if !cache.entries.contains_key(input) {
            if let Some(cap) = self.capacity {
                while cache.entries.len() >= cap {
                    match cache.order.pop_front() {
                        Some(oldest) => {
                            cache.entries.remove(&oldest);
                        }
                        None => break,
                    }
                }
            }
            cache.order.push_back(input.to_string());
            cache.entries.insert(input.to_string(), vector.clone());
        }
        Ok(vector)
    }
}
