//! Named-entity extraction used to narrow evidence retrieval.

use std::fs;
use std::path::Path;

use fcheck_core::error::{codes, AppError};
use fcheck_core::normalize::normalize_for_retrieval;
use regex::Regex;

pub trait NerExtractor: Send + Sync {
    /// Entity surface strings found in `text`, in order of first appearance.
    fn extract(&self, text: &str) -> Result<Vec<String>, AppError>;
}

/// Dictionary-driven extractor over a fixed entity vocabulary.
///
/// Entries are matched on word boundaries against normalised text, longest
/// entry first, so "napoleon bonaparte" wins over "napoleon".
#[derive(Debug, Clone)]
pub struct GazetteerNer {
    pattern: Option<Regex>,
    size: usize,
}

impl GazetteerNer {
    pub fn new<I, S>(entities: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab: Vec<String> = entities
            .into_iter()
            .map(|e| normalize_for_retrieval(e.as_ref()).trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        vocab.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        vocab.dedup();

        if vocab.is_empty() {
            return Ok(Self { pattern: None, size: 0 });
        }

        let alternation = vocab
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"\b(?:{alternation})\b")).map_err(|e| {
            AppError::new(codes::CONFIGURATION, "Failed to compile entity vocabulary")
                .with_details(e.to_string())
        })?;
        Ok(Self {
            pattern: Some(pattern),
            size: vocab.len(),
        })
    }

    /// One entity per line; blank lines and `#` comments are ignored.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::CONFIGURATION, "Failed to read NER corpus")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl NerExtractor for GazetteerNer {
    fn extract(&self, text: &str) -> Result<Vec<String>, AppError> {
        let Some(pattern) = &self.pattern else {
            return Ok(Vec::new());
        };
        let normalized = normalize_for_retrieval(text);
        let mut out: Vec<String> = Vec::new();
        for m in pattern.find_iter(&normalized) {
            let entity = m.as_str();
            if !out.iter().any(|e| e == entity) {
                out.push(entity.to_string());
            }
        }
        Ok(out)
    }
}
