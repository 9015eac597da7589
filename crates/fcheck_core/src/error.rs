use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes shared by both crates.
pub mod codes {
    /// A collaborator (embedder, classifier, explainer) or setting is missing or invalid.
    pub const CONFIGURATION: &str = "CONFIGURATION_ERROR";
    /// An embedding or stored index does not have the configured dimension.
    pub const DIMENSION_MISMATCH: &str = "DIMENSION_MISMATCH";
    pub const PIPELINE_DUPLICATE_STEP: &str = "PIPELINE_DUPLICATE_STEP";
    pub const PIPELINE_UNKNOWN_STEP: &str = "PIPELINE_UNKNOWN_STEP";
    pub const PIPELINE_TYPE_MISMATCH: &str = "PIPELINE_TYPE_MISMATCH";
    /// Index and metadata artifacts disagree (counts, ids, or content hash).
    pub const INDEX_CORRUPTION: &str = "INDEX_CORRUPTION";
    pub const INDEX_IO_FAILED: &str = "INDEX_IO_FAILED";
    pub const VECTOR_DUPLICATE_ID: &str = "VECTOR_DUPLICATE_ID";
    pub const VECTOR_INPUT_INVALID: &str = "VECTOR_INPUT_INVALID";
    pub const COREF_FAILED: &str = "COREF_FAILED";
    pub const PROMPT_INVALID: &str = "PROMPT_INVALID";
    pub const MODEL_CALL_FAILED: &str = "MODEL_CALL_FAILED";
    pub const MODEL_REMOTE_NOT_ALLOWED: &str = "MODEL_REMOTE_NOT_ALLOWED";
    pub const METRICS_INPUT_INVALID: &str = "METRICS_INPUT_INVALID";
}

/// Single structured error shape used across the pipeline layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Appends context to existing details instead of replacing them.
    pub fn with_context(mut self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        self.details = Some(match self.details.take() {
            Some(d) if !d.is_empty() => format!("{context}; {d}"),
            _ => context.to_string(),
        });
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
