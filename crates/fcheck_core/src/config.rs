use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Device;
use crate::error::{codes, AppError};

pub const DEFAULT_CONTEXT_TOKEN: &str = "</CONTEXT>";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

/// Decoding parameters handed to the explanation generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            do_sample: false,
            temperature: 0.1,
        }
    }
}

/// Shared configuration for one fact-checking deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactCheckConfig {
    /// Placement of the classifier / explanation models.
    pub device: Device,
    /// Placement of the processing pipelines (coreference).
    pub processing_device: Device,
    pub storage_search_k: usize,
    pub storage_search_threshold: f32,
    pub automatic_contextualization: bool,
    pub context_token: String,
    pub enable_ner: bool,
    pub get_explanation: bool,
    /// Evidence blocks shorter than this (in chars, after trimming) are treated as absent.
    pub min_evidence_chars: usize,
    pub storage_path: Option<PathBuf>,
    pub ner_corpus: Option<PathBuf>,
    pub embedding_model: Option<String>,
    pub model_name: Option<String>,
    pub ollama_base_url: String,
    pub generation: GenerationConfig,
}

impl Default for FactCheckConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            processing_device: Device::Cpu,
            storage_search_k: 5,
            storage_search_threshold: 1.0,
            automatic_contextualization: false,
            context_token: DEFAULT_CONTEXT_TOKEN.to_string(),
            enable_ner: false,
            get_explanation: false,
            min_evidence_chars: 1,
            storage_path: None,
            ner_corpus: None,
            embedding_model: None,
            model_name: None,
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            generation: GenerationConfig::default(),
        }
    }
}

impl FactCheckConfig {
    /// Load from the process environment, reading a `.env` file first when present.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEVICE") {
            cfg.device = parse_var("DEVICE", &v)?;
        }
        cfg.processing_device = match get("PROCESSING_DEVICE") {
            Some(v) => parse_var("PROCESSING_DEVICE", &v)?,
            None => cfg.device,
        };
        if let Some(v) = get("STORAGE_SEARCH_K") {
            cfg.storage_search_k = parse_var("STORAGE_SEARCH_K", &v)?;
        }
        if let Some(v) = get("STORAGE_SEARCH_THRESHOLD") {
            cfg.storage_search_threshold = parse_var("STORAGE_SEARCH_THRESHOLD", &v)?;
        }
        if let Some(v) = get("AUTOMATIC_CONTEXTUALIZATION") {
            cfg.automatic_contextualization = parse_bool("AUTOMATIC_CONTEXTUALIZATION", &v)?;
        }
        if let Some(v) = get("CONTEXT_TOKEN") {
            cfg.context_token = v;
        }
        if let Some(v) = get("ENABLE_NER") {
            cfg.enable_ner = parse_bool("ENABLE_NER", &v)?;
        }
        if let Some(v) = get("ENABLE_LLM") {
            cfg.get_explanation = parse_bool("ENABLE_LLM", &v)?;
        }
        if let Some(v) = get("MIN_EVIDENCE_CHARS") {
            cfg.min_evidence_chars = parse_var("MIN_EVIDENCE_CHARS", &v)?;
        }
        cfg.storage_path = get("STORAGE_PATH").map(PathBuf::from);
        cfg.ner_corpus = get("NER_CORPUS").map(PathBuf::from);
        cfg.embedding_model = get("EMBEDDING_MODEL");
        cfg.model_name = get("MODEL_NAME");
        if let Some(v) = get("OLLAMA_BASE_URL") {
            cfg.ollama_base_url = v;
        }
        if let Some(v) = get("MAX_NEW_TOKENS") {
            cfg.generation.max_new_tokens = parse_var("MAX_NEW_TOKENS", &v)?;
        }
        if let Some(v) = get("TEMPERATURE") {
            cfg.generation.temperature = parse_var("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("DO_SAMPLE") {
            cfg.generation.do_sample = parse_bool("DO_SAMPLE", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.storage_search_k == 0 {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "STORAGE_SEARCH_K must be at least 1",
            ));
        }
        if !self.storage_search_threshold.is_finite() {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "STORAGE_SEARCH_THRESHOLD must be finite",
            ));
        }
        if self.context_token.trim().is_empty() {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "CONTEXT_TOKEN must not be blank",
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        AppError::new(codes::CONFIGURATION, format!("{key} has an invalid value"))
            .with_details(format!("value={raw}; err={e}"))
    })
}

/// Accepts the same spellings as Python's `strtobool`.
fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(
            AppError::new(codes::CONFIGURATION, format!("{key} must be a boolean"))
                .with_details(format!("value={raw}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = FactCheckConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, FactCheckConfig::default());
    }

    #[test]
    fn reads_original_variable_names() {
        let cfg = FactCheckConfig::from_lookup(lookup(&[
            ("DEVICE", "cuda"),
            ("STORAGE_SEARCH_K", "3"),
            ("STORAGE_SEARCH_THRESHOLD", "0.75"),
            ("AUTOMATIC_CONTEXTUALIZATION", "True"),
            ("ENABLE_NER", "1"),
            ("ENABLE_LLM", "off"),
            ("STORAGE_PATH", "/tmp/store"),
        ]))
        .unwrap();
        assert_eq!(cfg.device, Device::Cuda);
        // Falls back to the model device when not set separately.
        assert_eq!(cfg.processing_device, Device::Cuda);
        assert_eq!(cfg.storage_search_k, 3);
        assert_eq!(cfg.storage_search_threshold, 0.75);
        assert!(cfg.automatic_contextualization);
        assert!(cfg.enable_ner);
        assert!(!cfg.get_explanation);
        assert_eq!(cfg.storage_path, Some(PathBuf::from("/tmp/store")));
    }

    #[test]
    fn rejects_malformed_values() {
        let err = FactCheckConfig::from_lookup(lookup(&[("STORAGE_SEARCH_K", "many")])).unwrap_err();
        assert_eq!(err.code, codes::CONFIGURATION);
        assert!(err.message.contains("STORAGE_SEARCH_K"));

        let err = FactCheckConfig::from_lookup(lookup(&[("ENABLE_NER", "maybe")])).unwrap_err();
        assert_eq!(err.code, codes::CONFIGURATION);

        let err = FactCheckConfig::from_lookup(lookup(&[("STORAGE_SEARCH_K", "0")])).unwrap_err();
        assert_eq!(err.code, codes::CONFIGURATION);
    }
}
