use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fcheck_ai::classify::LlmEntailmentClassifier;
use fcheck_ai::embeddings::{CachedEmbedder, Embedder, OllamaEmbedder};
use fcheck_ai::explain::LlmExplainer;
use fcheck_ai::factcheck::FactChecker;
use fcheck_ai::llm::OllamaLlm;
use fcheck_ai::ner::{GazetteerNer, NerExtractor};
use fcheck_ai::ollama::OllamaClient;
use fcheck_ai::vector::{index_corpus, IndexSpec, IngestReport, Metric, VectorStore};
use fcheck_core::config::FactCheckConfig;
use fcheck_core::corpus::CorpusCleaner;
use fcheck_core::domain::SuggestionResponse;
use fcheck_core::error::{codes, AppError};
use fcheck_core::metrics::{
    paragraph_classification_report, parse_suggestions_column, sentence_classification_report,
    suggestion_level_metrics, ClassificationReport, SuggestionMetrics,
};
use fcheck_core::segment::SentenceSplitter;
use serde::{Deserialize, Serialize};
use tracing::info;

const DIMENSION_PROBE: &str = "dimension probe";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EvaluationSummary {
    pub paragraphs: usize,
    pub paragraph_report: ClassificationReport,
    pub sentence_report: ClassificationReport,
    pub suggestions: SuggestionMetrics,
}

/// One labelled paragraph. `suggestions` is either a list or a JSON array
/// serialised into a string, as exported with labelled datasets.
#[derive(Debug, Deserialize)]
pub struct LabelledParagraph {
    pub text: String,
    pub suggestions: SuggestionsField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SuggestionsField {
    List(Vec<String>),
    Column(String),
}

impl SuggestionsField {
    fn into_vec(self) -> Result<Vec<String>, AppError> {
        match self {
            SuggestionsField::List(v) => Ok(v),
            SuggestionsField::Column(raw) => parse_suggestions_column(&raw),
        }
    }
}

/// Index settings used when a store is created rather than loaded.
#[derive(Debug, Clone, Copy)]
pub struct StoreLayout {
    pub spec: IndexSpec,
    pub metric: Metric,
}

/// Shared handles for every command: configuration plus the local model client.
pub struct Runtime {
    config: FactCheckConfig,
    client: OllamaClient,
}

impl Runtime {
    pub fn new(config: FactCheckConfig) -> Result<Self, AppError> {
        let client = OllamaClient::new(&config.ollama_base_url)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FactCheckConfig {
        &self.config
    }

    fn storage_path(&self) -> Result<&Path, AppError> {
        self.config.storage_path.as_deref().ok_or_else(|| {
            AppError::new(codes::CONFIGURATION, "STORAGE_PATH is not set")
                .with_details("pass --store or set STORAGE_PATH")
        })
    }

    fn model_name(&self) -> Result<&str, AppError> {
        self.config
            .model_name
            .as_deref()
            .ok_or_else(|| AppError::new(codes::CONFIGURATION, "MODEL_NAME is not set"))
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, AppError> {
        let model = self
            .config
            .embedding_model
            .as_deref()
            .ok_or_else(|| AppError::new(codes::CONFIGURATION, "EMBEDDING_MODEL is not set"))?;
        Ok(Arc::new(CachedEmbedder::new(OllamaEmbedder::new(
            self.client.clone(),
            model,
        ))))
    }

    fn gazetteer(&self) -> Result<Option<GazetteerNer>, AppError> {
        if !self.config.enable_ner {
            return Ok(None);
        }
        match self.config.ner_corpus.as_deref() {
            Some(path) => Ok(Some(GazetteerNer::from_file(path)?)),
            None => Err(AppError::new(
                codes::CONFIGURATION,
                "ENABLE_NER is set but NER_CORPUS is not",
            )),
        }
    }

    /// Opens the store at `STORAGE_PATH`. A missing store is created empty only
    /// when `create` is set.
    fn open_store(&self, layout: StoreLayout, create: bool) -> Result<VectorStore, AppError> {
        let path = self.storage_path()?;
        let embedder = self.embedder()?;
        let dim = embedder.embed(DIMENSION_PROBE)?.len();

        let mut store = VectorStore::new(dim, layout.spec, layout.metric)?;
        store.set_embedder(embedder);
        if artifacts_exist(path) {
            store.load(path)?;
        } else if !create {
            return Err(AppError::new(codes::INDEX_IO_FAILED, "No evidence store at STORAGE_PATH")
                .with_details(format!("path={}", path.display())));
        }
        Ok(store)
    }

    fn checker(&self, layout: StoreLayout) -> Result<FactChecker, AppError> {
        let store = self.open_store(layout, false)?;
        let model = self.model_name()?;

        let mut builder = FactChecker::builder(self.config.clone())
            .store(store)
            .classifier(LlmEntailmentClassifier::new(OllamaLlm::new(
                self.client.clone(),
                model,
            )));
        if self.config.get_explanation {
            builder = builder.explainer(LlmExplainer::new(OllamaLlm::new(self.client.clone(), model)));
        }
        if let Some(ner) = self.gazetteer()? {
            builder = builder.ner(ner);
        }
        builder.build()
    }
}

fn artifacts_exist(path: &Path) -> bool {
    let mut index = path.as_os_str().to_owned();
    index.push(".index.json");
    PathBuf::from(index).is_file()
}

pub fn health(runtime: &Runtime) -> Result<HealthStatus, AppError> {
    runtime.client.health_check()?;
    Ok(HealthStatus {
        ok: true,
        message: format!("Ollama reachable at {}", runtime.client.base_url()),
    })
}

pub fn ingest(
    runtime: &Runtime,
    layout: StoreLayout,
    corpus: &Path,
    source: Option<&str>,
    first_id: Option<i64>,
) -> Result<IngestReport, AppError> {
    let raw = fs::read_to_string(corpus).map_err(|e| {
        AppError::new(codes::CONFIGURATION, "Failed to read corpus file")
            .with_details(format!("path={}; err={}", corpus.display(), e))
    })?;
    let source = source
        .map(str::to_string)
        .unwrap_or_else(|| corpus.display().to_string());

    let mut store = runtime.open_store(layout, true)?;
    let first_id = first_id.unwrap_or_else(|| store.ids().into_iter().max().map_or(0, |id| id + 1));
    let ner = runtime.gazetteer()?;

    let report = index_corpus(
        &mut store,
        &raw,
        &source,
        first_id,
        &CorpusCleaner::default(),
        ner.as_ref().map(|n| n as &dyn NerExtractor),
    )?;
    store.save(runtime.storage_path()?)?;
    info!(documents = store.len(), "evidence store saved");
    Ok(report)
}

pub fn check(
    runtime: &Runtime,
    layout: StoreLayout,
    text: &str,
    single_sentence: bool,
) -> Result<Vec<SuggestionResponse>, AppError> {
    let checker = runtime.checker(layout)?;
    if single_sentence {
        checker.evaluate_sentence(text, "")
    } else {
        checker.evaluate_text(text, "")
    }
}

pub fn evaluate(runtime: &Runtime, layout: StoreLayout, dataset: &Path) -> Result<EvaluationSummary, AppError> {
    let raw = fs::read_to_string(dataset).map_err(|e| {
        AppError::new(codes::METRICS_INPUT_INVALID, "Failed to read dataset")
            .with_details(format!("path={}; err={}", dataset.display(), e))
    })?;
    let records: Vec<LabelledParagraph> = serde_json::from_str(&raw).map_err(|e| {
        AppError::new(codes::METRICS_INPUT_INVALID, "Dataset is not a JSON array of labelled paragraphs")
            .with_details(e.to_string())
    })?;

    let checker = runtime.checker(layout)?;
    let mut texts = Vec::with_capacity(records.len());
    let mut truth = Vec::with_capacity(records.len());
    let mut predicted = Vec::with_capacity(records.len());
    for (i, record) in records.into_iter().enumerate() {
        let found = checker
            .evaluate_text(&record.text, "")
            .map_err(|e| e.with_context(format!("paragraph={i}")))?;
        predicted.push(found.into_iter().map(|s| s.fact).collect::<Vec<_>>());
        truth.push(record.suggestions.into_vec()?);
        texts.push(record.text);
    }

    let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    Ok(EvaluationSummary {
        paragraphs: texts.len(),
        paragraph_report: paragraph_classification_report(&truth, &predicted)?,
        sentence_report: sentence_classification_report(
            &SentenceSplitter::new(),
            &text_refs,
            &truth,
            &predicted,
        )?,
        suggestions: suggestion_level_metrics(&truth, &predicted)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn suggestions_accept_lists_and_serialised_columns() {
        let records: Vec<LabelledParagraph> = serde_json::from_str(
            r#"[
                {"text": "a", "suggestions": ["x", "y"]},
                {"text": "b", "suggestions": "[\"z\"]"}
            ]"#,
        )
        .unwrap();
        let mut it = records.into_iter();
        assert_eq!(it.next().unwrap().suggestions.into_vec().unwrap(), vec!["x", "y"]);
        assert_eq!(it.next().unwrap().suggestions.into_vec().unwrap(), vec!["z"]);
    }

    #[test]
    fn commands_need_a_storage_path() {
        let runtime = Runtime::new(FactCheckConfig::default()).unwrap();
        let layout = StoreLayout {
            spec: IndexSpec::Flat,
            metric: Metric::L2,
        };
        let err = check(&runtime, layout, "Napoleon died in 1820.", false).unwrap_err();
        assert_eq!(err.code, codes::CONFIGURATION);
        assert_eq!(err.message, "STORAGE_PATH is not set");
    }

    #[test]
    fn artifacts_are_detected_by_their_index_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!artifacts_exist(&dir.path().join("evidence")));
        fs::write(dir.path().join("evidence.index.json"), "{}").unwrap();
        assert!(artifacts_exist(&dir.path().join("evidence")));
    }
}
