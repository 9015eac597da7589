use fcheck_core::corpus::CorpusCleaner;
use fcheck_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use super::store::{Metadata, VectorStore, METADATA_ENTITIES_KEY, METADATA_TEXT_KEY};
use crate::ner::NerExtractor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    pub paragraphs: usize,
    pub first_id: i64,
    /// First id not consumed by this call.
    pub next_id: i64,
}

/// Clean a raw corpus into paragraphs and index them under consecutive ids
/// starting at `first_id`.
///
/// Each paragraph's metadata carries `text`, `source`, `paragraph` and, when an
/// extractor is given, `entities` for entity-filtered search.
#[instrument(skip_all, fields(source = source, first_id = first_id))]
pub fn index_corpus(
    store: &mut VectorStore,
    raw: &str,
    source: &str,
    first_id: i64,
    cleaner: &CorpusCleaner,
    ner: Option<&dyn NerExtractor>,
) -> Result<IngestReport, AppError> {
    let paragraphs = cleaner.clean_and_paragraphize(raw);

    let mut ids = Vec::with_capacity(paragraphs.len());
    let mut metadatas = Vec::with_capacity(paragraphs.len());
    for (i, text) in paragraphs.iter().enumerate() {
        let mut md = Metadata::new();
        md.insert(METADATA_TEXT_KEY.into(), Value::String(text.clone()));
        md.insert("source".into(), Value::String(source.to_string()));
        md.insert("paragraph".into(), Value::from(i as u64));
        if let Some(ner) = ner {
            let entities = ner.extract(text)?;
            md.insert(
                METADATA_ENTITIES_KEY.into(),
                Value::Array(entities.into_iter().map(Value::String).collect()),
            );
        }
        ids.push(first_id + i as i64);
        metadatas.push(md);
    }

    store.add_documents(&ids, &paragraphs, metadatas)?;
    info!(paragraphs = paragraphs.len(), "corpus indexed");

    Ok(IngestReport {
        source: source.to_string(),
        paragraphs: paragraphs.len(),
        first_id,
        next_id: first_id + paragraphs.len() as i64,
    })
}
