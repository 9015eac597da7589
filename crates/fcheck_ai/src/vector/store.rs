use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::index::{AnnIndex, IndexSpec, IndexStructure, Metric};
use super::similarity::normalize_in_place;
use crate::embeddings::Embedder;

/// Metadata key holding the evidence text of a document.
pub const METADATA_TEXT_KEY: &str = "text";
/// Optional metadata key holding the entity strings of a document.
pub const METADATA_ENTITIES_KEY: &str = "entities";

const FORMAT_VERSION: u32 = 1;
/// Candidate multiplier applied when an entity filter is active.
const NER_OVERFETCH: usize = 4;

pub type Metadata = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    pub score: f32,
    pub metadata: Metadata,
}

impl SearchHit {
    pub fn text(&self) -> Option<&str> {
        self.metadata.get(METADATA_TEXT_KEY).and_then(Value::as_str)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact {
    format_version: u32,
    dim: usize,
    metric: Metric,
    spec: String,
    structure: IndexStructure,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaArtifact {
    format_version: u32,
    index_sha256: String,
    count: usize,
    saved_at: String,
    entries: BTreeMap<i64, Metadata>,
}

/// ANN index plus an id-keyed metadata map, kept in one-to-one correspondence.
///
/// Mutations take `&mut self`; concurrent `search` calls only need `&self`.
pub struct VectorStore {
    dim: usize,
    metric: Metric,
    index: IndexStructure,
    metadata: BTreeMap<i64, Metadata>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dim", &self.dim)
            .field("metric", &self.metric)
            .field("spec", &self.index.spec().to_string())
            .field("len", &self.metadata.len())
            .field("has_embedder", &self.embedder.is_some())
            .finish()
    }
}

impl VectorStore {
    pub fn new(dim: usize, spec: IndexSpec, metric: Metric) -> Result<Self, AppError> {
        if dim == 0 {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "Vector dimension must be at least 1",
            ));
        }
        Ok(Self {
            dim,
            metric,
            index: spec.build(dim, metric),
            metadata: BTreeMap::new(),
            embedder: None,
        })
    }

    /// Build from a factory string such as `"IVF100,Flat"`.
    pub fn with_factory(dim: usize, factory: &str, metric: Metric) -> Result<Self, AppError> {
        Self::new(dim, factory.parse()?, metric)
    }

    pub fn with_embedder<E: Embedder + 'static>(mut self, embedder: E) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    pub fn set_embedder(&mut self, embedder: Arc<dyn Embedder>) {
        self.embedder = Some(embedder);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn spec(&self) -> IndexSpec {
        self.index.spec()
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.metadata.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.metadata.keys().copied().collect()
    }

    pub fn metadata(&self, id: i64) -> Option<&Metadata> {
        self.metadata.get(&id)
    }

    fn embedder(&self) -> Result<&dyn Embedder, AppError> {
        self.embedder.as_deref().ok_or_else(|| {
            AppError::new(
                codes::CONFIGURATION,
                "Vector store has no embedder configured",
            )
        })
    }

    fn embed(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, AppError> {
        let mut v = embedder.embed(text)?;
        if v.len() != self.dim {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Embedding dimension does not match the store",
            )
            .with_details(format!("expected={}; got={}", self.dim, v.len())));
        }
        if self.metric.normalizes() && !normalize_in_place(&mut v) {
            return Err(AppError::new(
                codes::VECTOR_INPUT_INVALID,
                "Embedding has zero norm and cannot be normalised",
            ));
        }
        Ok(v)
    }

    pub fn add_document(&mut self, id: i64, text: &str, metadata: Metadata) -> Result<(), AppError> {
        self.add_documents(&[id], &[text], vec![metadata])
    }

    /// Embed and insert a batch. Every check runs before the index or the
    /// metadata map is touched, so a failed call changes nothing.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub fn add_documents<S: AsRef<str>>(
        &mut self,
        ids: &[i64],
        texts: &[S],
        metadatas: Vec<Metadata>,
    ) -> Result<(), AppError> {
        if ids.len() != texts.len() || ids.len() != metadatas.len() {
            return Err(AppError::new(
                codes::VECTOR_INPUT_INVALID,
                "ids, texts, and metadata must have the same length",
            )
            .with_details(format!(
                "ids={}; texts={}; metadata={}",
                ids.len(),
                texts.len(),
                metadatas.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }
        let embedder = self.embedder()?;

        let mut vectors = Vec::with_capacity(ids.len());
        for (id, text) in ids.iter().zip(texts) {
            let v = self
                .embed(embedder, text.as_ref())
                .map_err(|e| e.with_context(format!("id={id}")))?;
            vectors.push(v);
        }

        if self.index.is_trained() {
            self.index.add_with_ids(ids, &vectors)?;
        } else {
            // An untrained index is empty; train a copy and keep it only if the insert succeeds.
            debug!(samples = vectors.len(), "training index on first insertion");
            let mut staged = self.index.clone();
            staged.train(&vectors)?;
            staged.add_with_ids(ids, &vectors)?;
            self.index = staged;
        }

        for ((id, text), mut md) in ids.iter().zip(texts).zip(metadatas) {
            md.entry(METADATA_TEXT_KEY)
                .or_insert_with(|| Value::String(text.as_ref().to_string()));
            self.metadata.insert(*id, md);
        }
        Ok(())
    }

    /// Nearest documents first. Hits failing the threshold are dropped, never
    /// returned as low-score matches.
    ///
    /// `ner_filter` keeps hits whose `entities` metadata shares an entity with
    /// the filter; hits stored without entities always pass.
    #[instrument(skip_all, fields(k = k, threshold = threshold))]
    pub fn search(
        &self,
        text: &str,
        k: usize,
        threshold: f32,
        ner_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let embedder = self.embedder()?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embed(embedder, text)?;

        let filter = ner_filter.filter(|f| !f.is_empty());
        let fetch = if filter.is_some() {
            k.saturating_mul(NER_OVERFETCH)
        } else {
            k
        };

        let mut hits = Vec::new();
        for n in self.index.search(&query, fetch) {
            if n.is_empty_slot() || !self.metric.passes(n.score, threshold) {
                continue;
            }
            let Some(md) = self.metadata.get(&n.id) else {
                warn!(id = n.id, "indexed id has no metadata");
                continue;
            };
            if let Some(filter) = filter {
                if !shares_entity(md, filter) {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: n.id,
                score: n.score,
                metadata: md.clone(),
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn delete_document(&mut self, id: i64) -> usize {
        self.delete_documents(&[id])
    }

    /// Returns the number of documents removed. Unknown ids are ignored.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub fn delete_documents(&mut self, ids: &[i64]) -> usize {
        let removed = self.index.remove_ids(ids);
        for id in ids {
            self.metadata.remove(id);
        }
        removed
    }

    /// Writes `<path>.index.json` and `<path>.meta.json`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let (index_path, meta_path) = artifact_paths(path);
        if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::new(codes::INDEX_IO_FAILED, "Failed to create index directory")
                    .with_details(format!("path={}; err={}", parent.display(), e))
            })?;
        }

        let artifact = IndexArtifact {
            format_version: FORMAT_VERSION,
            dim: self.dim,
            metric: self.metric,
            spec: self.index.spec().to_string(),
            structure: self.index.clone(),
        };
        let index_json = encode(&artifact, "index")?;

        let saved_at = OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
            AppError::new(codes::INDEX_IO_FAILED, "Failed to format save timestamp")
                .with_details(e.to_string())
        })?;
        let meta = MetaArtifact {
            format_version: FORMAT_VERSION,
            index_sha256: sha256_hex(index_json.as_bytes()),
            count: self.metadata.len(),
            saved_at,
            entries: self.metadata.clone(),
        };
        let meta_json = encode(&meta, "metadata")?;

        write_atomic(&index_path, &index_json)?;
        write_atomic(&meta_path, &meta_json)?;
        debug!(count = meta.count, "vector store saved");
        Ok(())
    }

    /// Replaces the in-memory index and metadata with the saved pair.
    /// Both artifacts are read and cross-checked before anything is swapped in.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(&mut self, path: &Path) -> Result<(), AppError> {
        let (index_path, meta_path) = artifact_paths(path);
        let index_bytes = read_artifact(&index_path)?;
        let meta_bytes = read_artifact(&meta_path)?;

        let meta: MetaArtifact = decode(&meta_bytes, &meta_path)?;
        let digest = sha256_hex(&index_bytes);
        if digest != meta.index_sha256 {
            return Err(corruption("Index artifact does not match its metadata").with_details(
                format!("expected_sha256={}; actual_sha256={digest}", meta.index_sha256),
            ));
        }

        let artifact: IndexArtifact = decode(&index_bytes, &index_path)?;
        if artifact.format_version != FORMAT_VERSION || meta.format_version != FORMAT_VERSION {
            return Err(corruption("Unsupported index format version").with_details(format!(
                "index={}; meta={}; supported={FORMAT_VERSION}",
                artifact.format_version, meta.format_version
            )));
        }
        if artifact.dim != self.dim {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Saved index dimension does not match the store",
            )
            .with_details(format!("expected={}; saved={}", self.dim, artifact.dim)));
        }

        let structure = artifact.structure;
        structure.check_integrity()?;
        let spec: IndexSpec = artifact.spec.parse()?;
        if structure.dim() != artifact.dim
            || structure.metric() != artifact.metric
            || structure.spec() != spec
        {
            return Err(corruption("Index header disagrees with index structure"));
        }
        if meta.count != structure.len() || meta.entries.len() != structure.len() {
            return Err(corruption("Index and metadata counts differ").with_details(format!(
                "index={}; metadata={}; recorded={}",
                structure.len(),
                meta.entries.len(),
                meta.count
            )));
        }
        if !structure.ids().into_iter().eq(meta.entries.keys().copied()) {
            return Err(corruption("Index and metadata hold different ids"));
        }

        self.metric = artifact.metric;
        self.index = structure;
        self.metadata = meta.entries;
        debug!(count = self.metadata.len(), saved_at = %meta.saved_at, "vector store loaded");
        Ok(())
    }
}

fn shares_entity(metadata: &Metadata, filter: &[String]) -> bool {
    let Some(Value::Array(entities)) = metadata.get(METADATA_ENTITIES_KEY) else {
        return true;
    };
    entities
        .iter()
        .filter_map(Value::as_str)
        .any(|e| filter.iter().any(|f| f.to_lowercase() == e.to_lowercase()))
}

fn artifact_paths(path: &Path) -> (PathBuf, PathBuf) {
    let with_suffix = |suffix: &str| {
        let mut s: OsString = path.as_os_str().to_owned();
        s.push(suffix);
        PathBuf::from(s)
    };
    (with_suffix(".index.json"), with_suffix(".meta.json"))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn corruption(message: &str) -> AppError {
    AppError::new(codes::INDEX_CORRUPTION, message)
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| {
        AppError::new(codes::INDEX_IO_FAILED, format!("Failed to encode {what} artifact"))
            .with_details(e.to_string())
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<T, AppError> {
    serde_json::from_slice(bytes).map_err(|e| {
        corruption("Failed to decode index artifact")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, AppError> {
    fs::read(path).map_err(|e| {
        AppError::new(codes::INDEX_IO_FAILED, "Failed to read index artifact")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), AppError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents.as_bytes()).map_err(|e| {
        AppError::new(codes::INDEX_IO_FAILED, "Failed to write index artifact")
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new(codes::INDEX_IO_FAILED, "Failed to finalize index artifact write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })
}
