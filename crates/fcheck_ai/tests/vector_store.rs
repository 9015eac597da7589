use std::fs;

use fcheck_ai::embeddings::Embedder;
use fcheck_ai::vector::{IndexSpec, Metadata, Metric, VectorStore};
use fcheck_core::error::{codes, AppError};
use pretty_assertions::assert_eq;

const VOCAB: &[&str] = &[
    "napoleon", "died", "in", "1821", "1820", "was", "exiled", "to", "elba", "bananas", "grow", "on",
    "trees", "rome", "is", "old",
];

fn word_counts(input: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; VOCAB.len()];
    for word in input.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if let Some(i) = VOCAB.iter().position(|w| *w == word) {
            v[i] += 1.0;
        }
    }
    v
}

/// One-hot bag of words over a fixed vocabulary, unit length. Unknown words are ignored.
struct VocabEmbedder;

impl Embedder for VocabEmbedder {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut v = word_counts(input);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}

/// Raw word counts; the store has to normalise them itself.
struct CountEmbedder;

impl Embedder for CountEmbedder {
    fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        Ok(word_counts(input))
    }
}

const DOCS: &[(i64, &str)] = &[
    (1, "Napoleon died in 1821."),
    (2, "Napoleon was exiled to Elba."),
    (3, "Bananas grow on trees."),
    (4, "Rome is old."),
];

fn fill(mut store: VectorStore) -> VectorStore {
    let ids: Vec<i64> = DOCS.iter().map(|(id, _)| *id).collect();
    let texts: Vec<&str> = DOCS.iter().map(|(_, t)| *t).collect();
    let metadatas = vec![Metadata::new(); DOCS.len()];
    store.add_documents(&ids, &texts, metadatas).expect("add");
    store
}

fn store(spec: IndexSpec) -> VectorStore {
    fill(
        VectorStore::new(VOCAB.len(), spec, Metric::L2)
            .expect("store")
            .with_embedder(VocabEmbedder),
    )
}

fn similarity_store(spec: IndexSpec, metric: Metric) -> VectorStore {
    fill(
        VectorStore::new(VOCAB.len(), spec, metric)
            .expect("store")
            .with_embedder(CountEmbedder),
    )
}

const SIMILARITY_METRICS: [Metric; 2] = [Metric::InnerProduct, Metric::Cosine];

#[test]
fn every_document_is_its_own_nearest_neighbor() {
    for spec in [IndexSpec::Flat, IndexSpec::IvfFlat { nlist: 2 }] {
        let store = store(spec);
        for (id, text) in DOCS {
            let hits = store.search(text, 1, 1.0, None).expect("search");
            assert_eq!(hits.len(), 1, "spec={spec}");
            assert_eq!(hits[0].id, *id, "spec={spec}");
            assert!(hits[0].score.abs() < 1e-5);
            assert_eq!(hits[0].text(), Some(*text));
        }
    }
}

#[test]
fn results_beyond_threshold_are_dropped_not_returned_as_weak_matches() {
    let store = store(IndexSpec::Flat);
    // Only "rome" is in the vocabulary: squared distance 0.85 to doc 4, 2.0 to the rest.
    let hits = store.search("rome grows nothing", 3, 1.0, None).expect("search");
    assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![4]);

    let none = store.search("trees", 3, 0.1, None).expect("search");
    assert!(none.is_empty());
}

#[test]
fn deleted_documents_disappear_and_unknown_ids_are_ignored() {
    let mut store = store(IndexSpec::Flat);
    assert_eq!(store.delete_documents(&[1, 999]), 1);
    assert_eq!(store.delete_document(1), 0);
    assert!(store.metadata(1).is_none());
    assert_eq!(store.len(), 3);

    let hits = store.search("Napoleon died in 1821.", 4, 10.0, None).expect("search");
    assert!(hits.iter().all(|h| h.id != 1));
}

#[test]
fn failed_batch_leaves_store_untouched() {
    let mut store = store(IndexSpec::Flat);
    let err = store
        .add_documents(&[10, 1], &["Rome is old.", "dup"], vec![Metadata::new(); 2])
        .unwrap_err();
    assert_eq!(err.code, codes::VECTOR_DUPLICATE_ID);
    assert_eq!(store.len(), DOCS.len());
    assert!(!store.contains(10));

    let err = store
        .add_documents(&[11], &["a", "b"], vec![Metadata::new()])
        .unwrap_err();
    assert_eq!(err.code, codes::VECTOR_INPUT_INVALID);
}

#[test]
fn save_then_load_reproduces_search_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("evidence");

    for spec in [IndexSpec::Flat, IndexSpec::IvfFlat { nlist: 2 }] {
        let original = store(spec);
        original.save(&path).expect("save");

        let mut restored = VectorStore::new(VOCAB.len(), spec, Metric::L2)
            .expect("store")
            .with_embedder(VocabEmbedder);
        restored.load(&path).expect("load");

        assert_eq!(restored.ids(), original.ids());
        for query in ["napoleon died in 1820", "exiled to elba", "old rome"] {
            assert_eq!(
                restored.search(query, 3, 2.0, None).expect("search"),
                original.search(query, 3, 2.0, None).expect("search"),
            );
        }
    }
}

#[test]
fn tampered_artifacts_are_reported_as_corruption() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("evidence");
    let index_path = dir.path().join("evidence.index.json");
    let meta_path = dir.path().join("evidence.meta.json");
    store(IndexSpec::Flat).save(&path).expect("save");

    let fresh = || {
        VectorStore::new(VOCAB.len(), IndexSpec::Flat, Metric::L2)
            .expect("store")
            .with_embedder(VocabEmbedder)
    };

    // Recorded count no longer agrees with the index.
    let pristine_meta = fs::read_to_string(&meta_path).expect("read meta");
    let mut meta: serde_json::Value = serde_json::from_str(&pristine_meta).expect("meta json");
    meta["count"] = serde_json::json!(99);
    fs::write(&meta_path, serde_json::to_string(&meta).expect("encode")).expect("write meta");
    let err = fresh().load(&path).unwrap_err();
    assert_eq!(err.code, codes::INDEX_CORRUPTION);
    fs::write(&meta_path, &pristine_meta).expect("restore meta");

    // Index bytes no longer match the recorded digest.
    let mut index = fs::read_to_string(&index_path).expect("read index");
    index.push(' ');
    fs::write(&index_path, index).expect("write index");
    let mut target = fresh();
    let err = target.load(&path).unwrap_err();
    assert_eq!(err.code, codes::INDEX_CORRUPTION);
    assert!(target.is_empty());
}

#[test]
fn missing_artifacts_and_wrong_dimension_fail_to_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("evidence");

    let mut empty = VectorStore::new(VOCAB.len(), IndexSpec::Flat, Metric::L2).expect("store");
    let err = empty.load(&path).unwrap_err();
    assert_eq!(err.code, codes::INDEX_IO_FAILED);

    store(IndexSpec::Flat).save(&path).expect("save");
    let mut narrow = VectorStore::new(VOCAB.len() - 1, IndexSpec::Flat, Metric::L2).expect("store");
    let err = narrow.load(&path).unwrap_err();
    assert_eq!(err.code, codes::DIMENSION_MISMATCH);
}

#[test]
fn similarity_metrics_normalise_raw_embeddings() {
    for metric in SIMILARITY_METRICS {
        for spec in [IndexSpec::Flat, IndexSpec::IvfFlat { nlist: 2 }] {
            let store = similarity_store(spec, metric);
            for (id, text) in DOCS {
                let hits = store.search(text, 1, 0.99, None).expect("search");
                assert_eq!(hits.len(), 1, "spec={spec}; metric={metric:?}");
                assert_eq!(hits[0].id, *id);
                // Raw counts would score the word count, not 1.
                assert!((hits[0].score - 1.0).abs() < 1e-5, "score={}", hits[0].score);
            }
        }
    }
}

#[test]
fn similarity_scores_below_threshold_are_dropped() {
    for metric in SIMILARITY_METRICS {
        let store = similarity_store(IndexSpec::Flat, metric);
        // "rome" scores 1/sqrt(3) against doc 4 and 0 against the rest.
        let hits = store.search("rome grows nothing", 4, 0.5, None).expect("search");
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![4]);
        assert!(hits[0].score >= 0.5);

        // "trees" scores 0.5 against doc 3.
        assert!(store.search("trees", 4, 0.9, None).expect("search").is_empty());
    }
}

#[test]
fn zero_embeddings_cannot_be_normalised() {
    let mut store = similarity_store(IndexSpec::Flat, Metric::Cosine);

    let err = store.search("nothing known here", 1, 0.0, None).unwrap_err();
    assert_eq!(err.code, codes::VECTOR_INPUT_INVALID);

    let err = store
        .add_document(10, "nothing known here", Metadata::new())
        .unwrap_err();
    assert_eq!(err.code, codes::VECTOR_INPUT_INVALID);
    assert!(!store.contains(10));
    assert_eq!(store.len(), DOCS.len());
}

#[test]
fn similarity_stores_survive_save_and_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("evidence");

    for metric in SIMILARITY_METRICS {
        let original = similarity_store(IndexSpec::IvfFlat { nlist: 2 }, metric);
        original.save(&path).expect("save");

        let mut restored = VectorStore::new(VOCAB.len(), IndexSpec::IvfFlat { nlist: 2 }, metric)
            .expect("store")
            .with_embedder(CountEmbedder);
        restored.load(&path).expect("load");

        assert_eq!(restored.ids(), original.ids());
        for query in ["napoleon died in 1820", "exiled to elba", "old rome"] {
            let before = original.search(query, 3, 0.1, None).expect("search");
            assert!(!before.is_empty(), "{query}");
            assert_eq!(restored.search(query, 3, 0.1, None).expect("search"), before);
        }
    }
}
