use std::collections::HashMap;

use fcheck_core::config::FactCheckConfig;
use fcheck_core::corpus::CorpusCleaner;
use fcheck_core::domain::Device;
use fcheck_core::metrics::{
    paragraph_classification_report, parse_suggestions_column, sentence_classification_report,
    suggestion_level_metrics,
};
use fcheck_core::segment::SentenceSplitter;
use pretty_assertions::assert_eq;

const SCANNED_PAGE: &str = "Cambridge Histories Online © Cambridge University Press, 2008\r\n\
412\r\n\
The campaign of 1812 ended in disaster for the Grande Armee, which\r\n\
lost most of its men during the retreat from Moscow.\r\n\
\r\n\
xiv\r\n\
Napoleon abdicated in April 1814 and was exiled to the island of Elba.\r\n\
\r\n\
Too short.\r\n";

#[test]
fn scanned_page_becomes_clean_paragraphs() {
    let paragraphs = CorpusCleaner::default().clean_and_paragraphize(SCANNED_PAGE);
    assert_eq!(
        paragraphs,
        vec![
            "The campaign of 1812 ended in disaster for the Grande Armee, which lost most of its men during the retreat from Moscow.".to_string(),
            "Napoleon abdicated in April 1814 and was exiled to the island of Elba.".to_string(),
        ]
    );
}

#[test]
fn labelled_dataset_scores_end_to_end() {
    let texts = [
        "Napoleon died in 1820. He was exiled to Elba.",
        "Paris is the capital of France.",
        "Rome was founded in 753 BC. It grew quickly.",
    ];
    let truth_column = [r#"["Napoleon died in 1820"]"#, "[]", r#"["It grew quickly"]"#];
    let pred_column = [r#"["Napoleon died in 1820"]"#, r#"["capital of France"]"#, "[]"];

    let truth: Vec<Vec<String>> = truth_column
        .iter()
        .map(|c| parse_suggestions_column(c).expect("truth"))
        .collect();
    let pred: Vec<Vec<String>> = pred_column
        .iter()
        .map(|c| parse_suggestions_column(c).expect("pred"))
        .collect();

    let paragraphs = paragraph_classification_report(&truth, &pred).expect("paragraph report");
    assert_eq!(paragraphs.error.support, 2);
    assert!((paragraphs.accuracy - 1.0 / 3.0).abs() < 1e-9);

    let sentences = sentence_classification_report(&SentenceSplitter::new(), &texts, &truth, &pred)
        .expect("sentence report");
    assert_eq!(sentences.macro_avg.support, 5);
    assert_eq!(sentences.error.support, 2);
    assert!((sentences.error.precision - 0.5).abs() < 1e-9);

    let exact = suggestion_level_metrics(&truth, &pred).expect("exact");
    assert!((exact.precision - 0.5).abs() < 1e-9);
    assert!((exact.recall - 0.5).abs() < 1e-9);
    assert!((exact.f1 - 0.5).abs() < 1e-9);

    let rendered = sentences.to_string();
    assert!(rendered.contains("accuracy"));
    assert!(rendered.contains("weighted avg"));
}

#[test]
fn config_from_deployment_environment() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("DEVICE", "gpu"),
        ("STORAGE_SEARCH_K", "3"),
        ("STORAGE_SEARCH_THRESHOLD", "0.8"),
        ("AUTOMATIC_CONTEXTUALIZATION", "yes"),
        ("ENABLE_LLM", "0"),
    ]);
    let cfg = FactCheckConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).expect("config");
    assert_eq!(cfg.device, Device::Cuda);
    assert_eq!(cfg.processing_device, Device::Cuda);
    assert_eq!(cfg.storage_search_k, 3);
    assert!(cfg.automatic_contextualization);
    assert!(!cfg.get_explanation);
    cfg.validate().expect("valid");
}
