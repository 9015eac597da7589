//! Offline evaluation of suggestion output against labelled paragraphs.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};
use crate::segment::SentenceSplitter;

pub const TARGET_NAMES: [&str; 2] = ["no_error", "error"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Binary report over the `no_error` (0) / `error` (1) labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationReport {
    pub no_error: ClassScores,
    pub error: ClassScores,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    pub fn from_labels(y_true: &[bool], y_pred: &[bool]) -> Result<Self, AppError> {
        ensure_same_len("y_true", y_true.len(), "y_pred", y_pred.len())?;

        let total = y_true.len();
        let no_error = class_scores(y_true, y_pred, false);
        let error = class_scores(y_true, y_pred, true);
        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();

        let macro_avg = ClassScores {
            precision: (no_error.precision + error.precision) / 2.0,
            recall: (no_error.recall + error.recall) / 2.0,
            f1: (no_error.f1 + error.f1) / 2.0,
            support: total,
        };
        let weighted = |f: fn(&ClassScores) -> f64| {
            safe_div(
                f(&no_error) * no_error.support as f64 + f(&error) * error.support as f64,
                total as f64,
            )
        };
        let weighted_avg = ClassScores {
            precision: weighted(|s| s.precision),
            recall: weighted(|s| s.recall),
            f1: weighted(|s| s.f1),
            support: total,
        };

        Ok(Self {
            no_error,
            error,
            accuracy: safe_div(correct as f64, total as f64),
            macro_avg,
            weighted_avg,
        })
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, s) in TARGET_NAMES.iter().zip([&self.no_error, &self.error]) {
            write_row(f, name, s)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.3} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_row(f, "macro avg", &self.macro_avg)?;
        write_row(f, "weighted avg", &self.weighted_avg)
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores) -> fmt::Result {
    writeln!(
        f,
        "{:>12} {:>9.3} {:>9.3} {:>9.3} {:>9}",
        name, s.precision, s.recall, s.f1, s.support
    )
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SuggestionMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A paragraph is positive when it carries at least one suggestion.
pub fn paragraph_classification_report<S: AsRef<str>>(
    true_suggestions: &[Vec<S>],
    pred_suggestions: &[Vec<S>],
) -> Result<ClassificationReport, AppError> {
    ensure_same_len(
        "true_suggestions",
        true_suggestions.len(),
        "pred_suggestions",
        pred_suggestions.len(),
    )?;
    let y_true: Vec<bool> = true_suggestions.iter().map(|s| !s.is_empty()).collect();
    let y_pred: Vec<bool> = pred_suggestions.iter().map(|s| !s.is_empty()).collect();
    ClassificationReport::from_labels(&y_true, &y_pred)
}

/// Labels every sentence of every text by whether any suggestion string occurs in it.
pub fn sentence_classification_report<S: AsRef<str>>(
    splitter: &SentenceSplitter,
    texts: &[&str],
    true_suggestions: &[Vec<S>],
    pred_suggestions: &[Vec<S>],
) -> Result<ClassificationReport, AppError> {
    ensure_same_len("texts", texts.len(), "true_suggestions", true_suggestions.len())?;
    ensure_same_len("texts", texts.len(), "pred_suggestions", pred_suggestions.len())?;

    let mut y_true = Vec::new();
    let mut y_pred = Vec::new();
    for ((text, trues), preds) in texts.iter().zip(true_suggestions).zip(pred_suggestions) {
        for sentence in splitter.split(text) {
            y_true.push(mentions_any(sentence, trues));
            y_pred.push(mentions_any(sentence, preds));
        }
    }
    ClassificationReport::from_labels(&y_true, &y_pred)
}

/// Exact-match precision/recall/F1 with counts summed over paragraphs.
pub fn suggestion_level_metrics<S: AsRef<str>>(
    true_suggestions: &[Vec<S>],
    pred_suggestions: &[Vec<S>],
) -> Result<SuggestionMetrics, AppError> {
    ensure_same_len(
        "true_suggestions",
        true_suggestions.len(),
        "pred_suggestions",
        pred_suggestions.len(),
    )?;

    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (trues, preds) in true_suggestions.iter().zip(pred_suggestions) {
        let t: HashSet<&str> = trues.iter().map(|s| s.as_ref()).collect();
        let p: HashSet<&str> = preds.iter().map(|s| s.as_ref()).collect();
        tp += t.intersection(&p).count();
        fp += p.difference(&t).count();
        fn_ += t.difference(&p).count();
    }

    let precision = safe_div(tp as f64, (tp + fp) as f64);
    let recall = safe_div(tp as f64, (tp + fn_) as f64);
    Ok(SuggestionMetrics {
        precision,
        recall,
        f1: f1(precision, recall),
    })
}

/// Parses a JSON array column (as exported with labelled datasets) into strings.
pub fn parse_suggestions_column(raw: &str) -> Result<Vec<String>, AppError> {
    let items: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
        AppError::new(codes::METRICS_INPUT_INVALID, "Suggestions column is not a JSON array")
            .with_details(e.to_string())
    })?;
    Ok(items
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

fn mentions_any<S: AsRef<str>>(sentence: &str, errors: &[S]) -> bool {
    errors.iter().any(|e| {
        let e: &str = e.as_ref();
        sentence.contains(e)
    })
}

fn class_scores(y_true: &[bool], y_pred: &[bool], class: bool) -> ClassScores {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = safe_div(tp as f64, (tp + fp) as f64);
    let recall = safe_div(tp as f64, (tp + fn_) as f64);
    ClassScores {
        precision,
        recall,
        f1: f1(precision, recall),
        support: tp + fn_,
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    safe_div(2.0 * precision * recall, precision + recall)
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn ensure_same_len(a: &str, a_len: usize, b: &str, b_len: usize) -> Result<(), AppError> {
    if a_len != b_len {
        return Err(AppError::new(
            codes::METRICS_INPUT_INVALID,
            format!("{a} and {b} must have the same length"),
        )
        .with_details(format!("{a}={a_len}; {b}={b_len}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn paragraph_report_counts_flagged_paragraphs() {
        let truth = vec![vec!["a"], vec![], vec!["b"], vec![]];
        let pred = vec![vec!["a"], vec!["x"], vec![], vec![]];
        let report = paragraph_classification_report(&truth, &pred).unwrap();

        assert_eq!(report.error.support, 2);
        assert_eq!(report.no_error.support, 2);
        assert!(close(report.error.precision, 0.5));
        assert!(close(report.error.recall, 0.5));
        assert!(close(report.accuracy, 0.5));
    }

    #[test]
    fn zero_division_is_zero() {
        let truth: Vec<Vec<&str>> = vec![vec![], vec![]];
        let pred: Vec<Vec<&str>> = vec![vec![], vec![]];
        let report = paragraph_classification_report(&truth, &pred).unwrap();
        assert_eq!(report.error, ClassScores::default());
        assert!(close(report.no_error.f1, 1.0));
        assert!(close(report.accuracy, 1.0));
    }

    #[test]
    fn sentence_report_labels_each_sentence() {
        let splitter = SentenceSplitter::new();
        let texts = ["Napoleon died in 1820. He was exiled. Paris is in France."];
        let truth = vec![vec!["died in 1820"]];
        let pred = vec![vec!["Paris is in Spain"]];
        let report = sentence_classification_report(&splitter, &texts, &truth, &pred).unwrap();

        assert_eq!(report.macro_avg.support, 3);
        assert_eq!(report.error.support, 1);
        assert!(close(report.error.recall, 0.0));
        assert!(close(report.no_error.recall, 1.0));
    }

    #[test]
    fn suggestion_metrics_sum_over_paragraphs() {
        let truth = vec![vec!["a", "b"], vec!["c"]];
        let pred = vec![vec!["a"], vec!["c", "d"]];
        let m = suggestion_level_metrics(&truth, &pred).unwrap();
        // tp=2 fp=1 fn=1
        assert!(close(m.precision, 2.0 / 3.0));
        assert!(close(m.recall, 2.0 / 3.0));
        assert!(close(m.f1, 2.0 / 3.0));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let truth = vec![vec!["a"]];
        let pred: Vec<Vec<&str>> = vec![];
        let err = suggestion_level_metrics(&truth, &pred).unwrap_err();
        assert_eq!(err.code, codes::METRICS_INPUT_INVALID);
    }

    #[test]
    fn parses_suggestion_column() {
        let parsed = parse_suggestions_column(r#"["one", 2]"#).unwrap();
        assert_eq!(parsed, vec!["one".to_string(), "2".to_string()]);
        let err = parse_suggestions_column("not json").unwrap_err();
        assert_eq!(err.code, codes::METRICS_INPUT_INVALID);
    }

    #[test]
    fn report_renders_table() {
        let report = ClassificationReport::from_labels(&[true, false], &[true, true]).unwrap();
        let rendered = report.to_string();
        assert!(rendered.contains("no_error"));
        assert!(rendered.contains("weighted avg"));
        assert!(rendered.contains("0.500"));
    }
}
