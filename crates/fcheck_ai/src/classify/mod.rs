use std::fmt;

use fcheck_core::config::GenerationConfig;
use fcheck_core::domain::Device;
use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use crate::explain::prompts::{entailment_prompt, Prompt};
use crate::llm::Llm;

/// Verdict of an entailment classifier for a `(claim, evidence)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntailmentLabel {
    /// Label 0: evidence supports the claim or does not contradict it.
    Entailed,
    Contradicted,
    /// Any further class of a multi-label head.
    Other(u32),
}

impl EntailmentLabel {
    /// Maps a classifier head index onto a label (`0` entailed, `1` contradicted).
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => EntailmentLabel::Entailed,
            1 => EntailmentLabel::Contradicted,
            n => EntailmentLabel::Other(n),
        }
    }

    /// Only `Entailed` suppresses a suggestion.
    pub fn is_flagged(&self) -> bool {
        !matches!(self, EntailmentLabel::Entailed)
    }
}

impl fmt::Display for EntailmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntailmentLabel::Entailed => f.write_str("entailed"),
            EntailmentLabel::Contradicted => f.write_str("contradicted"),
            EntailmentLabel::Other(n) => write!(f, "label_{n}"),
        }
    }
}

pub trait EntailmentClassifier: Send + Sync {
    fn classify(&self, claim: &str, evidence: &str) -> Result<EntailmentLabel, AppError>;

    fn to_device(&mut self, _device: Device) {}
}

/// Classifier that asks an [`Llm`] for a one-word verdict.
pub struct LlmEntailmentClassifier<L> {
    llm: L,
    cfg: GenerationConfig,
}

impl<L: Llm> LlmEntailmentClassifier<L> {
    pub fn new(llm: L) -> Self {
        Self {
            llm,
            cfg: GenerationConfig {
                max_new_tokens: 8,
                do_sample: false,
                temperature: 0.0,
            },
        }
    }
}

impl<L: Llm> EntailmentClassifier for LlmEntailmentClassifier<L> {
    fn classify(&self, claim: &str, evidence: &str) -> Result<EntailmentLabel, AppError> {
        let prompt = Prompt::Text(entailment_prompt(claim, evidence));
        let reply = self.llm.generate(&prompt, &self.cfg)?;
        parse_verdict(&reply)
    }
}

fn parse_verdict(reply: &str) -> Result<EntailmentLabel, AppError> {
    let word = reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase();
    match word.as_str() {
        "SUPPORTED" | "ENTAILED" | "TRUE" => Ok(EntailmentLabel::Entailed),
        "CONTRADICTED" | "REFUTED" | "FALSE" => Ok(EntailmentLabel::Contradicted),
        _ => Err(
            AppError::new(codes::MODEL_CALL_FAILED, "Classifier reply had no verdict")
                .with_details(format!("reply={}", reply.trim())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Llm for Fixed {
        fn generate(&self, _prompt: &Prompt, _cfg: &GenerationConfig) -> Result<String, AppError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn label_indices() {
        assert_eq!(EntailmentLabel::from_index(0), EntailmentLabel::Entailed);
        assert_eq!(EntailmentLabel::from_index(1), EntailmentLabel::Contradicted);
        assert_eq!(EntailmentLabel::from_index(4), EntailmentLabel::Other(4));
        assert!(!EntailmentLabel::Entailed.is_flagged());
        assert!(EntailmentLabel::Other(2).is_flagged());
    }

    #[test]
    fn parses_llm_verdicts() {
        let c = LlmEntailmentClassifier::new(Fixed("Contradicted."));
        assert_eq!(c.classify("a", "b").unwrap(), EntailmentLabel::Contradicted);

        let c = LlmEntailmentClassifier::new(Fixed("\n**SUPPORTED**"));
        assert_eq!(c.classify("a", "b").unwrap(), EntailmentLabel::Entailed);

        let err = LlmEntailmentClassifier::new(Fixed("I am not sure"))
            .classify("a", "b")
            .unwrap_err();
        assert_eq!(err.code, codes::MODEL_CALL_FAILED);
    }
}
