use fcheck_core::config::GenerationConfig;
use fcheck_core::domain::Device;
use fcheck_core::error::AppError;
use tracing::instrument;

use crate::llm::Llm;

pub mod prompts;

use prompts::FactCheckerPrompt;

/// Produces a natural-language account of why a claim conflicts with evidence.
pub trait ExplanationGenerator: Send + Sync {
    fn explain(&self, claim: &str, evidence: &str, cfg: &GenerationConfig) -> Result<String, AppError>;

    fn to_device(&mut self, _device: Device) {}
}

/// Explanation generator backed by any [`Llm`] and a prompt template.
pub struct LlmExplainer<L> {
    llm: L,
    prompt: FactCheckerPrompt,
}

impl<L: Llm> LlmExplainer<L> {
    pub fn new(llm: L) -> Self {
        Self {
            llm,
            prompt: FactCheckerPrompt::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: FactCheckerPrompt) -> Self {
        self.prompt = prompt;
        self
    }
}

impl<L: Llm> ExplanationGenerator for LlmExplainer<L> {
    #[instrument(skip_all, fields(claim_len = claim.len(), evidence_len = evidence.len()))]
    fn explain(&self, claim: &str, evidence: &str, cfg: &GenerationConfig) -> Result<String, AppError> {
        let prompt = self.prompt.render(claim, evidence);
        let text = self.llm.generate(&prompt, cfg)?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::prompts::Prompt;
    use std::sync::Mutex;

    struct RecordingLlm {
        seen: Mutex<Vec<Prompt>>,
    }

    impl Llm for RecordingLlm {
        fn generate(&self, prompt: &Prompt, _cfg: &GenerationConfig) -> Result<String, AppError> {
            self.seen.lock().unwrap().push(prompt.clone());
            Ok("  The facts say 1821.\n".to_string())
        }
    }

    #[test]
    fn renders_prompt_and_trims_reply() {
        let explainer = LlmExplainer::new(RecordingLlm {
            seen: Mutex::new(Vec::new()),
        })
        .with_prompt(FactCheckerPrompt::new(Prompt::Text("{claim}|{evidence}".into())).unwrap());

        let out = explainer
            .explain("died 1820", "died 1821", &GenerationConfig::default())
            .unwrap();
        assert_eq!(out, "The facts say 1821.");
        let seen = explainer.llm.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Prompt::Text("died 1820|died 1821".into())]);
    }
}
