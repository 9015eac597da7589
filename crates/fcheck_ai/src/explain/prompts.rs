use fcheck_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

const DEFAULT_SYSTEM: &str = "You are a precise and concise assistant that analyzes factual \
accuracy in statements based on provided facts. \
Your task is to identify and briefly explain factual inconsistencies \
between the given statement and the listed facts. \
Only mention explicit factual contradictions. Do not speculate or add \
information not found in the facts. ";

const DEFAULT_USER: &str = "### Facts:\n{evidence}\n\n### Statement:\n{claim}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Either a raw completion prompt or a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Prompt {
    Text(String),
    Chat(Vec<ChatMessage>),
}

/// Renders `{claim}` and `{evidence}` into a prompt template.
///
/// For chat templates only the last message is rendered; earlier messages are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactCheckerPrompt {
    template: Prompt,
}

impl Default for FactCheckerPrompt {
    fn default() -> Self {
        Self {
            template: Prompt::Chat(vec![
                ChatMessage::new("system", DEFAULT_SYSTEM),
                ChatMessage::new("user", DEFAULT_USER),
            ]),
        }
    }
}

impl FactCheckerPrompt {
    pub fn new(template: Prompt) -> Result<Self, AppError> {
        if let Prompt::Chat(messages) = &template {
            if messages.is_empty() {
                return Err(AppError::new(
                    codes::PROMPT_INVALID,
                    "Chat prompt template must contain at least one message",
                ));
            }
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &Prompt {
        &self.template
    }

    pub fn render(&self, claim: &str, evidence: &str) -> Prompt {
        match &self.template {
            Prompt::Text(t) => Prompt::Text(fill(t, claim, evidence)),
            Prompt::Chat(messages) => {
                let mut messages = messages.clone();
                if let Some(last) = messages.last_mut() {
                    last.content = fill(&last.content, claim, evidence);
                }
                Prompt::Chat(messages)
            }
        }
    }
}

/// Single left-to-right pass, so placeholder-looking text inside the claim is
/// never expanded a second time.
fn fill(template: &str, claim: &str, evidence: &str) -> String {
    let mut out = String::with_capacity(template.len() + claim.len() + evidence.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        if let Some(r) = tail.strip_prefix("{claim}") {
            out.push_str(claim);
            rest = r;
        } else if let Some(r) = tail.strip_prefix("{evidence}") {
            out.push_str(evidence);
            rest = r;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// One-word verdict prompt used by the LLM-backed entailment classifier.
pub fn entailment_prompt(claim: &str, evidence: &str) -> String {
    format!(
        r#"You are verifying a historical statement against reference facts.

Facts:
{evidence}

Statement:
{claim}

Answer with exactly one word:
- SUPPORTED if the facts agree with the statement or do not address it.
- CONTRADICTED if the facts explicitly contradict the statement.
"#
    )
}
