//! Coreference rewriting with offsets kept addressable in the input text.

use std::collections::HashMap;

use fcheck_core::config::DEFAULT_CONTEXT_TOKEN;
use fcheck_core::domain::{Device, SentenceProposal, Token};
use fcheck_core::error::{codes, AppError};
use fcheck_core::segment::SentenceSplitter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::pipeline::{DeviceAware, Payload, Transform};

/// A mention: surface text plus its byte span in the text handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mention {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Mention {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorefCluster {
    pub mentions: Vec<Mention>,
}

impl CorefCluster {
    pub fn new(mentions: Vec<Mention>) -> Self {
        Self { mentions }
    }

    /// The first mention's text; every other mention is rewritten to it.
    pub fn canonical(&self) -> Option<&str> {
        self.mentions.first().map(|m| m.text.as_str())
    }
}

/// The underlying coreference model.
pub trait CorefModel: Send + Sync {
    fn predict(&self, text: &str) -> Result<Vec<CorefCluster>, AppError>;

    fn to_device(&mut self, _device: Device) {}
}

/// Result of flat-string resolution. Carries no offsets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlatResolution {
    pub text: String,
    pub antecedents: Vec<String>,
}

/// Cluster restricted to the real text, spans shifted past the context prefix.
struct LocalCluster {
    canonical: String,
    mentions: Vec<Mention>,
}

pub struct CorefResolver {
    model: Box<dyn CorefModel>,
    splitter: SentenceSplitter,
    context: String,
    context_token: String,
    device: Device,
}

impl std::fmt::Debug for CorefResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorefResolver")
            .field("context_len", &self.context.len())
            .field("context_token", &self.context_token)
            .field("device", &self.device)
            .finish()
    }
}

impl CorefResolver {
    pub fn new<M: CorefModel + 'static>(model: M) -> Self {
        Self {
            model: Box::new(model),
            splitter: SentenceSplitter::new(),
            context: String::new(),
            context_token: DEFAULT_CONTEXT_TOKEN.to_string(),
            device: Device::Cpu,
        }
    }

    pub fn with_splitter(mut self, splitter: SentenceSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_context_token(mut self, token: impl Into<String>) -> Self {
        self.context_token = token.into();
        self
    }

    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    pub fn set_context_token(&mut self, token: impl Into<String>) {
        self.context_token = token.into();
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn context_token(&self) -> &str {
        &self.context_token
    }

    fn prefix(&self) -> String {
        if self.context.is_empty() && self.context_token.is_empty() {
            String::new()
        } else {
            format!("{}\n\n{} ", self.context, self.context_token)
        }
    }

    /// Run the model on `prefix + text` and keep only mentions inside `text`.
    fn clusters_for(&self, text: &str) -> Result<Vec<LocalCluster>, AppError> {
        let prefix = self.prefix();
        let full = format!("{prefix}{text}");
        let offset = prefix.len();

        let clusters = self.model.predict(&full).map_err(|e| e.with_context("stage=coref"))?;

        let mut out = Vec::new();
        for cluster in clusters {
            let Some(canonical) = cluster.canonical() else {
                continue;
            };
            let canonical = canonical.to_string();
            let mut mentions = Vec::new();
            for m in cluster.mentions {
                if m.start > m.end || m.end > full.len() {
                    warn!(start = m.start, end = m.end, len = full.len(), "mention out of bounds");
                    continue;
                }
                if m.start < offset {
                    continue;
                }
                mentions.push(Mention::new(m.text, m.start - offset, m.end - offset));
            }
            if !mentions.is_empty() {
                out.push(LocalCluster { canonical, mentions });
            }
        }
        Ok(out)
    }

    /// Multi-word antecedents and the context token, which must tokenise atomically.
    fn atomic_phrases(&self, clusters: &[LocalCluster]) -> Vec<String> {
        let mut phrases: Vec<String> = clusters
            .iter()
            .flat_map(|c| {
                std::iter::once(c.canonical.as_str()).chain(c.mentions.iter().map(|m| m.text.as_str()))
            })
            .filter(|m| m.contains(' '))
            .map(str::to_string)
            .collect();
        if !self.context_token.is_empty() {
            phrases.push(self.context_token.clone());
        }
        phrases
    }

    /// Tokenised sentences with every non-canonical mention rewritten.
    /// Token offsets are byte offsets into `text`.
    #[instrument(skip_all, fields(len = text.len()))]
    pub fn resolve(&self, text: &str) -> Result<Vec<SentenceProposal>, AppError> {
        let clusters = self.clusters_for(text)?;
        let tokenizer = build_tokenizer(&self.atomic_phrases(&clusters))?;

        // span start -> (antecedent, span end); the first cluster to claim a start wins.
        let mut replacements: HashMap<usize, (&str, usize)> = HashMap::new();
        for cluster in &clusters {
            for m in &cluster.mentions {
                replacements
                    .entry(m.start)
                    .or_insert((cluster.canonical.as_str(), m.end));
            }
        }
        debug!(clusters = clusters.len(), mentions = replacements.len(), "coref clusters");

        let mut sentences = Vec::new();
        for (start, end) in self.splitter.sentence_spans(text) {
            let mut tokens = Vec::new();
            let mut covered_until = 0usize;
            for m in tokenizer.find_iter(&text[start..end]) {
                let mut token = Token::new(m.as_str(), m.start(), m.end()).shifted(start);
                if token.start < covered_until {
                    // Inside a mention that was already replaced as a whole.
                    continue;
                }
                if let Some(&(antecedent, span_end)) = replacements.get(&token.start) {
                    let span_len = span_end - token.start;
                    let suffix = token.text().get(span_len..).unwrap_or("").to_string();
                    token.substitute(format!("{antecedent}{suffix}"));
                    covered_until = span_end;
                }
                tokens.push(token);
            }
            sentences.push(SentenceProposal::new(tokens, sentences.len()));
        }
        Ok(sentences)
    }

    /// Same clustering, spliced straight into the string. Offsets are lost.
    pub fn resolve_flat(&self, text: &str) -> Result<FlatResolution, AppError> {
        let clusters = self.clusters_for(text)?;

        let mut antecedents: Vec<String> = Vec::new();
        let mut spans: Vec<(usize, usize, &str)> = Vec::new();
        for cluster in &clusters {
            if !antecedents.contains(&cluster.canonical) {
                antecedents.push(cluster.canonical.clone());
            }
            for m in &cluster.mentions {
                spans.push((m.start, m.end, cluster.canonical.as_str()));
            }
        }
        spans.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        let mut out = text.to_string();
        let mut floor = usize::MAX;
        for (start, end, antecedent) in spans {
            if end > floor || !text.is_char_boundary(start) || !text.is_char_boundary(end) {
                continue;
            }
            out.replace_range(start..end, antecedent);
            floor = start;
        }
        Ok(FlatResolution {
            text: out,
            antecedents,
        })
    }
}

fn build_tokenizer(phrases: &[String]) -> Result<Regex, AppError> {
    let mut escaped: Vec<String> = phrases.iter().map(|p| regex::escape(p)).collect();
    escaped.sort_by(|a, b| b.len().cmp(&a.len()));
    escaped.dedup();

    let mut pattern = String::new();
    if !escaped.is_empty() {
        pattern.push_str(&format!("({})|", escaped.join("|")));
    }
    pattern.push_str(r"(\w+[^\w\s]*)|([^\w\s])");
    Regex::new(&pattern).map_err(|e| {
        AppError::new(codes::COREF_FAILED, "Failed to build mention tokenizer")
            .with_details(e.to_string())
    })
}

impl DeviceAware for CorefResolver {
    fn device(&self) -> Device {
        self.device
    }

    fn to_device(&mut self, device: Device) {
        self.device = device;
        self.model.to_device(device);
    }
}

impl Transform<Payload> for CorefResolver {
    fn apply(&self, input: Payload) -> Result<Payload, AppError> {
        match input {
            Payload::Text(text) => Ok(Payload::Sentences(self.resolve(&text)?)),
            other => Err(other.mismatch("coref", "text")),
        }
    }

    fn device_aware(&mut self) -> Option<&mut dyn DeviceAware> {
        Some(self)
    }

    fn set_context_token(&mut self, token: &str) {
        self.context_token = token.to_string();
    }

    fn describe(&self) -> String {
        format!("CorefResolver(context_token={:?}, device={})", self.context_token, self.device)
    }
}
