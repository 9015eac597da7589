//! Claim-level fact checking over a paragraph.
//!
//! Per call: segment the input, optionally extract entities once, then for each
//! claim retrieve evidence, classify, and explain flagged claims. Positions in
//! the returned suggestions are char offsets into the string the caller passed
//! in, never into a context-prefixed or rewritten intermediate.

use std::fmt;
use std::sync::Arc;

use fcheck_core::config::FactCheckConfig;
use fcheck_core::domain::{Device, ErrorPosition, SentenceProposal, SuggestionResponse};
use fcheck_core::error::{codes, AppError};
use fcheck_core::normalize::normalize_for_retrieval;
use tracing::{debug, instrument, warn};

use crate::classify::EntailmentClassifier;
use crate::explain::ExplanationGenerator;
use crate::ner::NerExtractor;
use crate::pipeline::{default_paragraph_pipeline, Payload, Pipeline};
use crate::vector::{SearchHit, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmenting,
    NerExtracting,
    Retrieving,
    Classifying,
    Explaining,
    Emitting,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Segmenting => "segmenting",
            Stage::NerExtracting => "ner_extracting",
            Stage::Retrieving => "retrieving",
            Stage::Classifying => "classifying",
            Stage::Explaining => "explaining",
            Stage::Emitting => "emitting",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit produced by the paragraph pipeline.
#[derive(Debug, Clone)]
struct Segment {
    text: String,
    /// Byte span in the evaluated input.
    span: Option<(usize, usize)>,
    /// `text` is exactly the input slice at `span`, so inner offsets map through.
    verbatim: bool,
}

/// A claim ready for retrieval, with its byte span in the evaluated input.
#[derive(Debug, Clone)]
struct Claim {
    text: String,
    span: Option<(usize, usize)>,
}

/// Layout of the string handed to the sentence pipeline.
struct Frame<'a> {
    input: String,
    prefix_len: usize,
    /// Byte offset of the context token inside `input`.
    sentinel_at: Option<usize>,
    token: &'a str,
}

pub struct FactChecker {
    config: FactCheckConfig,
    paragraph_pipeline: Pipeline,
    sentence_pipeline: Pipeline,
    store: Option<Arc<VectorStore>>,
    classifier: Option<Box<dyn EntailmentClassifier>>,
    explainer: Option<Box<dyn ExplanationGenerator>>,
    ner: Option<Box<dyn NerExtractor>>,
}

impl fmt::Debug for FactChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactChecker")
            .field("config", &self.config)
            .field("paragraph_pipeline", &self.paragraph_pipeline)
            .field("sentence_pipeline", &self.sentence_pipeline)
            .field("has_store", &self.store.is_some())
            .field("has_classifier", &self.classifier.is_some())
            .field("has_explainer", &self.explainer.is_some())
            .field("has_ner", &self.ner.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct FactCheckerBuilder {
    config: FactCheckConfig,
    paragraph_pipeline: Option<Pipeline>,
    sentence_pipeline: Option<Pipeline>,
    store: Option<Arc<VectorStore>>,
    classifier: Option<Box<dyn EntailmentClassifier>>,
    explainer: Option<Box<dyn ExplanationGenerator>>,
    ner: Option<Box<dyn NerExtractor>>,
}

impl FactCheckerBuilder {
    pub fn store(mut self, store: impl Into<Arc<VectorStore>>) -> Self {
        self.store = Some(store.into());
        self
    }

    pub fn classifier<C: EntailmentClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    pub fn explainer<E: ExplanationGenerator + 'static>(mut self, explainer: E) -> Self {
        self.explainer = Some(Box::new(explainer));
        self
    }

    pub fn ner<N: NerExtractor + 'static>(mut self, ner: N) -> Self {
        self.ner = Some(Box::new(ner));
        self
    }

    /// Splits the input into claims. Defaults to the sentence splitter.
    pub fn paragraph_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.paragraph_pipeline = Some(pipeline);
        self
    }

    /// Runs on every claim, typically coreference. Defaults to empty.
    pub fn sentence_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.sentence_pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<FactChecker, AppError> {
        self.config.validate()?;
        if self.config.get_explanation && self.explainer.is_none() {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "Explanations are enabled but no explanation generator is configured",
            ));
        }

        let mut checker = FactChecker {
            paragraph_pipeline: self
                .paragraph_pipeline
                .unwrap_or_else(default_paragraph_pipeline),
            sentence_pipeline: self
                .sentence_pipeline
                .unwrap_or_else(|| Pipeline::new(self.config.processing_device)),
            config: self.config,
            store: self.store,
            classifier: self.classifier,
            explainer: self.explainer,
            ner: self.ner,
        };
        if checker.config.automatic_contextualization && checker.sentence_pipeline.is_empty() {
            warn!("automatic contextualization is on but no sentence step consumes the context");
        }
        checker
            .sentence_pipeline
            .set_context_token(&checker.config.context_token);
        let (device, processing) = (checker.config.device, checker.config.processing_device);
        checker.relocate(device, processing);
        Ok(checker)
    }
}

impl FactChecker {
    pub fn builder(config: FactCheckConfig) -> FactCheckerBuilder {
        FactCheckerBuilder {
            config,
            ..FactCheckerBuilder::default()
        }
    }

    pub fn config(&self) -> &FactCheckConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<VectorStore>> {
        self.store.as_ref()
    }

    pub fn paragraph_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.paragraph_pipeline
    }

    pub fn sentence_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.sentence_pipeline
    }

    /// Move models and pipelines to `device`.
    pub fn to_device(&mut self, device: Device) {
        self.config.device = device;
        self.config.processing_device = device;
        self.relocate(device, device);
    }

    fn relocate(&mut self, model: Device, processing: Device) {
        self.paragraph_pipeline.to_device(processing);
        self.sentence_pipeline.to_device(processing);
        if let Some(c) = self.classifier.as_mut() {
            c.to_device(model);
        }
        if let Some(e) = self.explainer.as_mut() {
            e.to_device(model);
        }
    }

    fn ready(&self) -> Result<(&VectorStore, &dyn EntailmentClassifier), AppError> {
        let store = self.store.as_deref().ok_or_else(|| {
            AppError::new(codes::CONFIGURATION, "Fact checker has no vector store configured")
        })?;
        let classifier = self.classifier.as_deref().ok_or_else(|| {
            AppError::new(codes::CONFIGURATION, "Fact checker has no classifier configured")
        })?;
        if self.config.get_explanation && self.explainer.is_none() {
            return Err(AppError::new(
                codes::CONFIGURATION,
                "Explanations are enabled but no explanation generator is configured",
            ));
        }
        Ok((store, classifier))
    }

    /// Split `text` into claims and return a suggestion for every claim the
    /// evidence contradicts. Claims without evidence yield nothing.
    #[instrument(skip_all, fields(len = text.len()))]
    pub fn evaluate_text(&self, text: &str, context: &str) -> Result<Vec<SuggestionResponse>, AppError> {
        let (store, classifier) = self.ready()?;

        let segments = self.segment(text).map_err(|e| at(e, Stage::Segmenting, None))?;
        if segments.is_empty() {
            debug!("no sentences to check");
            return Ok(Vec::new());
        }

        let entities = self.extract_entities(text)?;

        let mut out = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let context = self.context_for(context, text, &segments[..i]);
            let claims = self
                .claims(segment, context.as_deref())
                .map_err(|e| at(e, Stage::Segmenting, Some(i)))?;
            for claim in claims {
                if let Some(s) =
                    self.check(store, classifier, &claim, text, true, entities.as_deref(), i)?
                {
                    out.push(s);
                }
            }
        }
        debug!(stage = %Stage::Done, suggestions = out.len(), "text evaluated");
        Ok(out)
    }

    /// Check one ad-hoc sentence. Positions are relative to `sentence` and
    /// never marked as located in an original paragraph.
    #[instrument(skip_all, fields(len = sentence.len()))]
    pub fn evaluate_sentence(
        &self,
        sentence: &str,
        context: &str,
    ) -> Result<Vec<SuggestionResponse>, AppError> {
        let (store, classifier) = self.ready()?;
        if sentence.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entities = self.extract_entities(sentence)?;
        let segment = Segment {
            text: sentence.to_string(),
            span: Some((0, sentence.len())),
            verbatim: true,
        };
        let context = context.trim();
        let claims = self
            .claims(&segment, (!context.is_empty()).then_some(context))
            .map_err(|e| at(e, Stage::Segmenting, Some(0)))?;

        let mut out = Vec::new();
        for claim in claims {
            if let Some(s) =
                self.check(store, classifier, &claim, sentence, false, entities.as_deref(), 0)?
            {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn segment(&self, text: &str) -> Result<Vec<Segment>, AppError> {
        let output = self.paragraph_pipeline.run(Payload::Text(text.to_string()))?;
        let mut cursor = 0usize;
        let mut located = |piece: String| {
            let span = locate(text, &mut cursor, &piece);
            Segment {
                verbatim: span.is_some(),
                text: piece,
                span,
            }
        };

        let segments = match output {
            Payload::Text(t) => vec![located(t)],
            Payload::Segments(parts) => parts.into_iter().map(located).collect(),
            Payload::Sentences(props) => props
                .into_iter()
                .map(|p| {
                    let span = p.span().filter(|&(s, e)| valid_span(text, s, e));
                    Segment {
                        text: p.text().to_string(),
                        span,
                        verbatim: false,
                    }
                })
                .collect(),
        };
        Ok(segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect())
    }

    fn extract_entities(&self, text: &str) -> Result<Option<Vec<String>>, AppError> {
        if !self.config.enable_ner {
            return Ok(None);
        }
        let Some(ner) = self.ner.as_deref() else {
            debug!("entity filter enabled without an extractor; searching unfiltered");
            return Ok(None);
        };
        let entities = ner
            .extract(&normalize_for_retrieval(text))
            .map_err(|e| at(e, Stage::NerExtracting, None))?;
        debug!(stage = %Stage::NerExtracting, entities = entities.len(), "entities extracted");
        Ok(Some(entities))
    }

    /// Caller context, followed in automatic mode by the earlier sentences.
    fn context_for(&self, caller: &str, text: &str, previous: &[Segment]) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        if !caller.trim().is_empty() {
            parts.push(caller.trim());
        }
        if self.config.automatic_contextualization {
            for seg in previous {
                let original = seg
                    .span
                    .and_then(|(s, e)| text.get(s..e))
                    .unwrap_or(seg.text.as_str());
                parts.push(original.trim());
            }
        }
        let joined = parts.join(" ");
        (!joined.trim().is_empty()).then_some(joined)
    }

    fn frame<'a>(&'a self, segment: &Segment, context: Option<&str>) -> Frame<'a> {
        let token = self.config.context_token.as_str();
        match context {
            Some(ctx) => {
                let prefix = format!("{ctx} {token} ");
                Frame {
                    input: format!("{prefix}{}", segment.text),
                    prefix_len: prefix.len(),
                    sentinel_at: Some(ctx.len() + 1),
                    token,
                }
            }
            None => Frame {
                input: segment.text.clone(),
                prefix_len: 0,
                sentinel_at: None,
                token,
            },
        }
    }

    fn claims(&self, segment: &Segment, context: Option<&str>) -> Result<Vec<Claim>, AppError> {
        if self.sentence_pipeline.is_empty() {
            // Nothing would consume the context, so it is not spliced in.
            return Ok(vec![Claim {
                text: segment.text.clone(),
                span: segment.span,
            }]);
        }

        let frame = self.frame(segment, context);
        let output = self.sentence_pipeline.run(Payload::Text(frame.input.clone()))?;
        let claims = match output {
            Payload::Text(t) => {
                let body = strip_context_text(&t, &frame);
                vec![claim_within(segment, body)]
            }
            Payload::Segments(parts) => strip_context_segments(parts, &frame)
                .iter()
                .map(|p| claim_within(segment, p))
                .collect(),
            Payload::Sentences(props) => claims_from_sentences(props, &frame, segment),
        };
        Ok(claims
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        store: &VectorStore,
        classifier: &dyn EntailmentClassifier,
        claim: &Claim,
        source: &str,
        in_original: bool,
        entities: Option<&[String]>,
        index: usize,
    ) -> Result<Option<SuggestionResponse>, AppError> {
        let query = normalize_for_retrieval(&claim.text);
        let hits = store
            .search(
                &query,
                self.config.storage_search_k,
                self.config.storage_search_threshold,
                entities,
            )
            .map_err(|e| at(e, Stage::Retrieving, Some(index)))?;

        let evidence = hits
            .iter()
            .filter_map(SearchHit::text)
            .collect::<Vec<_>>()
            .join(". ");
        let evidence_chars = evidence.trim().chars().count();
        if evidence_chars == 0 || evidence_chars < self.config.min_evidence_chars {
            debug!(sentence = index, hits = hits.len(), "no usable evidence; claim skipped");
            return Ok(None);
        }

        let label = classifier
            .classify(&claim.text, &evidence)
            .map_err(|e| at(e, Stage::Classifying, Some(index)))?;
        debug!(stage = %Stage::Classifying, sentence = index, label = %label, "claim classified");
        if !label.is_flagged() {
            return Ok(None);
        }

        let explanation = match (self.config.get_explanation, self.explainer.as_deref()) {
            (true, Some(explainer)) => explainer
                .explain(&claim.text, &evidence, &self.config.generation)
                .map_err(|e| at(e, Stage::Explaining, Some(index)))?,
            _ => String::new(),
        };

        let position = match claim.span {
            Some((start, end)) => ErrorPosition::from_byte_span(source, start, end, in_original),
            None => ErrorPosition::whole(&claim.text, false),
        };
        debug!(stage = %Stage::Emitting, sentence = index, "suggestion emitted");
        Ok(Some(SuggestionResponse {
            fact: claim.text.clone(),
            position,
            is_correct: false,
            explanation,
        }))
    }
}

fn at(err: AppError, stage: Stage, sentence: Option<usize>) -> AppError {
    match sentence {
        Some(i) => err.with_context(format!("stage={stage}; sentence={i}")),
        None => err.with_context(format!("stage={stage}")),
    }
}

fn valid_span(text: &str, start: usize, end: usize) -> bool {
    start <= end && end <= text.len() && text.is_char_boundary(start) && text.is_char_boundary(end)
}

/// Find `needle` (trimmed) in `haystack` at or after `cursor`, advancing the cursor.
fn locate(haystack: &str, cursor: &mut usize, needle: &str) -> Option<(usize, usize)> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let i = haystack.get(*cursor..)?.find(needle)?;
    let start = *cursor + i;
    let end = start + needle.len();
    *cursor = end;
    Some((start, end))
}

/// A claim that is a substring of `segment`, mapped into input offsets when possible.
fn claim_within(segment: &Segment, text: &str) -> Claim {
    let text = text.trim();
    let span = match (segment.verbatim, segment.span) {
        (true, Some((base, _))) => {
            let mut cursor = 0;
            locate(&segment.text, &mut cursor, text)
                .map(|(s, e)| (base + s, base + e))
                .or(segment.span)
        }
        _ => segment.span,
    };
    Claim {
        text: text.to_string(),
        span,
    }
}

fn strip_context_text<'t>(text: &'t str, frame: &Frame<'_>) -> &'t str {
    if frame.sentinel_at.is_none() {
        return text;
    }
    match text.rfind(frame.token) {
        Some(i) => &text[i + frame.token.len()..],
        None => text.get(frame.prefix_len..).unwrap_or(text),
    }
}

fn strip_context_segments(parts: Vec<String>, frame: &Frame<'_>) -> Vec<String> {
    if frame.sentinel_at.is_none() {
        return parts;
    }
    match parts.iter().rposition(|p| p.contains(frame.token)) {
        Some(i) => {
            let mut kept = Vec::with_capacity(parts.len() - i);
            let first = &parts[i];
            if let Some(pos) = first.rfind(frame.token) {
                kept.push(first[pos + frame.token.len()..].to_string());
            }
            kept.extend(parts.into_iter().skip(i + 1));
            kept
        }
        None => parts.into_iter().last().into_iter().collect(),
    }
}

/// Drop every token that starts before the end of the sentinel, then map the
/// remaining token spans back through the context prefix into input offsets.
/// A sentinel split into fragments by the step is dropped whole.
fn claims_from_sentences(props: Vec<SentenceProposal>, frame: &Frame<'_>, segment: &Segment) -> Vec<Claim> {
    let cut = frame.sentinel_at.map_or(0, |at| at + frame.token.len());

    let mut claims = Vec::new();
    for prop in props {
        let kept: Vec<_> = prop
            .into_tokens()
            .into_iter()
            .filter(|t| t.start >= cut)
            .collect();
        if kept.is_empty() {
            continue;
        }
        let sentence = SentenceProposal::new(kept, claims.len());
        let span = match (segment.verbatim, segment.span, sentence.span()) {
            (true, Some((base, limit)), Some((s, e))) => s
                .checked_sub(frame.prefix_len)
                .zip(e.checked_sub(frame.prefix_len))
                .map(|(s, e)| (base + s, base + e))
                .filter(|&(_, e)| e <= limit)
                .or(segment.span),
            _ => segment.span,
        };
        claims.push(Claim {
            text: sentence.text().to_string(),
            span,
        });
    }
    claims
}
