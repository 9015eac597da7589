use fcheck_core::corpus::collapse_whitespace;
use fcheck_core::error::AppError;
use fcheck_core::segment::SentenceSplitter;

use super::{Payload, Transform};

/// Splits text into sentence strings. Segments are split further.
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    splitter: SentenceSplitter,
}

impl SentenceSegmenter {
    pub fn new(splitter: SentenceSplitter) -> Self {
        Self { splitter }
    }
}

impl Transform<Payload> for SentenceSegmenter {
    fn apply(&self, input: Payload) -> Result<Payload, AppError> {
        match input {
            Payload::Text(text) => Ok(Payload::Segments(
                self.splitter.split(&text).into_iter().map(str::to_string).collect(),
            )),
            Payload::Segments(segments) => Ok(Payload::Segments(
                segments
                    .iter()
                    .flat_map(|s| self.splitter.split(s))
                    .map(str::to_string)
                    .collect(),
            )),
            other => Err(other.mismatch("sentence_segmenter", "text or segments")),
        }
    }
}

/// Collapses runs of spaces and tabs and trims the ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanText;

impl Transform<Payload> for CleanText {
    fn apply(&self, input: Payload) -> Result<Payload, AppError> {
        let clean = |s: &str| collapse_whitespace(s).trim().to_string();
        match input {
            Payload::Text(text) => Ok(Payload::Text(clean(&text))),
            Payload::Segments(segments) => Ok(Payload::Segments(
                segments.iter().map(|s| clean(s.as_str())).filter(|s| !s.is_empty()).collect(),
            )),
            other => Err(other.mismatch("clean_text", "text or segments")),
        }
    }
}

/// Adapts a closure into a step.
pub struct FnStep<T> {
    label: String,
    f: Box<dyn Fn(T) -> Result<T, AppError> + Send + Sync>,
}

impl<T> FnStep<T> {
    pub fn new<F>(label: &str, f: F) -> Self
    where
        F: Fn(T) -> Result<T, AppError> + Send + Sync + 'static,
    {
        Self {
            label: label.to_string(),
            f: Box::new(f),
        }
    }
}

impl<T> Transform<T> for FnStep<T> {
    fn apply(&self, input: T) -> Result<T, AppError> {
        (self.f)(input)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcheck_core::error::codes;

    #[test]
    fn segmenter_rejects_sentences() {
        let err = SentenceSegmenter::default()
            .apply(Payload::Sentences(Vec::new()))
            .unwrap_err();
        assert_eq!(err.code, codes::PIPELINE_TYPE_MISMATCH);
    }

    #[test]
    fn segmenter_splits_segments_further() {
        let out = SentenceSegmenter::default()
            .apply(Payload::Segments(vec!["A b. C d.".into(), "E.".into()]))
            .unwrap();
        assert_eq!(
            out,
            Payload::Segments(vec!["A b.".into(), "C d.".into(), "E.".into()])
        );
    }

    #[test]
    fn clean_text_drops_blank_segments() {
        let out = CleanText
            .apply(Payload::Segments(vec!["  a\t b ".into(), "   ".into()]))
            .unwrap();
        assert_eq!(out, Payload::Segments(vec!["a b".into()]));
    }
}
