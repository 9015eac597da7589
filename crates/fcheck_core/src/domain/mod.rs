use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};

/// Placement for model inference. Threaded explicitly through every component.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(
                AppError::new(codes::CONFIGURATION, "Unsupported device")
                    .with_details(format!("device={other}")),
            ),
        }
    }
}

/// A unit of text cut from a sentence or document.
///
/// `start`/`end` are half-open byte offsets into the text the token was cut
/// from (after any sentence shift has been applied). The text may differ from
/// `source[start..end]` only after a coreference substitution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Replace the surface text, keeping the span. Reserved for coreference rewriting.
    pub fn substitute(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn shifted(mut self, offset: usize) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A sentence reconstructed from (possibly rewritten) tokens.
///
/// Owns its tokens; the text is derived once at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentenceProposal {
    index: usize,
    text: String,
    tokens: Vec<Token>,
}

impl SentenceProposal {
    pub fn new(tokens: Vec<Token>, index: usize) -> Self {
        let text = join_tokens(&tokens);
        Self {
            index,
            text,
            tokens,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Span from the first token's start to the last token's end.
    pub fn span(&self) -> Option<(usize, usize)> {
        let first = self.tokens.first()?;
        let last = self.tokens.last()?;
        Some((first.start, last.end))
    }
}

impl fmt::Display for SentenceProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Concatenate token texts, inserting one space before any token that starts
/// with an alphanumeric character (never before the first token).
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let starts_alnum = token
            .text()
            .chars()
            .next()
            .map(char::is_alphanumeric)
            .unwrap_or(false);
        if i > 0 && starts_alnum {
            out.push(' ');
        }
        out.push_str(token.text());
    }
    out
}

/// Location of an evaluated fragment, in characters of the original input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPosition {
    pub start_char_index: usize,
    pub end_char_index: usize,
    pub in_original: bool,
}

impl ErrorPosition {
    /// Build a position from a byte span of `source`, converting to char indices.
    pub fn from_byte_span(source: &str, start: usize, end: usize, in_original: bool) -> Self {
        Self {
            start_char_index: char_index(source, start),
            end_char_index: char_index(source, end),
            in_original,
        }
    }

    pub fn whole(text: &str, in_original: bool) -> Self {
        Self {
            start_char_index: 0,
            end_char_index: text.chars().count(),
            in_original,
        }
    }
}

/// Result of evaluating one claim. Frozen once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestionResponse {
    pub fact: String,
    pub position: ErrorPosition,
    pub is_correct: bool,
    pub explanation: String,
}

/// Number of chars in `source[..byte]`, clamping to the nearest char boundary below.
pub fn char_index(source: &str, byte: usize) -> usize {
    let mut b = byte.min(source.len());
    while !source.is_char_boundary(b) {
        b -= 1;
    }
    source[..b].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_tokens_without_space_before_punctuation() {
        let tokens = vec![
            Token::new("Angela", 0, 6),
            Token::new("saw", 7, 10),
            Token::new("her", 11, 14),
            Token::new("friend.", 15, 22),
            Token::new("\"", 22, 23),
        ];
        let sentence = SentenceProposal::new(tokens, 3);
        assert_eq!(sentence.text(), "Angela saw her friend.\"");
        assert_eq!(sentence.index(), 3);
        assert_eq!(sentence.span(), Some((0, 23)));
    }

    #[test]
    fn empty_proposal_has_no_span() {
        let sentence = SentenceProposal::new(Vec::new(), 0);
        assert!(sentence.is_empty());
        assert_eq!(sentence.text(), "");
        assert_eq!(sentence.span(), None);
    }

    #[test]
    fn char_positions_count_scalar_values() {
        let src = "Zoë said hi.";
        // "said" starts at byte 5 (ë is two bytes) but char 4.
        let pos = ErrorPosition::from_byte_span(src, 5, 9, true);
        assert_eq!(pos.start_char_index, 4);
        assert_eq!(pos.end_char_index, 8);
        assert_eq!(char_index(src, 3), 2);
    }

    #[test]
    fn parses_devices() {
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!(" cpu ".parse::<Device>().unwrap(), Device::Cpu);
        let err = "tpu".parse::<Device>().unwrap_err();
        assert_eq!(err.code, codes::CONFIGURATION);
    }
}
