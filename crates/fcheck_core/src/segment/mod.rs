//! Sentence boundary detection.
//!
//! The default rule splits on a whitespace character that follows `.` or `?`,
//! except after dotted initials (`e.g. `, `U.S. `) and capitalised two-letter
//! abbreviations (`Mr. `, `Dr. `). The `regex` crate has no lookbehind, so the
//! exceptions are checked on the preceding characters directly.

use regex::Regex;

use crate::error::{codes, AppError};

#[derive(Debug, Clone)]
enum BoundaryRule {
    Abbreviation,
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    rule: BoundaryRule,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self {
            rule: BoundaryRule::Abbreviation,
        }
    }

    /// Use a custom separator regex; every match is removed and ends a sentence.
    pub fn with_pattern(pattern: &str) -> Result<Self, AppError> {
        let re = Regex::new(pattern).map_err(|e| {
            AppError::new(codes::CONFIGURATION, "Invalid sentence boundary pattern")
                .with_details(format!("pattern={pattern}; err={e}"))
        })?;
        Ok(Self {
            rule: BoundaryRule::Pattern(re),
        })
    }

    /// Byte spans of the separators between sentences.
    pub fn boundaries(&self, text: &str) -> Vec<(usize, usize)> {
        match &self.rule {
            BoundaryRule::Pattern(re) => re
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| (m.start(), m.end()))
                .collect(),
            BoundaryRule::Abbreviation => abbreviation_boundaries(text),
        }
    }

    /// Byte spans of the sentences, trimmed of surrounding whitespace. Empty
    /// sentences are skipped.
    pub fn sentence_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut last = 0usize;
        for (start, end) in self.boundaries(text) {
            push_trimmed(text, last, start, &mut out);
            last = end;
        }
        push_trimmed(text, last, text.len(), &mut out);
        out
    }

    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.sentence_spans(text)
            .into_iter()
            .map(|(s, e)| &text[s..e])
            .collect()
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn abbreviation_boundaries(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::new();
    for j in 1..chars.len() {
        let (pos, c) = chars[j];
        if !c.is_whitespace() {
            continue;
        }
        let prev = chars[j - 1].1;
        if prev != '.' && prev != '?' {
            continue;
        }
        // (?<!\w\.\w.)
        if j >= 4 && is_word(chars[j - 4].1) && chars[j - 3].1 == '.' && is_word(chars[j - 2].1) {
            continue;
        }
        // (?<![A-Z][a-z]\.)
        if j >= 3
            && chars[j - 3].1.is_ascii_uppercase()
            && chars[j - 2].1.is_ascii_lowercase()
            && prev == '.'
        {
            continue;
        }
        out.push((pos, pos + c.len_utf8()));
    }
    out
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail >= slice.len() {
        return;
    }
    out.push((start + lead, end - trail));
}
