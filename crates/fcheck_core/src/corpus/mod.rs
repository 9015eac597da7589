//! Cleanup for scanned-book corpora before they are indexed as evidence.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::normalize::normalize_newlines;

/// Publisher boilerplate that marks running headers and footers.
pub const DEFAULT_HEADER_KEYWORDS: &[&str] = &[
    "Cambridge University Press",
    "Cambridge Histories Online",
    "https",
    "GDZ",
    "RGASPI",
];

/// A line ending in one of these closes its sentence and is never joined.
const LINE_ENDINGS: &[char] = &['.', '?', '!', '"', ':', ';'];

static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+|[ivxlcdm]+)\s*$").unwrap());
static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

#[derive(Debug, Clone)]
pub struct CorpusCleaner {
    pub header_keywords: Vec<String>,
    /// Paragraphs must be strictly longer than this many chars to survive.
    pub min_paragraph_chars: usize,
}

impl Default for CorpusCleaner {
    fn default() -> Self {
        Self {
            header_keywords: DEFAULT_HEADER_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            min_paragraph_chars: 40,
        }
    }
}

impl CorpusCleaner {
    fn is_header(&self, line: &str) -> bool {
        self.header_keywords.iter().any(|k| line.contains(k.as_str()))
    }

    /// Drop boilerplate lines and lines that hold only a page number.
    pub fn strip_headers_footers(&self, text: &str) -> String {
        text.lines()
            .filter(|line| !self.is_header(line))
            .filter(|line| !PAGE_NUMBER.is_match(&line.trim().to_lowercase()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clean_and_paragraphize(&self, text: &str) -> Vec<String> {
        let text = normalize_newlines(text);
        let text = self.strip_headers_footers(&text);
        let text = join_broken_lines(&text);
        let text = collapse_whitespace(&text);
        let paragraphs = split_paragraphs(&text, self.min_paragraph_chars);
        debug!(paragraphs = paragraphs.len(), "corpus cleaned");
        paragraphs
    }
}

/// Re-join a line broken mid-sentence with the lowercase line that follows it.
pub fn join_broken_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0usize;
    while i < lines.len() {
        let mut line = lines[i].to_string();
        if let Some(next) = lines.get(i + 1) {
            let next_starts_lower = next.chars().next().map(char::is_lowercase).unwrap_or(false);
            if !line.is_empty() && !line.ends_with(LINE_ENDINGS) && next_starts_lower {
                line.push(' ');
                line.push_str(next.trim_start());
                i += 1;
            }
        }
        out.push(line);
        i += 1;
    }
    out.join("\n")
}

pub fn collapse_whitespace(text: &str) -> String {
    HORIZONTAL_WS.replace_all(text, " ").into_owned()
}

pub fn split_paragraphs(text: &str, min_chars: usize) -> Vec<String> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| p.chars().count() > min_chars)
        .map(str::to_string)
        .collect()
}

pub fn clean_and_paragraphize(text: &str) -> Vec<String> {
    CorpusCleaner::default().clean_and_paragraphize(text)
}
