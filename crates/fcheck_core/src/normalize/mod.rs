/// Canonical form used for both retrieval queries and NER input: lowercase,
/// with every character that is neither alphanumeric nor whitespace removed.
pub fn normalize_for_retrieval(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Unify line endings to `\n`.
pub fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_lowercases() {
        assert_eq!(
            normalize_for_retrieval("Napoleon died in 1821, on St. Helena!"),
            "napoleon died in 1821 on st helena"
        );
        assert_eq!(normalize_for_retrieval("Élan—vital"), "élanvital");
    }

    #[test]
    fn newlines_are_unified() {
        assert_eq!(normalize_newlines("a\r\nb\rc"), "a\nb\nc");
    }
}
