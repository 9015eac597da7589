//! Terminal and JSON rendering of command results.

use fcheck_ai::vector::IngestReport;
use fcheck_core::domain::SuggestionResponse;
use serde::Serialize;

use crate::commands::EvaluationSummary;

pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialise output: {e}\"}}"))
}

pub fn format_suggestions(text: &str, suggestions: &[SuggestionResponse]) -> String {
    if suggestions.is_empty() {
        return "No contradicted claims found.".to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = format!("{} contradicted claim(s):\n", suggestions.len());
    for (i, s) in suggestions.iter().enumerate() {
        let p = &s.position;
        out.push_str(&format!("\n{}. {}\n", i + 1, s.fact));
        if p.in_original && p.start_char_index <= p.end_char_index && p.end_char_index <= chars.len() {
            let located: String = chars[p.start_char_index..p.end_char_index].iter().collect();
            if located != s.fact {
                out.push_str(&format!("   written as: {located}\n"));
            }
        }
        out.push_str(&format!("   chars {}..{}\n", p.start_char_index, p.end_char_index));
        if !s.explanation.is_empty() {
            out.push_str(&format!("   {}\n", s.explanation.replace('\n', "\n   ")));
        }
    }
    out
}

pub fn format_ingest(report: &IngestReport) -> String {
    format!(
        "Indexed {} paragraph(s) from {} as ids {}..{}",
        report.paragraphs, report.source, report.first_id, report.next_id
    )
}

pub fn format_evaluation(summary: &EvaluationSummary) -> String {
    format!(
        "Evaluated {} paragraph(s)\n\nParagraph level\n{}\nSentence level\n{}\nSuggestion level\n  precision {:.3}  recall {:.3}  f1 {:.3}\n",
        summary.paragraphs,
        summary.paragraph_report,
        summary.sentence_report,
        summary.suggestions.precision,
        summary.suggestions.recall,
        summary.suggestions.f1,
    )
}
