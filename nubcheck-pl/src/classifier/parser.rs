//! Classifier reply parser
//!
//! The upstream model is asked for three lines (verdict, confidence,
//! explanation) but answers in free text. Parsing never fails: anything it
//! cannot make sense of becomes a low-confidence UNCLEAR verdict, which is
//! always routed to a human.

use nubcheck_common::Verdict;

pub const NO_EXPLANATION: &str = "No explanation provided";

/// Structured classifier verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Clamped to [0, 100]
    pub confidence: f64,
    pub explanation: String,
}

/// Parse a raw classifier reply
///
/// - first non-empty line: verdict token, case-insensitive; markdown or
///   punctuation around the word is ignored; anything else is UNCLEAR
/// - second non-empty line: confidence; a trailing `%` is accepted;
///   unparsable is 0
/// - remaining lines joined with spaces; empty is a placeholder
pub fn parse_reply(text: &str) -> Classification {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    let verdict = lines
        .next()
        .map(|line| line.trim_matches(|c: char| !c.is_ascii_alphabetic()))
        .and_then(|token| token.parse::<Verdict>().ok())
        .unwrap_or(Verdict::Unclear);

    let confidence = lines.next().map(parse_confidence).unwrap_or(0.0);

    let explanation = lines.collect::<Vec<_>>().join(" ");
    let explanation = if explanation.is_empty() {
        NO_EXPLANATION.to_string()
    } else {
        explanation
    };

    Classification {
        verdict,
        confidence,
        explanation,
    }
}

fn parse_confidence(line: &str) -> f64 {
    let cleaned = line
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == ':' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '%' || c == '.' || c.is_whitespace());
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => value.clamp(0.0, 100.0),
        _ => 0.0,
    }
}
