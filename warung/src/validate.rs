//! Response quality validation for LLM outputs.
//!
//! Catches empty, whitespace-only, truncated-short and refusal-shaped
//! responses before they reach a customer. Only the transient classes are
//! worth a retry; refusal patterns will not change on a second attempt.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_MIN_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseQuality {
    Valid,
    Empty,
    WhitespaceOnly,
    TooShort,
    ErrorIndicator,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub quality: ResponseQuality,
    pub reason: Option<String>,
}

impl ValidationResult {
    fn invalid(quality: ResponseQuality, reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            quality,
            reason: Some(reason.into()),
        }
    }
}

/// Patterns that mark an error or refusal-shaped response. Matched against
/// the lowercased, trimmed text, anchored at the start.
static ERROR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Explicit error prefixes
        r"^error:",
        r"^\[error\]",
        r"^exception:",
        // Refusal patterns
        r"^sorry,?\s+i (can't|cannot|am unable)",
        r"^i apologize,?\s+(but\s+)?i",
        r"^i('m| am) sorry,?\s+(but\s+)?(i|unable)",
        // AI self-identification that often precedes refusals
        r"^as an ai",
        r"^as a language model",
        r"^i am (an|a) ai",
        // Incomplete response indicators
        r"^\.\.\.$",
        r"^\[truncated\]",
        r"^\[content (removed|blocked)\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Validate an LLM response for quality.
pub fn validate_response(response: Option<&str>, min_length: usize) -> ValidationResult {
    let response = match response {
        None => return ValidationResult::invalid(ResponseQuality::Empty, "response is none"),
        Some(r) => r,
    };

    if response.is_empty() {
        return ValidationResult::invalid(ResponseQuality::Empty, "response is empty string");
    }

    let stripped = response.trim();
    if stripped.is_empty() {
        return ValidationResult::invalid(
            ResponseQuality::WhitespaceOnly,
            "response contains only whitespace",
        );
    }

    if stripped.chars().count() < min_length {
        return ValidationResult::invalid(
            ResponseQuality::TooShort,
            format!(
                "response too short: {} chars (min: {min_length})",
                stripped.chars().count()
            ),
        );
    }

    let lower = stripped.to_lowercase();
    for pattern in ERROR_PATTERNS.iter() {
        if pattern.is_match(&lower) {
            return ValidationResult::invalid(
                ResponseQuality::ErrorIndicator,
                format!("response matches error pattern: {pattern}"),
            );
        }
    }

    ValidationResult {
        is_valid: true,
        quality: ResponseQuality::Valid,
        reason: None,
    }
}

/// Whether a validation failure might succeed on retry. Empty, whitespace
/// and too-short responses can be transient; refusals are not.
pub fn is_retryable_failure(validation: &ValidationResult) -> bool {
    if validation.is_valid {
        return false;
    }
    matches!(
        validation.quality,
        ResponseQuality::Empty | ResponseQuality::WhitespaceOnly | ResponseQuality::TooShort
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_and_empty_are_empty() {
        assert_eq!(
            validate_response(None, DEFAULT_MIN_LENGTH).quality,
            ResponseQuality::Empty
        );
        assert_eq!(
            validate_response(Some(""), DEFAULT_MIN_LENGTH).quality,
            ResponseQuality::Empty
        );
    }

    #[test]
    fn whitespace_only() {
        let v = validate_response(Some("   \n\t  "), DEFAULT_MIN_LENGTH);
        assert_eq!(v.quality, ResponseQuality::WhitespaceOnly);
        assert!(!v.is_valid);
    }

    #[test]
    fn too_short() {
        let v = validate_response(Some("ok"), DEFAULT_MIN_LENGTH);
        assert_eq!(v.quality, ResponseQuality::TooShort);
        assert!(v.reason.as_deref().unwrap().contains("min: 10"));
    }

    #[test]
    fn refusal_patterns_flagged() {
        for text in [
            "Error: upstream failed hard",
            "Sorry, I can't help with that request",
            "sorry I cannot process this one today",
            "As an AI, I do not have opinions on this",
            "[truncated] the rest of the answer",
            "I apologize, but I cannot continue with this",
        ] {
            let v = validate_response(Some(text), DEFAULT_MIN_LENGTH);
            assert_eq!(v.quality, ResponseQuality::ErrorIndicator, "text: {text}");
        }
    }

    #[test]
    fn normal_response_is_valid() {
        let v = validate_response(
            Some("Berikut daftar produk kami yang tersedia hari ini."),
            DEFAULT_MIN_LENGTH,
        );
        assert!(v.is_valid);
        assert_eq!(v.quality, ResponseQuality::Valid);
        assert_eq!(v.reason, None);
    }

    /// **Scenario**: "sorry" mid-sentence is fine; only refusal openings match.
    #[test]
    fn refusal_patterns_are_anchored() {
        let v = validate_response(
            Some("We are sorry, I mean the order shipped late."),
            DEFAULT_MIN_LENGTH,
        );
        assert!(v.is_valid);
    }

    /// **Scenario**: validating an already-valid response is a fixpoint.
    #[test]
    fn validation_idempotent_on_valid_input() {
        let text = "Pesanan kamu sudah kami konfirmasi, ditunggu ya.";
        let first = validate_response(Some(text), DEFAULT_MIN_LENGTH);
        assert!(first.is_valid);
        let second = validate_response(Some(text), DEFAULT_MIN_LENGTH);
        assert_eq!(first, second);
    }

    #[test]
    fn retryability() {
        let empty = validate_response(Some(""), DEFAULT_MIN_LENGTH);
        let short = validate_response(Some("hi"), DEFAULT_MIN_LENGTH);
        let refusal = validate_response(Some("As an AI, I cannot answer."), DEFAULT_MIN_LENGTH);
        let valid = validate_response(Some("A perfectly fine answer."), DEFAULT_MIN_LENGTH);
        assert!(is_retryable_failure(&empty));
        assert!(is_retryable_failure(&short));
        assert!(!is_retryable_failure(&refusal));
        assert!(!is_retryable_failure(&valid));
    }
}
