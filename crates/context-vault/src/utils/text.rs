//! Text helpers shared by the extractor and summarizer.

use std::borrow::Cow;

/// Marker appended when a message is cut to fit the model context.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Cap `text` at `max_chars` characters, appending the truncation marker.
///
/// Counts characters, not bytes, so multi-byte content never splits a
/// code point.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> Cow<'_, str> {
    if text.chars().count() <= max_chars {
        return Cow::Borrowed(text);
    }
    let cut: String = text.chars().take(max_chars).collect();
    Cow::Owned(format!("{}{}", cut, TRUNCATION_MARKER))
}

/// First `max_chars` characters of `text`, no marker.
///
/// Used for summary excerpts and the extractive fallback fields.
pub fn excerpt(text: &str, max_chars: usize) -> Cow<'_, str> {
    if text.chars().count() <= max_chars {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().take(max_chars).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        let text = "short message";
        assert_eq!(truncate_with_marker(text, 500), text);
    }

    #[test]
    fn test_truncate_exact_boundary_unchanged() {
        let text = "a".repeat(500);
        assert_eq!(truncate_with_marker(&text, 500), text);
    }

    #[test]
    fn test_truncate_long_text_gets_marker() {
        let text = "a".repeat(501);
        let out = truncate_with_marker(&text, 500);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 500 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let text = "é".repeat(600);
        let out = truncate_with_marker(&text, 500);
        assert!(out.starts_with("é"));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_excerpt_caps_length() {
        let text = "x".repeat(300);
        assert_eq!(excerpt(&text, 200).chars().count(), 200);
        assert_eq!(excerpt("tiny", 200), "tiny");
    }
}
