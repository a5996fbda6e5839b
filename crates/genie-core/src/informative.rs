//! Failure markers and the informativeness check for research text.
//!
//! Two different questions are answered here:
//! - did a single page extraction succeed? ([`extraction_succeeded`])
//! - is a summary good enough to be shown as a research panel? ([`is_informative`])

use crate::Extraction;

/// Markers written by the Page Extractor when fetching or extracting failed.
pub const FAILURE_MARKERS: [&str; 3] = [
    "error fetching",
    "could not be found",
    "error during extraction",
];

/// Phrases that indicate a summary only reports that nothing useful was found.
pub const FAILURE_PHRASES: [&str; 12] = [
    "could not find relevant information",
    "could not find any",
    "failed to access web sources",
    "summarization failed",
    "unable to retrieve",
    "could not be retrieved",
    "could not identify specific authoritative urls",
    "could not extract usable information",
    "no successful extractions",
    "an unexpected critical error occurred",
    "did not produce a usable summary",
    "did not yield a clear, concise summary",
];

/// A failure phrase anywhere in a text shorter than this marks the whole text as a
/// failure message.
pub const SHORT_FAILURE_MESSAGE_CHARS: usize = 200;

fn contains_any(haystack_lc: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack_lc.contains(n))
}

/// True iff the extraction text is non-empty and carries none of [`FAILURE_MARKERS`].
pub fn extraction_succeeded(e: &Extraction) -> bool {
    let t = e.text.trim();
    !t.is_empty() && !contains_any(&t.to_lowercase(), &FAILURE_MARKERS)
}

/// Synthesis output that is empty or has no letters/digits at all.
pub fn is_degenerate_summary(s: &str) -> bool {
    !s.chars().any(char::is_alphanumeric)
}

fn leading_sentence(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

/// Whether `summary` may be surfaced as structured research context.
///
/// Ambiguous text is treated as not informative: the text must reach `min_chars`, must
/// not open with a failure statement, and must not be a short message that mentions a
/// failure anywhere.
pub fn is_informative(summary: &str, min_chars: usize) -> bool {
    let t = summary.trim();
    if t.is_empty() || t.chars().count() < min_chars || is_degenerate_summary(t) {
        return false;
    }
    let lc = t.to_lowercase();
    if contains_any(leading_sentence(&lc), &FAILURE_PHRASES)
        || contains_any(leading_sentence(&lc), &FAILURE_MARKERS)
    {
        return false;
    }
    if contains_any(&lc, &FAILURE_PHRASES) && t.chars().count() < SHORT_FAILURE_MESSAGE_CHARS {
        return false;
    }
    true
}
