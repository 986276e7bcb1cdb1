//! Reviser-to-critic side notes embedded in drafts as `<FEEDBACK>...</FEEDBACK>`.

use once_cell::sync::Lazy;
use regex::Regex;

pub const FEEDBACK_OPEN: &str = "<FEEDBACK>";
pub const FEEDBACK_CLOSE: &str = "</FEEDBACK>";

static FEEDBACK_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<FEEDBACK>(.*?)</FEEDBACK>").expect("invalid feedback regex"));

/// Remove every feedback span, tags included.
pub fn strip_feedback(text: &str) -> String {
    FEEDBACK_SPAN.replace_all(text, "").into_owned()
}

/// Trimmed, non-empty contents of every feedback span in order of appearance.
pub fn extract_feedback(text: &str) -> Vec<String> {
    FEEDBACK_SPAN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|inner| inner.as_str().trim().to_string())
        .filter(|note| !note.is_empty())
        .collect()
}
