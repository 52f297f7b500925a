//! Small text and time helpers

use regex::Regex;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Trim regular and non-breaking spaces from both ends
pub fn trim_text(text: &str) -> &str {
    text.trim_matches(|c| c == ' ' || c == '\u{a0}')
}

/// Remove newlines, collapse whitespace runs to one space, then trim
pub fn normalize_text(text: &str) -> String {
    let without_newlines = text.replace("\r\n", "").replace('\n', "");
    let collapsed = WHITESPACE_RUN.replace_all(&without_newlines, " ");
    trim_text(&collapsed).to_string()
}

/// Seconds since the epoch, used to name exported files
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
