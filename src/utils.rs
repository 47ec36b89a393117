use chrono::Local;

/// Today's date in the `YYYY-MM-DD` form stored in the ledger.
pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

pub(crate) fn now_minutes() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Cuts `s` to at most `cap` characters without splitting a code point.
pub(crate) fn truncate_chars(s: &str, cap: usize) -> String {
    match s.char_indices().nth(cap) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}
