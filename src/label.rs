//! Auto-derived node labels.

/// Labels longer than this are truncated at a word boundary.
pub const MAX_AUTOLABEL_CHARS: usize = 32;

/// Suffix marking a truncated label. A label ending in it has stopped
/// growing during streaming.
pub const TRUNCATION_SUFFIX: &str = " ...";

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '\'' | '?' | '!' | '-') || c.is_whitespace()
}

fn remove_invalid_chars(text: &str) -> String {
    text.replace('\n', " ").chars().filter(|&c| is_label_char(c)).collect()
}

/// Derive a short display label from node text.
pub fn format_auto_label(text: &str) -> String {
    let cleaned = remove_invalid_chars(text);

    if cleaned.chars().count() <= MAX_AUTOLABEL_CHARS {
        return cleaned;
    }

    let head: String = cleaned.chars().take(MAX_AUTOLABEL_CHARS).collect();
    let mut words: Vec<&str> = head.split(' ').collect();
    words.pop();
    format!("{}{}", words.join(" "), TRUNCATION_SUFFIX)
}
