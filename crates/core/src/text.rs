//! Small string helpers shared across crates.

/// Marker appended to text cut by [`truncate_marked`].
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// The first `max_chars` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// `s` cut to `max_chars` characters with [`TRUNCATION_MARKER`] appended
/// when anything was removed.
pub fn truncate_marked(s: &str, max_chars: usize) -> String {
    let head = truncate_chars(s, max_chars);
    if head.len() == s.len() {
        s.to_string()
    } else {
        format!("{head}{TRUNCATION_MARKER}")
    }
}
