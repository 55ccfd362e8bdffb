pub mod http;

/// Cut `s` to at most `max_chars` characters, ending in `…` when anything
/// was dropped. Counts characters, not bytes.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.char_indices().nth(max_chars).is_none() {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}…", &s[..end])
}
