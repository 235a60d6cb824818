//! Response post-processing before delivery.

/// Shorten model output to at most `max_len` characters.
///
/// Prefers the last sentence boundary within the limit; failing that,
/// cuts at a word boundary and appends a truncation marker. Deterministic
/// and idempotent: shortening already-shortened text is a no-op.
pub fn shorten(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    if max_len == 0 {
        return String::new();
    }

    let window: String = trimmed.chars().take(max_len).collect();

    // Last sentence boundary inside the window wins.
    if let Some(idx) = window.rfind(['.', '!', '?']) {
        let end = idx + 1;
        if end > 1 {
            return window[..end].trim_end().to_string();
        }
    }

    // No sentence boundary: word boundary plus a marker. The marker
    // counts against the limit so the result stays within max_len.
    let reserved: String = window.chars().take(max_len - 1).collect();
    let cut = match reserved.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &reserved[..idx],
        _ => reserved.as_str(),
    };
    format!("{}…", cut.trim_end())
}
