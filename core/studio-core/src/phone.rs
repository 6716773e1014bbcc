//! Phone and name normalization shared by the directory and inbound handling.

const COUNTRY_PREFIX: &str = "27";

/// Normalize a phone number to a digits-only, E.164-compatible string.
///
/// Strips `+`, spaces, dashes and parentheses; a leading trunk `0` becomes
/// the country prefix. Returns `None` if anything other than digits remains.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect();

    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    match stripped.strip_prefix('0') {
        Some(rest) => Some(format!("{}{}", COUNTRY_PREFIX, rest)),
        None => Some(stripped),
    }
}

/// Directory key for a client name: trimmed and lowercased.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}
