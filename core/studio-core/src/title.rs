//! Calendar title parsing.
//!
//! Titles encode `"<clientName> – <sessionType>"`. The separator may be an
//! en dash or a hyphen. Spaced separators win over bare ones so hyphenated
//! names such as "Mary-Jane - Duo" keep their hyphen.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};

static SPACED_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>.+?)\s+[–-]\s*(?P<kind>.*)$").expect("valid title regex")
});
static BARE_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[^–-]+?)\s*[–-]\s*(?P<kind>.*)$").expect("valid title regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub client_name: String,
    pub session_type: String,
    /// False when no separator was found or the name part is empty.
    pub ok: bool,
}

/// Lenient parse: never fails. A title without a separator becomes the
/// client name with an empty session type.
pub fn parse_title(raw: &str) -> ParsedTitle {
    let trimmed = raw.trim();

    let captures = SPACED_SEPARATOR
        .captures(trimmed)
        .or_else(|| BARE_SEPARATOR.captures(trimmed));

    match captures {
        Some(caps) => {
            let client_name = caps["name"].trim().to_string();
            let session_type = caps["kind"].trim().to_string();
            let ok = !client_name.is_empty();
            ParsedTitle {
                client_name,
                session_type,
                ok,
            }
        }
        None => ParsedTitle {
            client_name: trimmed.to_string(),
            session_type: String::new(),
            ok: false,
        },
    }
}

/// Strict parse for callers that need both parts.
pub fn parse_title_strict(raw: &str) -> Result<ParsedTitle> {
    let parsed = parse_title(raw);
    if parsed.ok {
        Ok(parsed)
    } else {
        Err(EngineError::MalformedTitle(raw.to_string()))
    }
}
