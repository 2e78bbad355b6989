//! Picks candidate gift codes out of chat messages.

use regex::Regex;
use std::sync::OnceLock;

use crate::common::messages::clean_code;

fn code_label() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)Code:\s*(\S+)").ok())
        .as_ref()
}

/// Extract the candidate code from a message, if it carries one.
///
/// A message qualifies when its whole content is a single alphanumeric token,
/// or when it contains `Code: <token>` (case-insensitive).
///
/// # Example
/// ```ignore
/// assert_eq!(extract_code("SPRING24"), Some("SPRING24".to_string()));
/// assert_eq!(extract_code("new one! code: WINTER"), Some("WINTER".to_string()));
/// ```
pub fn extract_code(message: &str) -> Option<String> {
    let content = message.trim();
    if content.is_empty() {
        return None;
    }

    let mut tokens = content.split_whitespace();
    let candidate = match (tokens.next(), tokens.next()) {
        (Some(only), None) => {
            let token = clean_code(only);
            (!token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric())).then_some(token)
        }
        _ => code_label()
            .and_then(|re| re.captures(content))
            .and_then(|caps| caps.get(1))
            .map(|m| clean_code(m.as_str())),
    }?;

    (!candidate.is_empty()).then_some(candidate)
}
