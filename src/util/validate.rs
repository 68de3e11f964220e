//! Input validation for ids, tokens, URLs and free text.
use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+:[A-Za-z0-9_-]{35}$").expect("static token regex"));

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)*[a-z0-9]([a-z0-9-]*[a-z0-9])?(:\d+)?(/[^\s]*)?$")
        .expect("static url regex")
});

pub fn is_valid_user_id(id: i64) -> bool {
    id > 0
}

/// Group and channel ids are negative; only zero is invalid.
pub fn is_valid_chat_id(id: i64) -> bool {
    id != 0
}

pub fn is_valid_token(token: &str) -> bool {
    token.len() >= 46 && TOKEN_RE.is_match(token)
}

pub fn is_valid_url(url: &str) -> bool {
    URL_RE.is_match(url)
}

/// Drops control characters (newlines and tabs survive), truncates to `max`
/// characters and trims surrounding whitespace.
pub fn sanitize_text(text: &str, max: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .take(max)
        .collect();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "1234567890:ABCdefGHIjklMNOpqrSTUvwxYZ0123456_-";

    #[test]
    fn ids() {
        assert!(is_valid_user_id(1));
        assert!(!is_valid_user_id(0));
        assert!(!is_valid_user_id(-5));
        assert!(is_valid_chat_id(-100123));
        assert!(!is_valid_chat_id(0));
    }

    #[test]
    fn tokens() {
        assert_eq!(TOKEN.split(':').nth(1).unwrap().len(), 35);
        assert!(is_valid_token(TOKEN));
        assert!(!is_valid_token("123:short"));
        assert!(!is_valid_token("abc:ABCdefGHIjklMNOpqrSTUvwxYZ0123456_-"));
    }

    #[test]
    fn urls() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://bot.example.com:8443/webhook?x=1"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_text("  hi\u{0007} there\n ", 100), "hi there");
        assert_eq!(sanitize_text("abcdef", 3), "abc");
    }
}
