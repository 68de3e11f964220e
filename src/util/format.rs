//! Markdown helpers for outgoing text.

const MARKDOWN_SPECIALS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub fn bold(text: &str) -> String {
    format!("*{text}*")
}

pub fn italic(text: &str) -> String {
    format!("_{text}_")
}

pub fn code(text: &str) -> String {
    format!("`{text}`")
}

pub fn pre(text: &str) -> String {
    format!("```{text}```")
}

pub fn link(text: &str, url: &str) -> String {
    format!("[{text}]({url})")
}

/// `@username` when known, otherwise an inline mention by id.
pub fn mention(user_id: i64, username: Option<&str>) -> String {
    match username {
        Some(name) if !name.is_empty() => format!("@{name}"),
        _ => format!("[user](tg://user?id={user_id})"),
    }
}

/// Escapes every MarkdownV2 special character with a backslash.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIALS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn format_list<S: AsRef<str>>(items: &[S], numbered: bool) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if numbered {
                format!("{}. {}", i + 1, item.as_ref())
            } else {
                format!("• {}", item.as_ref())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pipe-separated rows with a dashed rule under the header.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let header = headers.join(" | ");
    let rule = "-".repeat(header.chars().count());
    let mut lines = vec![header, rule];
    lines.extend(rows.iter().map(|row| row.join(" | ")));
    lines.join("\n")
}

/// Cuts `text` to at most `max` characters, ending with `suffix` when cut.
pub fn truncate_text(text: &str, max: usize, suffix: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let suffix_len = suffix.chars().count();
    if suffix_len >= max {
        return suffix.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - suffix_len).collect();
    out.push_str(suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_markup() {
        assert_eq!(bold("hi"), "*hi*");
        assert_eq!(italic("hi"), "_hi_");
        assert_eq!(code("x"), "`x`");
        assert_eq!(pre("fn main() {}"), "```fn main() {}```");
        assert_eq!(link("docs", "https://example.com"), "[docs](https://example.com)");
    }

    #[test]
    fn mentions_prefer_username() {
        assert_eq!(mention(7, Some("alice")), "@alice");
        assert_eq!(mention(7, None), "[user](tg://user?id=7)");
        assert_eq!(mention(7, Some("")), "[user](tg://user?id=7)");
    }

    #[test]
    fn escapes_specials() {
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
        assert_eq!(escape_markdown("1.5!"), "1\\.5\\!");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[test]
    fn lists_and_tables() {
        assert_eq!(format_list(&["a", "b"], false), "• a\n• b");
        assert_eq!(format_list(&["a", "b"], true), "1. a\n2. b");
        let table = format_table(&["Name", "Age"], &[vec!["Bob".into(), "30".into()]]);
        assert_eq!(table, "Name | Age\n----------\nBob | 30");
        assert_eq!(format_table(&[], &[]), "");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_text("short", 10, "..."), "short");
        assert_eq!(truncate_text("hello world", 8, "..."), "hello...");
        assert_eq!(truncate_text("привет мир", 7, "…"), "привет…");
    }

    #[test]
    fn truncate_never_exceeds_max() {
        assert_eq!(truncate_text("hello world", 2, "..."), "..");
        assert_eq!(truncate_text("hello world", 3, "..."), "...");
        assert_eq!(truncate_text("hello world", 0, "..."), "");
    }
}
