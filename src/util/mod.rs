//! Stateless helpers: Markdown formatting, input validation, file names and
//! command parsing.

pub mod files;
pub mod format;
pub mod validate;

/// Splits `/cmd@bot a b` into `("cmd", ["a", "b"])`. The command is
/// lower-cased and stripped of the slash and any `@botname` suffix; text that
/// is not a command yields an empty command.
pub fn parse_command_args(text: &str) -> (String, Vec<String>) {
    let mut parts = text.split_whitespace();
    let Some(head) = parts.next().and_then(|h| h.strip_prefix('/')) else {
        return (String::new(), Vec::new());
    };
    let command = head.split('@').next().unwrap_or_default().to_lowercase();
    (command, parts.map(str::to_string).collect())
}
