//! Input normalization
//!
//! Turns raw client text into the canonical context: every line trimmed of
//! whitespace (including the full-width ideographic space), rejoined with line
//! breaks, and prefixed with a single leading line break.

/// Full-width blank commonly used for paragraph indentation
pub const IDEOGRAPHIC_SPACE: char = '\u{3000}';

const LINE_BREAK: char = '\n';

fn is_blank(c: char) -> bool {
    c.is_whitespace() || c == IDEOGRAPHIC_SPACE
}

/// Canonicalize a request text. Never fails; empty input yields `"\n"`.
pub fn normalize(text: &str) -> String {
    let body = text
        .trim_matches(is_blank)
        .split(LINE_BREAK)
        .map(|line| line.trim_matches(is_blank))
        .collect::<Vec<_>>()
        .join("\n");

    let mut context = String::with_capacity(body.len() + 1);
    context.push(LINE_BREAK);
    context.push_str(body.trim_matches(is_blank));
    context
}
