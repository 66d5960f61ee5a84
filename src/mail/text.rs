//! Plain-text helpers for message bodies.

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after them
/// - "--- Original Message ---" separators and everything after them
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic), normalising whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate text to at most `max` bytes on a char boundary, noting how much was cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n... [truncated {} bytes]", &s[..end], s.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── strip_quoted_text ───────────────────────────────────────────

    #[test]
    fn strip_basic_quoted_lines() {
        let body = "read [a.txt]\n\n> Previous reply\n> more\nthanks";
        assert_eq!(strip_quoted_text(body), "read [a.txt]\n\nthanks");
    }

    #[test]
    fn strip_on_wrote_attribution() {
        let body = "shell ls\n\nOn Mon, Jan 1, 2026 at 10:00 AM Emalia <e@ex.com> wrote:\n> SHELL: Completed";
        assert_eq!(strip_quoted_text(body), "shell ls");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "help\n\n--- Original Message ---\nold [stuff";
        assert_eq!(strip_quoted_text(body), "help");
    }

    #[test]
    fn strip_keeps_unquoted_body() {
        let body = "gpt <model:gpt-4>\nline two";
        assert_eq!(strip_quoted_text(body), body);
    }

    // ── strip_html ──────────────────────────────────────────────────

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>read</b> [a.txt]</div>"),
            "read [a.txt]"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  help   me  </p>"), "help me");
    }

    // ── truncate ────────────────────────────────────────────────────

    #[test]
    fn truncate_short_is_unchanged() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let out = truncate("café au lait", 4);
        assert!(out.starts_with("caf\n"));
        assert!(out.contains("[truncated"));
    }
}
