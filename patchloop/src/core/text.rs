//! Small text helpers shared by decoders and nodes.

/// Keep at most `max_chars` characters (never splits a UTF-8 code point).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Remove markdown fence lines from generated code and trim the result.
pub fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Return the body of the first ```json fence, else the first ``` fence, else the input.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(body) = fenced_body(text, "```json") {
        return body;
    }
    if let Some(body) = fenced_body(text, "```") {
        return body;
    }
    text.trim()
}

fn fenced_body<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)? + opener.len();
    let rest = &text[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn strip_fences_drops_fence_lines_only() {
        let raw = "```python\ndef ok():\n    return 1\n```\n";
        assert_eq!(strip_code_fences(raw), "def ok():\n    return 1");
    }

    #[test]
    fn extract_prefers_json_fence() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing";
        assert_eq!(extract_json_block(raw), "{\"a\": 1}");
    }

    #[test]
    fn extract_falls_back_to_plain_fence_then_raw() {
        assert_eq!(extract_json_block("```\n[1]\n```"), "[1]");
        assert_eq!(extract_json_block("  {\"b\": 2} "), "{\"b\": 2}");
    }
}
