pub fn escape_xml(input: &str) -> String {
    let mut escaped = String::new();
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// The credential carried by an `Authorization` header value, with any
/// `Bearer ` prefix removed. Blank values yield `None`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let trimmed = header.trim_start();
    let token = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => &trimmed[7..],
        _ => trimmed,
    }
    .trim();
    (!token.is_empty()).then_some(token)
}
