//! Message body and attachment normalization.

use domains::{AppError, Result};

/// Longest attachment reference accepted.
pub const MAX_ATTACHMENT_REF_CHARS: usize = 512;

/// Strips markup, trims, and truncates to `max_chars` characters of text.
/// Whatever survives stripping is HTML-escaped, so fragments that only line
/// up into a tag after stripping stay inert. Returns `None` when nothing but
/// whitespace remains.
pub fn sanitize_body(raw: &str, max_chars: usize) -> Option<String> {
    let stripped = strip_markup(raw);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    let truncated: String = trimmed.chars().take(max_chars).collect();
    Some(html_escape::encode_text(truncated.trim_end()).into_owned())
}

/// Normalizes an optional attachment reference.
pub fn normalize_attachment(raw: Option<&str>) -> Result<Option<String>> {
    let Some(trimmed) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_ATTACHMENT_REF_CHARS {
        return Err(AppError::ValidationError(format!(
            "attachment reference exceeds {MAX_ATTACHMENT_REF_CHARS} characters"
        )));
    }
    Ok(Some(trimmed.to_owned()))
}

/// Removes tags and comments. Content of `<script>` and `<style>` elements is
/// dropped entirely. A `<` that does not open a tag is kept as text.
fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if !opens_tag(tail) {
            out.push('<');
            rest = &tail[1..];
            continue;
        }

        if let Some(body) = tail.strip_prefix("<!--") {
            rest = body.find("-->").map_or("", |end| &body[end + 3..]);
            continue;
        }

        let Some(end) = tail.find('>') else {
            // Unterminated tag: drop the remainder.
            rest = "";
            break;
        };
        let name = tag_name(&tail[1..end]);
        rest = &tail[end + 1..];

        if name == "script" || name == "style" {
            let closing = format!("</{name}");
            rest = match rest.to_ascii_lowercase().find(&closing) {
                Some(pos) => {
                    let after = &rest[pos..];
                    after.find('>').map_or("", |gt| &after[gt + 1..])
                }
                None => "",
            };
        }
    }

    out.push_str(rest);
    out
}

fn opens_tag(tail: &str) -> bool {
    tail[1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!' || c == '?')
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}
