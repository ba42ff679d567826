//! Structured-data extraction from raw LM completions.
//!
//! Models sometimes answer with bare JSON, sometimes with a fenced block
//! surrounded by prose, and sometimes with prose alone. Extraction never
//! fails: output that cannot be read as a mapping or sequence comes back as
//! [`Extracted::Unparsed`] so callers decide whether losing it matters.
use serde_json::{Map, Value};

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Outcome of reading structured data out of a completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// A mapping or sequence was recovered.
    Parsed(Value),
    /// Nothing structured was found; carries the original text.
    Unparsed(String),
}

impl Extracted {
    #[cfg(test)]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    /// Parsed value, or an empty mapping when nothing could be read.
    pub fn into_value(self) -> Value {
        match self {
            Self::Parsed(value) => value,
            Self::Unparsed(_) => Value::Object(Map::new()),
        }
    }

    #[cfg(test)]
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Parsed(_) => None,
            Self::Unparsed(text) => Some(text),
        }
    }
}

/// Read a mapping or sequence out of an LM completion.
///
/// A ```` ```json ```` block wins over any other fence; otherwise the first
/// fenced block is used; otherwise the whole text. When the candidate does
/// not parse, the untouched input is tried once more before giving up.
pub fn extract_structured(text: &str) -> Extracted {
    let candidate = json_candidate(text);
    if let Some(value) = parse_structured(candidate) {
        return Extracted::Parsed(value);
    }
    if let Some(value) = parse_structured(text) {
        return Extracted::Parsed(value);
    }
    Extracted::Unparsed(text.to_string())
}

/// Body of the first fenced block regardless of its label.
///
/// Used for generated source files, where the label is a language name and
/// the payload is not JSON.
pub fn fenced_body(text: &str) -> Option<&str> {
    let start = text.find(FENCE)? + FENCE.len();
    let start = skip_fence_label(text, start);
    let rest = &text[start..];
    let end = rest.find(FENCE).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn json_candidate(text: &str) -> &str {
    if let Some(start) = text.find(JSON_FENCE) {
        let rest = &text[start + JSON_FENCE.len()..];
        let end = rest.find(FENCE).unwrap_or(rest.len());
        return &rest[..end];
    }
    if let Some(body) = fenced_body(text) {
        return body;
    }
    text
}

/// Skip a label such as `python` or `JSON` directly after an opening fence.
fn skip_fence_label(text: &str, start: usize) -> usize {
    let rest = &text[start..];
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let label = &rest[..line_end];
    let is_label = !label.trim().is_empty()
        && label
            .trim()
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '+'));
    if is_label {
        start + line_end
    } else {
        start
    }
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_fence_ignores_surrounding_prose() {
        let text = "Here is the requirement:\n```json\n{\"req_id\": \"REQ-1\"}\n```\nLet me know.";
        assert_eq!(
            extract_structured(text),
            Extracted::Parsed(json!({"req_id": "REQ-1"}))
        );
    }

    #[test]
    fn json_fence_wins_over_earlier_plain_fence() {
        let text = "```\nnot json\n```\n```json\n[1, 2]\n```";
        assert_eq!(extract_structured(text), Extracted::Parsed(json!([1, 2])));
    }

    #[test]
    fn plain_fence_with_language_label() {
        let text = "```JSON\n{\"intent\": \"general\"}\n```";
        assert_eq!(
            extract_structured(text),
            Extracted::Parsed(json!({"intent": "general"}))
        );
    }

    #[test]
    fn plain_fence_on_one_line() {
        let text = "```{\"intent\": \"requirement\"}```";
        assert_eq!(
            extract_structured(text),
            Extracted::Parsed(json!({"intent": "requirement"}))
        );
    }

    #[test]
    fn only_first_fenced_block_is_honored() {
        let text = "```json\n{\"a\": 1}\n```\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_structured(text), Extracted::Parsed(json!({"a": 1})));
    }

    #[test]
    fn bare_json_is_returned_unchanged() {
        let text = r#"[{"test_case_id": "TC-1"}, {"test_case_id": "TC-2"}]"#;
        let expected: Value = serde_json::from_str(text).unwrap();
        assert_eq!(extract_structured(text), Extracted::Parsed(expected));
    }

    #[test]
    fn unclosed_fence_reads_to_end() {
        let text = "```json\n{\"req_id\": \"REQ-9\"}";
        assert_eq!(
            extract_structured(text),
            Extracted::Parsed(json!({"req_id": "REQ-9"}))
        );
    }

    #[test]
    fn prose_degrades_to_empty_mapping() {
        let text = "I cannot help with that request.";
        let extracted = extract_structured(text);
        assert_eq!(extracted.raw_text(), Some(text));
        assert_eq!(extracted.into_value(), json!({}));
    }

    #[test]
    fn scalars_are_not_structured() {
        assert!(!extract_structured("42").is_parsed());
        assert!(!extract_structured("\"text\"").is_parsed());
    }

    #[test]
    fn provider_error_text_degrades() {
        let text = "Error: {\"error\": {\"code\": 429}";
        assert_eq!(extract_structured(text).into_value(), json!({}));
    }

    #[test]
    fn malformed_inputs_never_panic() {
        for text in ["", "```", "``````", "```json", "```json```", "{", "\u{1F600}```\u{e9}"] {
            let _ = extract_structured(text);
        }
    }

    #[test]
    fn fenced_body_strips_language_label() {
        let text = "```python\nimport pytest\n```\n\n**Explanation:** ...";
        assert_eq!(fenced_body(text), Some("\nimport pytest\n"));
        assert_eq!(fenced_body("def test_x(): pass"), None);
    }
}
