//! JSON normalization, including recovery of the non-JSON payloads that
//! arrive under a JSON content type: form-encoded query strings and
//! `HEADER_* = value` request logs.

use std::collections::BTreeMap;
use tree::Tree;

/// Normalize decoded text that sniffed as JSON.
/// Returns `(data, parse_error)`; `data` is `None` only when every
/// recovery strategy failed, in which case the caller keeps a preview.
pub fn normalize(text: &str) -> (Option<Tree>, Option<String>) {
    let cleaned = strip_trailing_commas(text);
    let json_error = match serde_json::from_str::<Tree>(&cleaned) {
        Ok(data) => return (Some(data), None),
        Err(err) => err,
    };

    // The HEADER_ check runs before the form-encoded parse: a header dump
    // contains `=` on every line and the permissive form parser would
    // happily swallow it into one nonsense pair.
    if let Some(data) = parse_header_log(text) {
        return (Some(data), None);
    }
    if let Some(data) = parse_form_encoded(text) {
        return (Some(data), None);
    }

    (None, Some(format!("json_parse_error: {json_error}")))
}

/// Remove commas that directly precede a closing `}` or `]`, outside of
/// string literals. A character scanner rather than a regex, so commas
/// inside strings are never touched.
pub fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse `KEY = value` lines of a request log. Only attempted when some
/// line carries the `HEADER_` marker.
fn parse_header_log(text: &str) -> Option<Tree> {
    if !text.lines().any(|l| l.trim_start().starts_with("HEADER_")) {
        return None;
    }

    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        fields.insert(key.to_string(), Tree::String(value.trim().to_string()));
    }

    if fields.is_empty() {
        return None;
    }
    Some(wrap_data(Tree::Mapping(fields)))
}

/// Parse a form-encoded query string, flattening single-valued keys.
fn parse_form_encoded(text: &str) -> Option<Tree> {
    let trimmed = text.trim();
    if !trimmed.contains('=') || trimmed.lines().count() != 1 {
        return None;
    }

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        grouped.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    if grouped.is_empty() {
        return None;
    }

    let fields = grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                Tree::String(values.pop().unwrap_or_default())
            } else {
                Tree::Sequence(values.into_iter().map(Tree::String).collect())
            };
            (key, value)
        })
        .collect();

    Some(wrap_data(Tree::Mapping(fields)))
}

// Recovered non-JSON payloads nest under a "data" key so mappings can
// address them uniformly.
fn wrap_data(inner: Tree) -> Tree {
    let mut outer = BTreeMap::new();
    outer.insert("data".to_string(), inner);
    Tree::Mapping(outer)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_trailing_commas_are_stripped() {
        let (data, error) = normalize(r#"{"items": [1, 2,], "last": true,}"#);
        assert!(error.is_none());
        assert_eq!(
            serde_json::Value::from(&data.unwrap()),
            json!({"items": [1, 2], "last": true}),
        );
    }

    #[test]
    fn test_commas_inside_strings_survive() {
        let cleaned = strip_trailing_commas(r#"{"note": "a, ]", "x": 1,}"#);
        assert_eq!(cleaned, r#"{"note": "a, ]", "x": 1}"#);

        // Escaped quotes do not terminate the string.
        let cleaned = strip_trailing_commas(r#"{"q": "say \", ]", "y": 2}"#);
        assert_eq!(cleaned, r#"{"q": "say \", ]", "y": 2}"#);
    }

    #[test]
    fn test_header_log_recovery() {
        let text = "HEADER_UxpRequest = GetPersonInfo\nHEADER_Client = SUB123\nbody = ok";
        let (data, error) = normalize(text);
        assert!(error.is_none());
        assert_eq!(
            serde_json::Value::from(&data.unwrap()),
            json!({"data": {
                "HEADER_UxpRequest": "GetPersonInfo",
                "HEADER_Client": "SUB123",
                "body": "ok",
            }}),
        );
    }

    #[test]
    fn test_form_encoded_recovery() {
        let (data, error) = normalize("date_search=2021-01-01&name=Ivan+Ivanov&tag=a&tag=b");
        assert!(error.is_none());
        assert_eq!(
            serde_json::Value::from(&data.unwrap()),
            json!({"data": {
                "date_search": "2021-01-01",
                "name": "Ivan Ivanov",
                "tag": ["a", "b"],
            }}),
        );
    }

    #[test]
    fn test_unrecoverable_text_reports_parse_error() {
        let (data, error) = normalize("this is not anything structured");
        assert!(data.is_none());
        assert!(error.unwrap().starts_with("json_parse_error:"));
    }
}
