//! Format sniffing and normalization of raw registry payloads into the
//! canonical `{meta, data}` tree.
//!
//! The canonicalizer never fails outright: structural decode failures are
//! recorded on the resulting document as `parse_error` together with a
//! short preview, and the orchestrator decides what to do about them.

use models::{CanonicalDocument, RawDocument};
use std::collections::BTreeMap;
use std::path::Path as FsPath;
use tree::Tree;

mod encoding;
mod json;
mod xml;

pub use encoding::decode_text;

/// Bytes of raw content retained as a diagnostic preview when parsing fails.
const PREVIEW_BYTES: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Content types the canonicalizer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
    OctetStream,
}

impl ContentType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::OctetStream => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Sniff the content type: leading non-whitespace byte first, then the
/// file extension, then octet-stream.
pub fn detect_content_type(file_path: &str, bytes: &[u8]) -> ContentType {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => return ContentType::Json,
        Some(b'<') => return ContentType::Xml,
        _ => {}
    }

    let lower = file_path.to_ascii_lowercase();
    if lower.ends_with(".json") || lower.ends_with(".jsonl") {
        ContentType::Json
    } else if lower.ends_with(".xml") {
        ContentType::Xml
    } else {
        ContentType::OctetStream
    }
}

/// Read a file into a `RawDocument`, sniffing its content type and
/// computing the raw content hash.
pub fn read_raw_document(path: &FsPath) -> Result<RawDocument, CanonicalizeError> {
    let bytes = std::fs::read(path).map_err(|source| CanonicalizeError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw_from_bytes(path.display().to_string(), bytes.into()))
}

/// Build a `RawDocument` from bytes already in hand.
pub fn raw_from_bytes(file_path: String, bytes: bytes::Bytes) -> RawDocument {
    let content_type = detect_content_type(&file_path, &bytes);
    RawDocument::new(file_path, content_type.as_mime(), bytes)
}

/// Normalize a raw document into its canonical `{meta, data}` form.
#[tracing::instrument(level = "debug", skip(raw), fields(file_path = %raw.file_path))]
pub fn canonicalize(raw: &RawDocument) -> CanonicalDocument {
    let text = decode_text(&raw.bytes, raw.encoding.as_deref());

    let mut meta = BTreeMap::new();
    meta.insert("content_type".to_string(), raw.content_type.clone());

    let (data, parse_error) = match raw.content_type.as_str() {
        "application/json" => json::normalize(&text),
        "application/xml" => xml::normalize(&text, &mut meta),
        other => (
            Some(preview_tree(&raw.bytes)),
            Some(format!("unsupported_content_type: {other}")),
        ),
    };

    let data = data.unwrap_or_else(|| preview_tree(&raw.bytes));

    if let Some(error) = &parse_error {
        tracing::debug!(error = %error, "document failed structural decoding");
    }

    finish(meta, data, parse_error)
}

fn finish(
    meta: BTreeMap<String, String>,
    data: Tree,
    parse_error: Option<String>,
) -> CanonicalDocument {
    let mut doc = CanonicalDocument {
        meta,
        data,
        canonical_hash: String::new(),
        parse_error,
    };
    doc.canonical_hash = doc.to_tree().canonical_hash();
    doc
}

/// A diagnostic stub retained in place of data that failed to decode.
fn preview_tree(bytes: &[u8]) -> Tree {
    let end = bytes.len().min(PREVIEW_BYTES);
    let preview = String::from_utf8_lossy(&bytes[..end]).into_owned();

    let mut fields = BTreeMap::new();
    fields.insert("_raw_preview".to_string(), Tree::String(preview));
    Tree::Mapping(fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(path: &str, body: &str) -> RawDocument {
        raw_from_bytes(path.to_string(), bytes::Bytes::copy_from_slice(body.as_bytes()))
    }

    #[test]
    fn test_sniffing_prefers_bytes_over_extension() {
        assert_eq!(
            detect_content_type("data.xml", br#"  {"a": 1}"#),
            ContentType::Json,
        );
        assert_eq!(
            detect_content_type("data.json", b"\n<root/>"),
            ContentType::Xml,
        );
        assert_eq!(
            detect_content_type("data.json", b"not structured"),
            ContentType::Json,
        );
        assert_eq!(
            detect_content_type("data.bin", b"\x00\x01"),
            ContentType::OctetStream,
        );
    }

    #[test]
    fn test_canonicalize_json_document() {
        let doc = canonicalize(&raw("in/person.json", r#"{"root": {"result": {"unzr": "U1"}}}"#));
        assert!(doc.parse_error.is_none());
        assert_eq!(
            serde_json::Value::from(&doc.data),
            json!({"root": {"result": {"unzr": "U1"}}}),
        );
        assert_eq!(doc.meta.get("content_type").unwrap(), "application/json");
    }

    #[test]
    fn test_unsupported_content_quarantines_with_preview() {
        let doc = canonicalize(&raw("in/blob.bin", "\x01\x02 opaque"));
        let error = doc.parse_error.as_deref().unwrap();
        assert!(error.starts_with("unsupported_content_type"), "{error}");
        assert!(doc.data.get("_raw_preview").is_some());
    }

    #[test]
    fn test_canonical_serialization_is_deterministic() {
        let doc = canonicalize(&raw("in/x.json", r#"{"b": 1, "a": [true, null]}"#));
        let canonical = String::from_utf8(doc.to_tree().canonical_json()).unwrap();
        insta::assert_snapshot!(canonical, @r###"{"data":{"a":[true,null],"b":1},"meta":{"content_type":"application/json"}}"###);
    }

    #[test]
    fn test_byte_equal_documents_hash_identically() {
        // Same bytes, different paths: provenance must not leak into the hash.
        let a = canonicalize(&raw("in/one.json", r#"{"k": [1, 2,]}"#));
        let b = canonicalize(&raw("other/two.json", r#"{"k": [1, 2,]}"#));
        assert_eq!(a.canonical_hash, b.canonical_hash);
        assert!(a.parse_error.is_none());
    }
}
