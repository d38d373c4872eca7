use std::collections::BTreeMap;
use tree::Tree;

/// Immutable raw bytes plus provenance, as handed to the canonicalizer.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub file_path: String,
    pub content_type: String,
    pub bytes: bytes::Bytes,
    /// Declared text encoding, when known. Defaults to UTF-8 at decode.
    pub encoding: Option<String>,
    /// SHA-256 of `bytes`, lowercase hex.
    pub content_hash: String,
}

impl RawDocument {
    pub fn new(
        file_path: impl Into<String>,
        content_type: impl Into<String>,
        bytes: bytes::Bytes,
    ) -> Self {
        let content_hash = tree::sha256_hex(&bytes);
        Self {
            file_path: file_path.into(),
            content_type: content_type.into(),
            bytes,
            encoding: None,
            content_hash,
        }
    }
}

/// The normalized `{meta, data}` form of a document.
///
/// `meta` is a flat map of string scalars (registry/service/method codes
/// and the like). `data` is the canonical tree. `canonical_hash` is the
/// SHA-256 of the deterministic serialization of the combined tree, so
/// byte-equal inputs of the same declared type always hash identically.
#[derive(Debug, Clone)]
pub struct CanonicalDocument {
    pub meta: BTreeMap<String, String>,
    pub data: Tree,
    pub canonical_hash: String,
    /// Set when structural decoding failed; `data` then holds a preview.
    pub parse_error: Option<String>,
}

impl CanonicalDocument {
    /// The combined `{meta, data}` tree that paths and predicates
    /// evaluate against.
    pub fn to_tree(&self) -> Tree {
        let meta = self
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), Tree::String(v.clone())))
            .collect();

        let mut root = BTreeMap::new();
        root.insert("meta".to_string(), Tree::Mapping(meta));
        root.insert("data".to_string(), self.data.clone());
        Tree::Mapping(root)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_canonical_tree_shape_and_hash() {
        let doc = CanonicalDocument {
            meta: [("registry_code".to_string(), "EIS".to_string())].into(),
            data: Tree::from(json!({"root": {"result": {"unzr": "U1"}}})),
            canonical_hash: String::new(),
            parse_error: None,
        };

        let root = doc.to_tree();
        assert_eq!(
            serde_json::Value::from(&root),
            json!({
                "meta": {"registry_code": "EIS"},
                "data": {"root": {"result": {"unzr": "U1"}}},
            }),
        );

        // The hash is a pure function of the combined tree.
        assert_eq!(root.canonical_hash(), doc.to_tree().canonical_hash());
    }
}
