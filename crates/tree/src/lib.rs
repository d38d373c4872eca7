use std::collections::BTreeMap;

// A canonical document tree. Every decoded payload, whatever its source
// format, is normalized into this shape before anything downstream sees it.
// Mappings are BTreeMaps so a serialization of a Tree is always key-sorted,
// which is what makes canonical hashes stable.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Tree>),
    Mapping(BTreeMap<String, Tree>),
}

pub mod ptr;
pub use ptr::{Path, PathError, Token};

mod de;
mod ser;

impl Tree {
    /// Fetch a direct child of a Mapping by property name.
    pub fn get(&self, property: &str) -> Option<&Tree> {
        match self {
            Tree::Mapping(m) => m.get(property),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Tree::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tree::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render a scalar as its canonical string form.
    /// Sequences and mappings have no scalar rendering and return None.
    pub fn scalar_to_string(&self) -> Option<String> {
        match self {
            Tree::Null => None,
            Tree::Bool(b) => Some(b.to_string()),
            Tree::Integer(i) => Some(i.to_string()),
            Tree::Float(f) => Some(f.to_string()),
            Tree::String(s) => Some(s.clone()),
            Tree::Sequence(_) | Tree::Mapping(_) => None,
        }
    }

    /// Serialize to compact JSON with sorted keys.
    /// This is the canonical byte form over which hashes are computed.
    pub fn canonical_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Tree serialization is infallible")
    }

    /// SHA-256 of the canonical JSON serialization, as lowercase hex.
    pub fn canonical_hash(&self) -> String {
        sha256_hex(&self.canonical_json())
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::Null
    }
}

impl From<serde_json::Value> for Tree {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Tree::Null,
            Value::Bool(b) => Tree::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Tree::Integer(i)
                } else {
                    Tree::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Tree::String(s),
            Value::Array(items) => Tree::Sequence(items.into_iter().map(Tree::from).collect()),
            Value::Object(fields) => {
                Tree::Mapping(fields.into_iter().map(|(k, v)| (k, Tree::from(v))).collect())
            }
        }
    }
}

impl From<&Tree> for serde_json::Value {
    fn from(t: &Tree) -> Self {
        use serde_json::Value;
        match t {
            Tree::Null => Value::Null,
            Tree::Bool(b) => Value::Bool(*b),
            Tree::Integer(i) => Value::from(*i),
            Tree::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Tree::String(s) => Value::String(s.clone()),
            Tree::Sequence(items) => Value::Array(items.iter().map(Value::from).collect()),
            Tree::Mapping(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Tree {
    fn from(s: &str) -> Self {
        Tree::String(s.to_string())
    }
}

impl From<String> for Tree {
    fn from(s: String) -> Self {
        Tree::String(s)
    }
}

/// SHA-256 of arbitrary bytes, as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
