use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tree::Tree;

/// Per-document staging record produced by the mapper and consumed by the
/// identity engine and relationship builder. Never persisted.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    pub label: String,
    pub entity_ref: String,
    /// Scope chain identity: `{mapping_id}:{index}` for flat mappings.
    pub scope_root: String,
    /// `{scope_root}:{entity_ref}` — the arena key for property merging.
    pub instance_key: String,
    /// The scope item this instance was mapped from. Relationship rules
    /// resolve their `value_from` paths against it.
    pub scope_item: Tree,
    pub properties: BTreeMap<String, Tree>,
    pub node_id: Option<String>,
}

impl EntityInstance {
    /// A non-null property value, if assigned.
    pub fn property(&self, name: &str) -> Option<&Tree> {
        self.properties.get(name).filter(|v| !v.is_null())
    }
}

/// A labeled node row bound for the graph sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub label: String,
    pub node_id: String,
    pub properties: BTreeMap<String, Tree>,
    pub source_doc: String,
    pub scope_root: String,
    pub entity_ref: String,
    /// Orders `dynamic` property merges across documents.
    #[serde(with = "time::serde::rfc3339")]
    pub source_time: time::OffsetDateTime,
}

/// A typed edge row bound for the graph sink. Uniqueness is by
/// `(from_label, from_id, rel_type, to_label, to_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelRecord {
    pub name: String,
    pub rel_type: String,
    pub from_label: String,
    pub from_id: String,
    pub to_label: String,
    pub to_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Tree>,
    pub source_doc: String,
    pub scope_root: String,
}

impl RelRecord {
    /// The tuple that makes an edge unique.
    pub fn unique_key(&self) -> (String, String, String, String, String) {
        (
            self.from_label.clone(),
            self.from_id.clone(),
            self.rel_type.clone(),
            self.to_label.clone(),
            self.to_id.clone(),
        )
    }
}
