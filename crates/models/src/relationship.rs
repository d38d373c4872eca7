use super::register::SchemaStatus;
use serde::{Deserialize, Serialize};

/// Declares a directed typed edge between two entity labels, plus the
/// rules for when instances within one document should be connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSchema {
    pub relationship_name: String,
    pub graph: RelGraphConfig,
    #[serde(default)]
    pub creation_rules: Vec<CreationRule>,
    #[serde(default)]
    pub uniqueness: RelUniqueness,
    #[serde(default = "super::default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelGraphConfig {
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub direction: Direction,
    pub from_label: String,
    pub to_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Out,
    In,
}

/// Binds the edge endpoints to entity references produced by the mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationRule {
    pub rule_id: String,
    pub bind: RelBind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<RelPropertyMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelBind {
    pub from: RelRef,
    pub to: RelRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelRef {
    pub entity_ref: String,
}

/// A rule-level edge property: either a literal `value` or a document
/// path resolved at build time via `value_from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelPropertyMap {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<RelValueFrom>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelValueFrom {
    pub json_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelUniqueness {
    #[serde(default = "default_uniqueness_strategy")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl Default for RelUniqueness {
    fn default() -> Self {
        Self {
            strategy: default_uniqueness_strategy(),
            keys: Vec::new(),
        }
    }
}

fn default_uniqueness_strategy() -> String {
    "unique_per_endpoints_and_type".to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relationship_schema_parses() {
        let schema: RelationshipSchema = serde_json::from_value(json!({
            "relationship_name": "Person_HAS_DOCUMENT_Document",
            "graph": {
                "type": "HAS_DOCUMENT",
                "from_label": "Person",
                "to_label": "Document",
            },
            "creation_rules": [{
                "rule_id": "default",
                "bind": {
                    "from": {"entity_ref": "EisPerson"},
                    "to": {"entity_ref": "Passport"},
                },
                "properties": [{"name": "role", "value": "holder"}],
            }],
        }))
        .unwrap();

        assert_eq!(schema.graph.rel_type, "HAS_DOCUMENT");
        assert_eq!(schema.graph.direction, Direction::Out);
        assert_eq!(schema.creation_rules[0].bind.from.entity_ref, "EisPerson");
        assert_eq!(schema.uniqueness.strategy, "unique_per_endpoints_and_type");
    }
}
