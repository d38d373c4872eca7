use super::register::SchemaStatus;
use serde::{Deserialize, Serialize};

/// Declares an entity label, its identity keys (in priority order), its
/// property schemas, and how conflicting values merge across documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_name: String,
    /// Graph labels; defaults to the entity name when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub identity_keys: Vec<IdentityKey>,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    #[serde(default)]
    pub merge_policy: MergePolicy,
    #[serde(default = "super::default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: SchemaStatus,
}

impl EntitySchema {
    pub fn label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or(&self.entity_name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// An identity key candidate. Keys are tried in ascending `priority`
/// order; the first whose `when.exists` properties are all present wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityKey {
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub when: IdentityWhen,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityWhen {
    #[serde(default)]
    pub exists: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    #[serde(rename = "type", default = "default_property_type")]
    pub value_type: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub change_type: ChangeType,
    /// Normalization steps applied before the value enters an identity
    /// string: trim, lower, upper, collapse_spaces, clean.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalize: Vec<String>,
}

fn default_property_type() -> String {
    "string".to_string()
}

/// How a property behaves when two documents disagree about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A second differing value quarantines the offending document.
    Immutable,
    /// Keep the existing value and log a warning.
    #[default]
    RarelyChanged,
    /// The value with the newest source timestamp wins.
    Dynamic,
}

/// Merge policy record. The effective behavior is keyed by each
/// property's `change_type`; the strings here are retained for schema
/// fidelity and authoring tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePolicy {
    #[serde(default = "default_policy_default")]
    pub default: String,
    #[serde(default = "default_immutable_conflict")]
    pub immutable_conflict: String,
    #[serde(default = "default_rarely_changed_conflict")]
    pub rarely_changed_conflict: String,
    #[serde(default = "default_dynamic_conflict")]
    pub dynamic_conflict: String,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            default: default_policy_default(),
            immutable_conflict: default_immutable_conflict(),
            rarely_changed_conflict: default_rarely_changed_conflict(),
            dynamic_conflict: default_dynamic_conflict(),
        }
    }
}

fn default_policy_default() -> String {
    "prefer_non_null".to_string()
}
fn default_immutable_conflict() -> String {
    "quarantine_and_alert".to_string()
}
fn default_rarely_changed_conflict() -> String {
    "log_warning_and_keep_existing".to_string()
}
fn default_dynamic_conflict() -> String {
    "take_latest_by_source_timestamp".to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_schema_parses_with_defaults() {
        let schema: EntitySchema = serde_json::from_value(json!({
            "entity_name": "Person",
            "identity_keys": [
                {"priority": 10, "when": {"exists": ["rnokpp"]}, "properties": ["rnokpp"]},
                {"priority": 20, "when": {"exists": ["full_name"]}, "properties": ["full_name"]},
            ],
            "properties": [
                {"name": "rnokpp", "change_type": "immutable"},
                {"name": "full_name", "normalize": ["clean", "lower"]},
            ],
        }))
        .unwrap();

        assert_eq!(schema.label(), "Person");
        assert_eq!(schema.property("rnokpp").unwrap().change_type, ChangeType::Immutable);
        assert_eq!(
            schema.property("full_name").unwrap().change_type,
            ChangeType::RarelyChanged,
        );
        assert_eq!(schema.merge_policy.immutable_conflict, "quarantine_and_alert");
    }
}
