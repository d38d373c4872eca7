use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A register schema groups the selectable mapping variants of one
/// upstream registry, along with its classification codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSchema {
    pub registry_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_code: Option<String>,
    #[serde(default)]
    pub status: SchemaStatus,
    #[serde(default = "super::default_version")]
    pub version: u32,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStatus {
    #[default]
    Active,
    Draft,
    Deprecated,
}

/// One selectable mapping configuration within a register schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub match_predicate: MatchPredicate,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

fn default_priority() -> u32 {
    100
}

/// A match predicate: every `all` rule must hold and no `none` rule may.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchPredicate {
    #[serde(default)]
    pub all: Vec<MatchRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub none: Vec<MatchRule>,
}

/// The serde-facing form of a predicate rule. The rule kind is carried as
/// a plain string so that registries containing rule kinds this build does
/// not understand still load; the registry compiles known kinds into a
/// dispatch table and keeps unknown ones as inert reasons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One mapping of a variant: iterate a scope, extract a source value,
/// transform it, and route it to entity targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<MatchPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub required: bool,
}

/// A mapping scope. An absent `foreach` means the scope is the document
/// itself, visited exactly once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub json_path: String,
    /// Resolve against the whole document instead of the scope item.
    #[serde(default)]
    pub use_root_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub entity: String,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<String>,
}

/// A pure value-to-value transform. Transforms never fail: incompatible
/// input types yield null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Ignore the input and yield `value`.
    Constant { value: serde_json::Value },
    /// Strip leading and trailing whitespace.
    Trim,
    /// Replace runs of whitespace with a single space.
    CollapseSpaces,
    Upper,
    Lower,
    /// Parse a decimal integer; null on failure.
    ToInt,
    /// Split by `delimiter` and take the trimmed element at `index`.
    Split {
        delimiter: String,
        #[serde(default)]
        index: usize,
    },
    /// Apply `pattern` and return capture `group`, or null.
    Regex {
        pattern: String,
        #[serde(default = "default_group")]
        group: usize,
    },
    /// Look the value up in `mapping`. A miss yields `default` when one
    /// is given, and otherwise passes the input through unchanged.
    Map {
        mapping: BTreeMap<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<serde_json::Value>,
    },
    /// Trim plus whitespace collapse.
    Clean,
}

fn default_group() -> usize {
    1
}
