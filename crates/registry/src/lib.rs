//! The schema registry: loads entity, register, and relationship schemas
//! from a directory of JSON files or from Postgres, compiles their
//! predicates, transforms, and paths once, and exposes read-only
//! accessors. A `Registry` is frozen after load and shared across
//! concurrent documents.

use models::{EntitySchema, RegisterSchema, RelationshipSchema};
use std::collections::BTreeMap;
use std::path::Path as FsPath;

mod compile;
pub mod predicate;
pub mod resolve;
pub mod transform;

pub use compile::{
    CompiledEntity, CompiledIdentityKey, CompiledMapping, CompiledRegister, CompiledRelProperty,
    CompiledRelationship, CompiledRule, CompiledSource, CompiledVariant, NormalizeStep,
};
pub use predicate::{Predicate, Rule, RuleKind, Verdict};
pub use resolve::{resolve_variant, AttemptReport, Resolution};
pub use transform::Transform;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema {origin} has no recognized discriminator field")]
    Unrecognized { origin: String },
    #[error("invalid path {path:?} in {origin}: {source}")]
    Path {
        origin: String,
        path: String,
        #[source]
        source: tree::PathError,
    },
    #[error("invalid regex {pattern:?} in {origin}: {source}")]
    Regex {
        origin: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule kind {kind:?} in {origin} is missing its {field:?} field")]
    MissingRuleField {
        origin: String,
        kind: String,
        field: String,
    },
    #[error("unknown normalize step {step:?} for property {property:?} of {origin}")]
    UnknownNormalizeStep {
        origin: String,
        property: String,
        step: String,
    },
    #[error("duplicate entity schema for {name:?}")]
    DuplicateEntity { name: String },
    #[error("schema database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The loaded, compiled, immutable schema registry.
pub struct Registry {
    entities: BTreeMap<String, CompiledEntity>,
    registers: Vec<CompiledRegister>,
    relationships: Vec<CompiledRelationship>,
}

impl Registry {
    /// Load every `*.json` schema under `dir`, classified by its
    /// discriminator field (`entity_name`, `registry_code`, or
    /// `relationship_name`). Files are visited in name order so the
    /// registry is deterministic regardless of directory enumeration.
    pub fn from_dir(dir: &FsPath) -> Result<Registry, SchemaError> {
        let read_dir = std::fs::read_dir(dir).map_err(|source| SchemaError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| SchemaError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::new();
        for path in paths {
            let origin = path.display().to_string();
            let text = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: origin.clone(),
                source,
            })?;
            let value: serde_json::Value =
                serde_json::from_str(&text).map_err(|source| SchemaError::Json {
                    origin: origin.clone(),
                    source,
                })?;
            docs.push((origin, value));
        }

        Self::from_documents(docs)
    }

    /// Load schemas from the three Postgres collections. Same logical
    /// layout as the file backend: one JSON document per schema.
    pub async fn from_postgres(pool: &sqlx::PgPool) -> Result<Registry, SchemaError> {
        let mut docs = Vec::new();
        for table in ["entity_schemas", "register_schemas", "relationship_schemas"] {
            let query = format!("SELECT name, doc FROM {table} ORDER BY name");
            let rows: Vec<(String, serde_json::Value)> =
                sqlx::query_as(&query).fetch_all(pool).await?;
            for (name, doc) in rows {
                docs.push((format!("{table}/{name}"), doc));
            }
        }
        Self::from_documents(docs)
    }

    /// Build a registry from already-parsed schema documents.
    /// `origin` strings are used only in error reporting.
    pub fn from_documents(
        docs: Vec<(String, serde_json::Value)>,
    ) -> Result<Registry, SchemaError> {
        let mut entities = BTreeMap::new();
        let mut registers = Vec::new();
        let mut relationships = Vec::new();

        for (origin, value) in docs {
            if value.get("entity_name").is_some() {
                let schema: EntitySchema =
                    serde_json::from_value(value).map_err(|source| SchemaError::Json {
                        origin: origin.clone(),
                        source,
                    })?;
                let compiled = CompiledEntity::compile(&origin, schema)?;
                let name = compiled.schema.entity_name.clone();
                if entities.insert(name.clone(), compiled).is_some() {
                    return Err(SchemaError::DuplicateEntity { name });
                }
            } else if value.get("registry_code").is_some() {
                let schema: RegisterSchema =
                    serde_json::from_value(value).map_err(|source| SchemaError::Json {
                        origin: origin.clone(),
                        source,
                    })?;
                registers.push(CompiledRegister::compile(&origin, schema)?);
            } else if value.get("relationship_name").is_some() {
                let schema: RelationshipSchema =
                    serde_json::from_value(value).map_err(|source| SchemaError::Json {
                        origin: origin.clone(),
                        source,
                    })?;
                relationships.push(CompiledRelationship::compile(&origin, schema)?);
            } else {
                return Err(SchemaError::Unrecognized { origin });
            }
        }

        tracing::info!(
            entities = entities.len(),
            registers = registers.len(),
            relationships = relationships.len(),
            "loaded schema registry",
        );

        Ok(Registry {
            entities,
            registers,
            relationships,
        })
    }

    pub fn entity(&self, name: &str) -> Option<&CompiledEntity> {
        self.entities.get(name)
    }

    pub fn registers(&self) -> &[CompiledRegister] {
        &self.registers
    }

    pub fn relationships(&self) -> &[CompiledRelationship] {
        &self.relationships
    }
}
