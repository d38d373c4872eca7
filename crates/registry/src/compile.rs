//! Load-time compilation of schemas: paths parsed, predicates and
//! transforms built, identity keys ordered. Everything the hot path
//! touches per document is resolved here exactly once.

use crate::{predicate::Predicate, transform::Transform, SchemaError};
use models::{
    ChangeType, Direction, EntitySchema, Mapping, RegisterSchema, RelationshipSchema, Target,
    Variant,
};
use std::collections::BTreeMap;
use tree::{Path, Tree};

pub struct CompiledRegister {
    pub registry_code: String,
    pub name: Option<String>,
    pub service_code: Option<String>,
    pub method_code: Option<String>,
    pub variants: Vec<CompiledVariant>,
}

pub struct CompiledVariant {
    pub variant_id: String,
    pub priority: u32,
    pub predicate: Predicate,
    pub mappings: Vec<CompiledMapping>,
}

pub struct CompiledMapping {
    pub mapping_id: String,
    pub foreach: Option<Path>,
    pub source: Option<CompiledSource>,
    pub filter: Option<Predicate>,
    pub transform: Option<Transform>,
    pub targets: Vec<Target>,
    pub required: bool,
}

pub struct CompiledSource {
    pub path: Path,
    pub use_root_context: bool,
}

impl CompiledRegister {
    pub fn compile(origin: &str, schema: RegisterSchema) -> Result<CompiledRegister, SchemaError> {
        let variants = schema
            .variants
            .iter()
            .map(|variant| CompiledVariant::compile(origin, variant))
            .collect::<Result<_, _>>()?;

        Ok(CompiledRegister {
            registry_code: schema.registry_code,
            name: schema.name,
            service_code: schema.service_code,
            method_code: schema.method_code,
            variants,
        })
    }
}

impl CompiledVariant {
    fn compile(origin: &str, variant: &Variant) -> Result<CompiledVariant, SchemaError> {
        let origin = format!("{origin}#{}", variant.variant_id);
        Ok(CompiledVariant {
            variant_id: variant.variant_id.clone(),
            priority: variant.priority,
            predicate: Predicate::compile(&origin, &variant.match_predicate)?,
            mappings: variant
                .mappings
                .iter()
                .map(|mapping| CompiledMapping::compile(&origin, mapping))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl CompiledMapping {
    fn compile(origin: &str, mapping: &Mapping) -> Result<CompiledMapping, SchemaError> {
        let compile_path = |path: &str| {
            Path::compile(path).map_err(|source| SchemaError::Path {
                origin: origin.to_string(),
                path: path.to_string(),
                source,
            })
        };

        let foreach = mapping
            .scope
            .foreach
            .as_deref()
            .map(compile_path)
            .transpose()?;

        let source = mapping
            .source
            .as_ref()
            .map(|source| {
                Ok::<_, SchemaError>(CompiledSource {
                    path: compile_path(&source.json_path)?,
                    use_root_context: source.use_root_context,
                })
            })
            .transpose()?;

        Ok(CompiledMapping {
            mapping_id: mapping
                .mapping_id
                .clone()
                .unwrap_or_else(|| "map".to_string()),
            foreach,
            source,
            filter: mapping
                .filter
                .as_ref()
                .map(|filter| Predicate::compile(origin, filter))
                .transpose()?,
            transform: mapping
                .transform
                .as_ref()
                .map(|transform| Transform::compile(origin, transform))
                .transpose()?,
            targets: mapping.targets.clone(),
            required: mapping.required,
        })
    }
}

pub struct CompiledRelationship {
    pub relationship_name: String,
    pub rel_type: String,
    pub direction: Direction,
    pub from_label: String,
    pub to_label: String,
    pub rules: Vec<CompiledRule>,
}

pub struct CompiledRule {
    pub rule_id: String,
    pub from_ref: String,
    pub to_ref: String,
    pub properties: Vec<CompiledRelProperty>,
}

/// A rule-level edge property: a literal, or a path resolved against the
/// `from` instance's scope item when the edge is built.
pub struct CompiledRelProperty {
    pub name: String,
    pub value: Option<Tree>,
    pub value_from: Option<Path>,
}

impl CompiledRelationship {
    pub fn compile(
        origin: &str,
        schema: RelationshipSchema,
    ) -> Result<CompiledRelationship, SchemaError> {
        let rules = schema
            .creation_rules
            .iter()
            .map(|rule| {
                let properties = rule
                    .properties
                    .iter()
                    .map(|property| {
                        let value_from = property
                            .value_from
                            .as_ref()
                            .map(|from| {
                                Path::compile(&from.json_path).map_err(|source| {
                                    SchemaError::Path {
                                        origin: origin.to_string(),
                                        path: from.json_path.clone(),
                                        source,
                                    }
                                })
                            })
                            .transpose()?;
                        Ok::<_, SchemaError>(CompiledRelProperty {
                            name: property.name.clone(),
                            value: property.value.clone().map(Tree::from),
                            value_from,
                        })
                    })
                    .collect::<Result<_, _>>()?;

                Ok::<_, SchemaError>(CompiledRule {
                    rule_id: rule.rule_id.clone(),
                    from_ref: rule.bind.from.entity_ref.clone(),
                    to_ref: rule.bind.to.entity_ref.clone(),
                    properties,
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(CompiledRelationship {
            relationship_name: schema.relationship_name,
            rel_type: schema.graph.rel_type,
            direction: schema.graph.direction,
            from_label: schema.graph.from_label,
            to_label: schema.graph.to_label,
            rules,
        })
    }
}

pub struct CompiledEntity {
    pub schema: EntitySchema,
    /// Identity keys in ascending priority order (stable for ties).
    pub identity_keys: Vec<CompiledIdentityKey>,
    change_types: BTreeMap<String, ChangeType>,
    normalize: BTreeMap<String, Vec<NormalizeStep>>,
}

pub struct CompiledIdentityKey {
    pub priority: u32,
    pub when_exists: Vec<String>,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStep {
    Trim,
    Lower,
    Upper,
    CollapseSpaces,
    Clean,
}

impl NormalizeStep {
    fn parse(step: &str) -> Option<NormalizeStep> {
        Some(match step {
            "trim" => NormalizeStep::Trim,
            "lower" => NormalizeStep::Lower,
            "upper" => NormalizeStep::Upper,
            "collapse_spaces" => NormalizeStep::CollapseSpaces,
            "clean" => NormalizeStep::Clean,
            _ => return None,
        })
    }

    pub fn apply(&self, value: &str) -> String {
        let collapse = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        match self {
            NormalizeStep::Trim => value.trim().to_string(),
            NormalizeStep::Lower => value.to_lowercase(),
            NormalizeStep::Upper => value.to_uppercase(),
            NormalizeStep::CollapseSpaces => collapse(value),
            NormalizeStep::Clean => collapse(value.trim()),
        }
    }
}

impl CompiledEntity {
    pub fn compile(origin: &str, schema: EntitySchema) -> Result<CompiledEntity, SchemaError> {
        let mut identity_keys: Vec<CompiledIdentityKey> = schema
            .identity_keys
            .iter()
            .map(|key| CompiledIdentityKey {
                priority: key.priority,
                when_exists: key.when.exists.clone(),
                properties: key.properties.clone(),
            })
            .collect();
        identity_keys.sort_by_key(|key| key.priority);

        let mut change_types = BTreeMap::new();
        let mut normalize = BTreeMap::new();
        for property in &schema.properties {
            change_types.insert(property.name.clone(), property.change_type);

            let mut steps = Vec::new();
            for step in &property.normalize {
                let parsed =
                    NormalizeStep::parse(step).ok_or_else(|| SchemaError::UnknownNormalizeStep {
                        origin: origin.to_string(),
                        property: property.name.clone(),
                        step: step.clone(),
                    })?;
                steps.push(parsed);
            }
            normalize.insert(property.name.clone(), steps);
        }

        Ok(CompiledEntity {
            schema,
            identity_keys,
            change_types,
            normalize,
        })
    }

    /// The change type governing merges of `property`.
    /// Unschema'd properties default to rarely-changed.
    pub fn change_type(&self, property: &str) -> ChangeType {
        self.change_types
            .get(property)
            .copied()
            .unwrap_or_default()
    }

    pub fn change_types(&self) -> &BTreeMap<String, ChangeType> {
        &self.change_types
    }

    /// Normalize a value per the property's configured steps.
    pub fn normalize(&self, property: &str, value: &str) -> String {
        let Some(steps) = self.normalize.get(property) else {
            return value.to_string();
        };
        steps
            .iter()
            .fold(value.to_string(), |v, step| step.apply(&v))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_keys_sort_by_priority() {
        let schema: EntitySchema = serde_json::from_value(json!({
            "entity_name": "Person",
            "identity_keys": [
                {"priority": 20, "when": {"exists": ["full_name"]}, "properties": ["full_name"]},
                {"priority": 10, "when": {"exists": ["rnokpp"]}, "properties": ["rnokpp"]},
            ],
            "properties": [
                {"name": "full_name", "normalize": ["clean", "lower"]},
            ],
        }))
        .unwrap();

        let compiled = CompiledEntity::compile("person.json", schema).unwrap();
        assert_eq!(compiled.identity_keys[0].properties, vec!["rnokpp"]);
        assert_eq!(compiled.identity_keys[1].properties, vec!["full_name"]);
        assert_eq!(
            compiled.normalize("full_name", "  Іванов   ІВАН "),
            "іванов іван",
        );
        // Unlisted properties normalize to themselves.
        assert_eq!(compiled.normalize("other", " X "), " X ");
    }

    #[test]
    fn test_unknown_normalize_step_fails_load() {
        let schema: EntitySchema = serde_json::from_value(json!({
            "entity_name": "Person",
            "properties": [{"name": "x", "normalize": ["reverse"]}],
        }))
        .unwrap();
        assert!(matches!(
            CompiledEntity::compile("person.json", schema),
            Err(SchemaError::UnknownNormalizeStep { .. }),
        ));
    }
}
