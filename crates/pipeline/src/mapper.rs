//! The mapper: execute a variant's mappings over a canonical document,
//! producing entity instances keyed by `(mapping_id, index, entity_ref)`.
//!
//! Instances live in an arena `Vec` and are addressed by index through a
//! key map, so mappings that share a scope instance contribute to one
//! record without any ownership juggling.

use models::EntityInstance;
use registry::CompiledVariant;
use std::collections::HashMap;
use tree::Tree;

/// A required source path had no value: the document is quarantined with
/// the mapping id and the offending path.
#[derive(Debug, thiserror::Error)]
#[error("mapping {mapping_id:?} requires a value at {path:?}")]
pub struct MappingError {
    pub mapping_id: String,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct MappedDocument {
    pub instances: Vec<EntityInstance>,
    /// First-write-wins collisions, logged as merge warnings.
    pub warnings: Vec<String>,
}

pub fn map_document(
    document_id: &str,
    root: &Tree,
    variant: &CompiledVariant,
) -> Result<MappedDocument, MappingError> {
    let mut arena: Vec<EntityInstance> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut warnings = Vec::new();

    for mapping in &variant.mappings {
        // An absent foreach means one scope item: the document itself.
        let scope_items: Vec<&Tree> = match &mapping.foreach {
            Some(path) => path.values(root),
            None => vec![root],
        };

        for (item_index, item) in scope_items.into_iter().enumerate() {
            if let Some(filter) = &mapping.filter {
                if !filter.eval(item).matched {
                    continue;
                }
            }

            let extracted = match &mapping.source {
                Some(source) => {
                    let base = if source.use_root_context { root } else { item };
                    source.path.first(base).cloned()
                }
                None => None,
            };

            if extracted.is_none() && mapping.required {
                if let Some(source) = &mapping.source {
                    return Err(MappingError {
                        mapping_id: mapping.mapping_id.clone(),
                        path: source.path.as_str().to_string(),
                    });
                }
            }

            let value = extracted.unwrap_or(Tree::Null);
            let value = match &mapping.transform {
                Some(transform) => transform.apply(&value),
                None => value,
            };

            let scope_root = format!("{}:{}", mapping.mapping_id, item_index);

            for target in &mapping.targets {
                let entity_ref = target
                    .entity_ref
                    .clone()
                    .unwrap_or_else(|| target.entity.clone());
                let instance_key = format!("{scope_root}:{entity_ref}");

                let slot = *index.entry(instance_key.clone()).or_insert_with(|| {
                    arena.push(EntityInstance {
                        label: target.entity.clone(),
                        entity_ref: entity_ref.clone(),
                        scope_root: scope_root.clone(),
                        instance_key: instance_key.clone(),
                        scope_item: item.clone(),
                        properties: Default::default(),
                        node_id: None,
                    });
                    arena.len() - 1
                });
                let instance = &mut arena[slot];

                if !value.is_null() {
                    match instance.properties.get(&target.property) {
                        Some(existing) if !existing.is_null() => {
                            // Mapping-order determinism: the first write
                            // wins; later differing writes only warn.
                            if existing != &value {
                                warnings.push(format!(
                                    "{instance_key}.{}: already set by an earlier mapping, keeping first value",
                                    target.property,
                                ));
                            }
                        }
                        _ => {
                            instance
                                .properties
                                .insert(target.property.clone(), value.clone());
                        }
                    }
                }

                // Provenance tag, constant for the whole document.
                instance.properties.insert(
                    "source_doc_id".to_string(),
                    Tree::String(document_id.to_string()),
                );
            }
        }
    }

    Ok(MappedDocument {
        instances: arena,
        warnings,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn variant(spec: serde_json::Value) -> registry::CompiledRegister {
        registry::CompiledRegister::compile(
            "register.json",
            serde_json::from_value(json!({"registry_code": "TEST", "variants": [spec]})).unwrap(),
        )
        .unwrap()
    }

    fn doc() -> Tree {
        Tree::from(json!({
            "meta": {},
            "data": {"root": {
                "result": {"unzr": "U1", "last_name": "Ivanov"},
                "items": [
                    {"kind": "car", "code": "A"},
                    {"kind": "boat", "code": "B"},
                ],
            }},
        }))
    }

    #[test]
    fn test_mappings_sharing_an_id_share_an_instance() {
        let register = variant(json!({
            "variant_id": "v1",
            "match_predicate": {"all": []},
            "mappings": [
                {
                    "mapping_id": "person",
                    "scope": {"foreach": "$.data.root.result"},
                    "source": {"json_path": "$.unzr"},
                    "targets": [{"entity": "Person", "property": "unzr", "entity_ref": "P"}],
                },
                {
                    "mapping_id": "person",
                    "scope": {"foreach": "$.data.root.result"},
                    "source": {"json_path": "$.last_name"},
                    "targets": [{"entity": "Person", "property": "last_name", "entity_ref": "P"}],
                },
            ],
        }));

        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        assert_eq!(mapped.instances.len(), 1);

        let person = &mapped.instances[0];
        assert_eq!(person.instance_key, "person:0:P");
        assert_eq!(person.property("unzr").unwrap(), &Tree::from("U1"));
        assert_eq!(person.property("last_name").unwrap(), &Tree::from("Ivanov"));
        assert_eq!(
            person.property("source_doc_id").unwrap(),
            &Tree::from("doc-1"),
        );
    }

    #[test]
    fn test_scope_iteration_with_filter() {
        let register = variant(json!({
            "variant_id": "v1",
            "match_predicate": {"all": []},
            "mappings": [{
                "mapping_id": "vehicle",
                "scope": {"foreach": "$.data.root.items[*]"},
                "source": {"json_path": "$.code"},
                "filter": {"all": [{"type": "json_equals", "path": "$.kind", "value": "car"}]},
                "targets": [{"entity": "Vehicle", "property": "code", "entity_ref": "V"}],
            }],
        }));

        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        // Only the first item passes the filter; note its scope index is
        // still its position in the full scope sequence.
        assert_eq!(mapped.instances.len(), 1);
        assert_eq!(mapped.instances[0].scope_root, "vehicle:0");
        assert_eq!(mapped.instances[0].property("code").unwrap(), &Tree::from("A"));
    }

    #[test]
    fn test_use_root_context_reanchors_source() {
        let register = variant(json!({
            "variant_id": "v1",
            "match_predicate": {"all": []},
            "mappings": [{
                "mapping_id": "item",
                "scope": {"foreach": "$.data.root.items[*]"},
                "source": {"json_path": "$.data.root.result.unzr", "use_root_context": true},
                "targets": [{"entity": "Item", "property": "owner_unzr", "entity_ref": "I"}],
            }],
        }));

        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        assert_eq!(mapped.instances.len(), 2);
        for instance in &mapped.instances {
            assert_eq!(instance.property("owner_unzr").unwrap(), &Tree::from("U1"));
        }
    }

    #[test]
    fn test_missing_value_is_no_contribution_unless_required() {
        let mapping = |required: bool| {
            json!({
                "variant_id": "v1",
                "match_predicate": {"all": []},
                "mappings": [{
                    "mapping_id": "person",
                    "scope": {"foreach": "$.data.root.result"},
                    "source": {"json_path": "$.absent"},
                    "required": required,
                    "targets": [{"entity": "Person", "property": "x", "entity_ref": "P"}],
                }],
            })
        };

        let register = variant(mapping(false));
        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        assert!(mapped.instances[0].property("x").is_none());

        let register = variant(mapping(true));
        let err = map_document("doc-1", &doc(), &register.variants[0]).unwrap_err();
        assert_eq!(err.mapping_id, "person");
        assert_eq!(err.path, "$.absent");
    }

    #[test]
    fn test_first_write_wins_records_warning() {
        let register = variant(json!({
            "variant_id": "v1",
            "match_predicate": {"all": []},
            "mappings": [
                {
                    "mapping_id": "person",
                    "scope": {"foreach": "$.data.root.result"},
                    "source": {"json_path": "$.unzr"},
                    "targets": [{"entity": "Person", "property": "code", "entity_ref": "P"}],
                },
                {
                    "mapping_id": "person",
                    "scope": {"foreach": "$.data.root.result"},
                    "source": {"json_path": "$.last_name"},
                    "targets": [{"entity": "Person", "property": "code", "entity_ref": "P"}],
                },
            ],
        }));

        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        assert_eq!(
            mapped.instances[0].property("code").unwrap(),
            &Tree::from("U1"),
        );
        assert_eq!(mapped.warnings.len(), 1);
    }

    #[test]
    fn test_transform_applies_between_extract_and_route() {
        let register = variant(json!({
            "variant_id": "v1",
            "match_predicate": {"all": []},
            "mappings": [{
                "mapping_id": "person",
                "scope": {"foreach": "$.data.root.result"},
                "source": {"json_path": "$.last_name"},
                "transform": {"kind": "upper"},
                "targets": [{"entity": "Person", "property": "last_name", "entity_ref": "P"}],
            }],
        }));

        let mapped = map_document("doc-1", &doc(), &register.variants[0]).unwrap();
        assert_eq!(
            mapped.instances[0].property("last_name").unwrap(),
            &Tree::from("IVANOV"),
        );
    }
}
