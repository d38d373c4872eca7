//! The relationship builder: connect entity instances of one document
//! according to the relationship schemas' creation rules.
//!
//! Pairing runs in two passes. Within each `scope_root` group the cross
//! product of `from_ref` × `to_ref` instances is emitted. When no group
//! contains both refs — a root-level anchor related to nested items, as
//! in a person with a list of documents — a document-wide fallback pairs
//! a ref with exactly one instance against every instance of the other.

use models::{EntityInstance, RelRecord};
use registry::{CompiledRelationship, CompiledRule, Registry};
use std::collections::{BTreeMap, BTreeSet};
use tree::Tree;

pub fn build_relationships(
    registry: &Registry,
    instances: &[EntityInstance],
    document_id: &str,
) -> Vec<RelRecord> {
    let mut records = Vec::new();
    let mut seen: BTreeSet<(String, String, String, String, String)> = BTreeSet::new();

    let mut by_scope: BTreeMap<&str, Vec<&EntityInstance>> = BTreeMap::new();
    for instance in instances {
        by_scope
            .entry(instance.scope_root.as_str())
            .or_default()
            .push(instance);
    }

    for schema in registry.relationships() {
        for rule in &schema.rules {
            let mut paired = false;

            for members in by_scope.values() {
                let froms: Vec<&EntityInstance> = members
                    .iter()
                    .copied()
                    .filter(|i| i.entity_ref == rule.from_ref && i.node_id.is_some())
                    .collect();
                let tos: Vec<&EntityInstance> = members
                    .iter()
                    .copied()
                    .filter(|i| i.entity_ref == rule.to_ref && i.node_id.is_some())
                    .collect();
                if froms.is_empty() || tos.is_empty() {
                    continue;
                }
                paired = true;
                emit_cross_product(
                    schema, rule, &froms, &tos, document_id, &mut seen, &mut records,
                );
            }

            if paired {
                continue;
            }

            // Document-wide fallback, only when one side is unambiguous.
            let froms: Vec<&EntityInstance> = instances
                .iter()
                .filter(|i| i.entity_ref == rule.from_ref && i.node_id.is_some())
                .collect();
            let tos: Vec<&EntityInstance> = instances
                .iter()
                .filter(|i| i.entity_ref == rule.to_ref && i.node_id.is_some())
                .collect();
            if !froms.is_empty() && !tos.is_empty() && (froms.len() == 1 || tos.len() == 1) {
                emit_cross_product(
                    schema, rule, &froms, &tos, document_id, &mut seen, &mut records,
                );
            }
        }
    }

    records
}

fn emit_cross_product(
    schema: &CompiledRelationship,
    rule: &CompiledRule,
    froms: &[&EntityInstance],
    tos: &[&EntityInstance],
    document_id: &str,
    seen: &mut BTreeSet<(String, String, String, String, String)>,
    records: &mut Vec<RelRecord>,
) {
    for from in froms {
        for to in tos {
            let (Some(from_id), Some(to_id)) = (&from.node_id, &to.node_id) else {
                continue;
            };

            let mut properties: BTreeMap<String, Tree> = BTreeMap::new();
            properties.insert(
                "source_doc".to_string(),
                Tree::String(document_id.to_string()),
            );
            for property in &rule.properties {
                // `value_from` paths resolve against the `from`
                // instance's scope item.
                let value = match (&property.value, &property.value_from) {
                    (Some(literal), _) => Some(literal.clone()),
                    (None, Some(path)) => path.first(&from.scope_item).cloned(),
                    (None, None) => None,
                };
                if let Some(value) = value {
                    properties.insert(property.name.clone(), value);
                }
            }

            let record = RelRecord {
                name: schema.relationship_name.clone(),
                rel_type: schema.rel_type.clone(),
                from_label: from.label.clone(),
                from_id: from_id.clone(),
                to_label: to.label.clone(),
                to_id: to_id.clone(),
                properties,
                source_doc: document_id.to_string(),
                scope_root: from.scope_root.clone(),
            };

            // Duplicate tuples within one document collapse here; the
            // sink dedups across documents.
            if seen.insert(record.unique_key()) {
                records.push(record);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry_with(rel: serde_json::Value) -> Registry {
        Registry::from_documents(vec![("rel.json".to_string(), rel)]).unwrap()
    }

    fn owns_vehicle() -> serde_json::Value {
        json!({
            "relationship_name": "Person_OWNS_VEHICLE_Vehicle",
            "graph": {"type": "OWNS_VEHICLE", "from_label": "Person", "to_label": "Vehicle"},
            "creation_rules": [{
                "rule_id": "default",
                "bind": {"from": {"entity_ref": "Owner"}, "to": {"entity_ref": "Car"}},
                "properties": [{"name": "role", "value": "owner"}],
            }],
        })
    }

    fn instance(label: &str, entity_ref: &str, scope_root: &str, node_id: &str) -> EntityInstance {
        EntityInstance {
            label: label.to_string(),
            entity_ref: entity_ref.to_string(),
            scope_root: scope_root.to_string(),
            instance_key: format!("{scope_root}:{entity_ref}"),
            scope_item: Tree::Null,
            properties: Default::default(),
            node_id: Some(node_id.to_string()),
        }
    }

    #[test]
    fn test_same_scope_pairing_does_not_cross_scopes() {
        let registry = registry_with(owns_vehicle());
        let instances = vec![
            instance("Person", "Owner", "car:0", "p0"),
            instance("Vehicle", "Car", "car:0", "v0"),
            instance("Person", "Owner", "car:1", "p1"),
            instance("Vehicle", "Car", "car:1", "v1"),
        ];

        let records =
            build_relationships(&registry, &instances, "doc-1");

        let pairs: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.from_id.clone(), r.to_id.clone()))
            .collect();
        // Owner 0 links car 0, owner 1 links car 1; never across.
        assert_eq!(
            pairs,
            vec![
                ("p0".to_string(), "v0".to_string()),
                ("p1".to_string(), "v1".to_string()),
            ],
        );
        assert_eq!(records[0].rel_type, "OWNS_VEHICLE");
        assert_eq!(records[0].properties.get("role").unwrap(), &Tree::from("owner"));
    }

    #[test]
    fn test_unique_anchor_fallback_links_across_scopes() {
        let registry = registry_with(json!({
            "relationship_name": "Person_HAS_DOCUMENT_Document",
            "graph": {"type": "HAS_DOCUMENT", "from_label": "Person", "to_label": "Document"},
            "creation_rules": [{
                "rule_id": "default",
                "bind": {"from": {"entity_ref": "EisPerson"}, "to": {"entity_ref": "Passport"}},
            }],
        }));

        // The person comes from one mapping, the documents from another:
        // no scope group contains both refs.
        let instances = vec![
            instance("Person", "EisPerson", "eis_person:0", "p0"),
            instance("Document", "Passport", "eis_doc:0", "d0"),
            instance("Document", "Passport", "eis_doc:1", "d1"),
        ];

        let records =
            build_relationships(&registry, &instances, "doc-1");
        let pairs: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.from_id.clone(), r.to_id.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("p0".to_string(), "d0".to_string()),
                ("p0".to_string(), "d1".to_string()),
            ],
        );
    }

    #[test]
    fn test_ambiguous_cross_scope_pairs_are_not_guessed() {
        let registry = registry_with(owns_vehicle());
        // Two owners and two cars in unrelated scopes: linking them
        // would be a guess, so nothing is emitted.
        let instances = vec![
            instance("Person", "Owner", "owners:0", "p0"),
            instance("Person", "Owner", "owners:1", "p1"),
            instance("Vehicle", "Car", "cars:0", "v0"),
            instance("Vehicle", "Car", "cars:1", "v1"),
        ];

        let records =
            build_relationships(&registry, &instances, "doc-1");
        assert!(records.is_empty());
    }

    #[test]
    fn test_duplicate_tuples_deduplicate() {
        let registry = registry_with(owns_vehicle());
        // Both instances resolve to the same node ids.
        let instances = vec![
            instance("Person", "Owner", "car:0", "p0"),
            instance("Vehicle", "Car", "car:0", "v0"),
            instance("Person", "Owner", "car:1", "p0"),
            instance("Vehicle", "Car", "car:1", "v0"),
        ];

        let records =
            build_relationships(&registry, &instances, "doc-1");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_value_from_resolves_against_from_scope_item() {
        let registry = registry_with(json!({
            "relationship_name": "Person_OWNS_VEHICLE_Vehicle",
            "graph": {"type": "OWNS_VEHICLE", "from_label": "Person", "to_label": "Vehicle"},
            "creation_rules": [{
                "rule_id": "default",
                "bind": {"from": {"entity_ref": "Owner"}, "to": {"entity_ref": "Car"}},
                "properties": [
                    {"name": "registered_at", "value_from": {"json_path": "$.date"}},
                ],
            }],
        }));

        let mut owner = instance("Person", "Owner", "car:0", "p0");
        owner.scope_item = Tree::from(json!({"date": "2020-05-01", "VIN": "A1"}));
        let instances = vec![owner, instance("Vehicle", "Car", "car:0", "v0")];

        let records = build_relationships(&registry, &instances, "doc-1");
        assert_eq!(
            records[0].properties.get("registered_at").unwrap(),
            &Tree::from("2020-05-01"),
        );

        // A path with no value under the scope item contributes nothing.
        assert!(records[0].properties.get("missing").is_none());
    }
}
