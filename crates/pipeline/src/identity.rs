//! The identity engine: walk an entity's identity keys in priority
//! order and derive a content-addressed node id, or fall back to a
//! document-scoped id that will never merge across documents.

use models::EntityInstance;
use registry::Registry;
use tree::Tree;

/// Assign a node id to every instance of one document.
pub fn assign_node_ids(instances: &mut [EntityInstance], registry: &Registry, document_id: &str) {
    for instance in instances.iter_mut() {
        let node_id = compute_node_id(instance, registry, document_id);
        instance.node_id = Some(node_id);
    }
}

fn compute_node_id(instance: &EntityInstance, registry: &Registry, document_id: &str) -> String {
    let Some(entity) = registry.entity(&instance.label) else {
        return doc_scoped_id(document_id, instance);
    };

    for key in &entity.identity_keys {
        let satisfied = key
            .when_exists
            .iter()
            .all(|property| instance.property(property).is_some());
        if !satisfied {
            continue;
        }

        // The first satisfied key wins. Values are joined in declared
        // order with a reserved separator; a listed-but-absent property
        // contributes an empty segment so the id stays deterministic.
        let parts: Vec<String> = key
            .properties
            .iter()
            .map(|property| {
                instance
                    .property(property)
                    .and_then(Tree::scalar_to_string)
                    .map(|value| entity.normalize(property, value.trim()))
                    .unwrap_or_default()
            })
            .collect();

        let identity = format!("{}|{}", instance.label, parts.join("|"));
        return tree::sha256_hex(identity.as_bytes());
    }

    doc_scoped_id(document_id, instance)
}

// Doc-scoped nodes are traceable but deliberately unmergeable.
fn doc_scoped_id(document_id: &str, instance: &EntityInstance) -> String {
    format!("DOCSCOPED:{document_id}:{}", instance.instance_key)
}
