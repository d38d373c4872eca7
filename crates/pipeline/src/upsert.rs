//! The upsert engine: batch one document's nodes by label and its
//! relationships by type, apply each label's merge spec, and drive the
//! graph sink with bounded retries. Immutable conflicts surface to the
//! orchestrator, which quarantines the document.

use models::{EntityInstance, NodeRecord, RelRecord, WriteSummary};
use registry::Registry;
use std::collections::BTreeMap;
use store::{GraphSink, ImmutableConflict, MergeSpec, StoreError};
use time::OffsetDateTime;

pub struct UpsertOutcome {
    pub summary: WriteSummary,
    pub conflicts: Vec<ImmutableConflict>,
}

pub async fn upsert_document(
    graph: &dyn GraphSink,
    registry: &Registry,
    instances: &[EntityInstance],
    relationships: &[RelRecord],
    document_id: &str,
    source_time: OffsetDateTime,
    batch_size: usize,
) -> Result<UpsertOutcome, StoreError> {
    let mut summary = WriteSummary::default();
    let mut conflicts = Vec::new();
    let batch_size = batch_size.max(1);

    let mut by_label: BTreeMap<&str, Vec<NodeRecord>> = BTreeMap::new();
    for instance in instances {
        let Some(node_id) = &instance.node_id else {
            continue;
        };
        by_label
            .entry(instance.label.as_str())
            .or_default()
            .push(NodeRecord {
                label: instance.label.clone(),
                node_id: node_id.clone(),
                properties: instance.properties.clone(),
                source_doc: document_id.to_string(),
                scope_root: instance.scope_root.clone(),
                entity_ref: instance.entity_ref.clone(),
                source_time,
            });
    }

    for (label, rows) in by_label {
        let merge = registry
            .entity(label)
            .map(|entity| MergeSpec::new(entity.change_types().clone()))
            .unwrap_or_default();

        for chunk in rows.chunks(batch_size) {
            let outcome = store::with_retries("upsert_nodes", || {
                graph.upsert_nodes(label, chunk.to_vec(), &merge)
            })
            .await?;
            summary.nodes_upserted += outcome.nodes_upserted;
            conflicts.extend(outcome.conflicts);
        }
    }

    let mut by_type: BTreeMap<&str, Vec<&RelRecord>> = BTreeMap::new();
    for record in relationships {
        by_type
            .entry(record.rel_type.as_str())
            .or_default()
            .push(record);
    }

    for rows in by_type.values() {
        for chunk in rows.chunks(batch_size) {
            let outcome = store::with_retries("upsert_relationships", || {
                graph.upsert_relationships(chunk.iter().map(|r| (*r).clone()).collect())
            })
            .await?;
            summary.relationships_created += outcome.relationships_created;
        }
    }

    summary.conflicts = conflicts.len() as u64;
    Ok(UpsertOutcome { summary, conflicts })
}
