//! File-backed stores: newline-delimited JSON journals under an output
//! directory, an in-memory merge index for the graph, and a final
//! `graph_snapshot.json` suitable for round-trip tests.

use crate::{
    DocumentStore, GraphSink, ImmutableConflict, MergeSpec, NodeUpsertOutcome, RelUpsertOutcome,
    StoreError,
};
use models::{
    ChangeType, IngestedDocument, IngestionLog, IngestionRun, IngestionStatus, NodeRecord,
    QuarantinedDocument, RelRecord,
};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;
use tree::Tree;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn append_jsonl<T: serde::Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    f.write_all(&line).map_err(|e| io_err(path, e))
}

/// Document store writing JSONL journals. Upserts are append-with-latest-
/// wins; the raw-hash index for idempotent skips is kept in memory and
/// seeded from any journal already on disk.
pub struct FileDocumentStore {
    documents_path: PathBuf,
    runs_path: PathBuf,
    logs_path: PathBuf,
    quarantine_path: PathBuf,
    hash_index: Mutex<BTreeMap<String, IngestionStatus>>,
    quarantines: Mutex<BTreeMap<String, QuarantinedDocument>>,
}

impl FileDocumentStore {
    pub fn open(out_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(out_dir).map_err(|e| io_err(out_dir, e))?;

        let documents_path = out_dir.join("ingested_documents.jsonl");
        let mut hash_index = BTreeMap::new();
        if documents_path.exists() {
            let f = std::fs::File::open(&documents_path).map_err(|e| io_err(&documents_path, e))?;
            for line in std::io::BufReader::new(f).lines() {
                let line = line.map_err(|e| io_err(&documents_path, e))?;
                if line.trim().is_empty() {
                    continue;
                }
                let doc: IngestedDocument = serde_json::from_str(&line)?;
                hash_index.insert(doc.raw.content_hash, doc.ingestion_status);
            }
        }

        Ok(Self {
            documents_path,
            runs_path: out_dir.join("ingestion_runs.jsonl"),
            logs_path: out_dir.join("logs").join("ingestion_logs.jsonl"),
            quarantine_path: out_dir.join("quarantine").join("quarantined.jsonl"),
            hash_index: Mutex::new(hash_index),
            quarantines: Mutex::new(BTreeMap::new()),
        })
    }
}

#[async_trait::async_trait]
impl DocumentStore for FileDocumentStore {
    async fn write_ingested(&self, doc: &IngestedDocument) -> Result<(), StoreError> {
        append_jsonl(&self.documents_path, doc)?;
        self.hash_index
            .lock()
            .expect("hash index lock is never poisoned")
            .insert(doc.raw.content_hash.clone(), doc.ingestion_status);
        Ok(())
    }

    async fn write_run(&self, run: &IngestionRun) -> Result<(), StoreError> {
        append_jsonl(&self.runs_path, run)
    }

    async fn quarantine(&self, record: &QuarantinedDocument) -> Result<(), StoreError> {
        // Keyed by file path: a fresh quarantine replaces the open one,
        // so the journal is rewritten from the keyed state.
        let snapshot: Vec<QuarantinedDocument> = {
            let mut quarantines = self
                .quarantines
                .lock()
                .expect("quarantine lock is never poisoned");
            quarantines.insert(record.file_path.clone(), record.clone());
            quarantines.values().cloned().collect()
        };

        if let Some(parent) = self.quarantine_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut out = Vec::new();
        for q in &snapshot {
            out.extend(serde_json::to_vec(q)?);
            out.push(b'\n');
        }
        std::fs::write(&self.quarantine_path, out).map_err(|e| io_err(&self.quarantine_path, e))
    }

    async fn log(&self, entry: &IngestionLog) -> Result<(), StoreError> {
        append_jsonl(&self.logs_path, entry)
    }

    async fn seen_processed(&self, content_hash: &str) -> Result<bool, StoreError> {
        let index = self
            .hash_index
            .lock()
            .expect("hash index lock is never poisoned");
        Ok(matches!(
            index.get(content_hash),
            Some(IngestionStatus::Processed)
        ))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredProperty {
    value: Tree,
    #[serde(with = "time::serde::rfc3339")]
    source_time: OffsetDateTime,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct StoredNode {
    #[serde(default)]
    properties: BTreeMap<String, StoredProperty>,
}

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<(String, String), StoredNode>,
    rels: BTreeMap<(String, String, String, String, String), BTreeMap<String, Tree>>,
}

/// Graph sink keeping the merged graph in memory, journaling every write,
/// and emitting `graph_snapshot.json` on close.
pub struct FileGraphSink {
    nodes_path: PathBuf,
    rels_path: PathBuf,
    snapshot_path: PathBuf,
    state: Mutex<GraphState>,
}

impl FileGraphSink {
    pub fn open(out_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(out_dir).map_err(|e| io_err(out_dir, e))?;
        let snapshot_path = out_dir.join("graph_snapshot.json");

        // Re-seed the merge state from a snapshot written by an earlier
        // run, so cross-run merges and conflict detection keep working.
        // Snapshots don't retain per-property source times; reloaded
        // values rank oldest for dynamic merges.
        let mut state = GraphState::default();
        if snapshot_path.exists() {
            let text = std::fs::read_to_string(&snapshot_path)
                .map_err(|e| io_err(&snapshot_path, e))?;
            let snapshot: serde_json::Value = serde_json::from_str(&text)?;

            for node in snapshot["nodes"].as_array().into_iter().flatten() {
                let label = node["label"].as_str().unwrap_or_default().to_string();
                let id = node["id"].as_str().unwrap_or_default().to_string();
                let mut stored = StoredNode::default();
                if let Some(properties) = node["properties"].as_object() {
                    for (name, value) in properties {
                        stored.properties.insert(
                            name.clone(),
                            StoredProperty {
                                value: Tree::from(value.clone()),
                                source_time: OffsetDateTime::UNIX_EPOCH,
                            },
                        );
                    }
                }
                state.nodes.insert((label, id), stored);
            }

            for rel in snapshot["relationships"].as_array().into_iter().flatten() {
                let key = (
                    rel["from"]["label"].as_str().unwrap_or_default().to_string(),
                    rel["from"]["id"].as_str().unwrap_or_default().to_string(),
                    rel["type"].as_str().unwrap_or_default().to_string(),
                    rel["to"]["label"].as_str().unwrap_or_default().to_string(),
                    rel["to"]["id"].as_str().unwrap_or_default().to_string(),
                );
                let properties = rel["properties"]
                    .as_object()
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|(name, value)| (name.clone(), Tree::from(value.clone())))
                            .collect()
                    })
                    .unwrap_or_default();
                state.rels.insert(key, properties);
            }
        }

        Ok(Self {
            nodes_path: out_dir.join("graph_nodes.jsonl"),
            rels_path: out_dir.join("graph_rels.jsonl"),
            snapshot_path,
            state: Mutex::new(state),
        })
    }

    fn snapshot_value(&self) -> serde_json::Value {
        let state = self.state.lock().expect("graph lock is never poisoned");

        let nodes: Vec<serde_json::Value> = state
            .nodes
            .iter()
            .map(|((label, id), node)| {
                let properties: BTreeMap<&String, &Tree> = node
                    .properties
                    .iter()
                    .map(|(name, p)| (name, &p.value))
                    .collect();
                serde_json::json!({"label": label, "id": id, "properties": properties})
            })
            .collect();

        let relationships: Vec<serde_json::Value> = state
            .rels
            .iter()
            .map(|((from_label, from_id, rel_type, to_label, to_id), properties)| {
                serde_json::json!({
                    "type": rel_type,
                    "from": {"label": from_label, "id": from_id},
                    "to": {"label": to_label, "id": to_id},
                    "properties": properties,
                })
            })
            .collect();

        serde_json::json!({"nodes": nodes, "relationships": relationships})
    }
}

#[async_trait::async_trait]
impl GraphSink for FileGraphSink {
    async fn upsert_nodes(
        &self,
        label: &str,
        rows: Vec<NodeRecord>,
        merge: &MergeSpec,
    ) -> Result<NodeUpsertOutcome, StoreError> {
        let mut outcome = NodeUpsertOutcome::default();
        let mut journal = Vec::new();

        {
            let mut state = self.state.lock().expect("graph lock is never poisoned");
            for row in rows {
                let node = state
                    .nodes
                    .entry((label.to_string(), row.node_id.clone()))
                    .or_default();

                for (name, incoming) in row.properties {
                    if incoming.is_null() {
                        continue;
                    }
                    match node.properties.get_mut(&name) {
                        None => {
                            node.properties.insert(
                                name,
                                StoredProperty {
                                    value: incoming,
                                    source_time: row.source_time,
                                },
                            );
                        }
                        Some(existing) if existing.value == incoming => {
                            existing.source_time = existing.source_time.max(row.source_time);
                        }
                        Some(existing) => match merge.change_type(&name) {
                            ChangeType::Immutable => {
                                outcome.conflicts.push(ImmutableConflict {
                                    label: label.to_string(),
                                    node_id: row.node_id.clone(),
                                    property: name,
                                    existing: existing.value.clone(),
                                    incoming,
                                });
                            }
                            ChangeType::RarelyChanged => {
                                tracing::warn!(
                                    label,
                                    node_id = %row.node_id,
                                    property = %name,
                                    "conflicting value for rarely-changed property, keeping existing",
                                );
                                outcome.merge_warnings += 1;
                            }
                            ChangeType::Dynamic => {
                                if row.source_time >= existing.source_time {
                                    existing.value = incoming;
                                    existing.source_time = row.source_time;
                                }
                            }
                        },
                    }
                }

                journal.push(serde_json::json!({"label": label, "id": row.node_id}));
                outcome.nodes_upserted += 1;
            }
        }

        for line in &journal {
            append_jsonl(&self.nodes_path, line)?;
        }
        Ok(outcome)
    }

    async fn upsert_relationships(
        &self,
        rows: Vec<RelRecord>,
    ) -> Result<RelUpsertOutcome, StoreError> {
        let mut outcome = RelUpsertOutcome::default();
        let mut journal = Vec::new();

        {
            let mut state = self.state.lock().expect("graph lock is never poisoned");
            for row in rows {
                // Soft-create endpoints so edges are insertable in any
                // document order.
                for (label, id) in [
                    (&row.from_label, &row.from_id),
                    (&row.to_label, &row.to_id),
                ] {
                    state
                        .nodes
                        .entry((label.clone(), id.clone()))
                        .or_default();
                }

                let properties = state.rels.entry(row.unique_key()).or_default();
                for (name, value) in &row.properties {
                    properties.insert(name.clone(), value.clone());
                }

                journal.push(serde_json::json!({
                    "type": row.rel_type,
                    "from": {"label": row.from_label, "id": row.from_id},
                    "to": {"label": row.to_label, "id": row.to_id},
                }));
                outcome.relationships_created += 1;
            }
        }

        for line in &journal {
            append_jsonl(&self.rels_path, line)?;
        }
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let snapshot = self.snapshot_value();
        let text = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.snapshot_path, text).map_err(|e| io_err(&self.snapshot_path, e))
    }
}
