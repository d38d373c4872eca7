//! Sink interfaces of the pipeline: the document store (ingestion
//! records, runs, quarantines, structured logs) and the graph sink
//! (merge-by-id node and relationship upserts). Both have a file-backed
//! implementation (JSONL journals plus a final snapshot) and a Postgres
//! implementation. Sinks are shared across workers and must be safe for
//! concurrent upserts.

use models::{ChangeType, IngestedDocument, IngestionLog, IngestionRun, QuarantinedDocument};
use std::collections::BTreeMap;
use tree::Tree;

pub mod file;
pub mod postgres;
mod retry;

pub use file::{FileDocumentStore, FileGraphSink};
pub use postgres::{PgDocumentStore, PgGraphSink};
pub use retry::with_retries;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether a bounded retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io { .. } => true,
            StoreError::Database(_) => true,
            StoreError::Serialization(_) => false,
        }
    }
}

/// Property-level merge behavior for one label's batch, assembled from
/// the entity schema by the upsert engine.
#[derive(Debug, Clone, Default)]
pub struct MergeSpec {
    change_types: BTreeMap<String, ChangeType>,
}

impl MergeSpec {
    pub fn new(change_types: BTreeMap<String, ChangeType>) -> Self {
        Self { change_types }
    }

    pub fn change_type(&self, property: &str) -> ChangeType {
        self.change_types
            .get(property)
            .copied()
            .unwrap_or_default()
    }
}

/// An attempted overwrite of an `immutable` property. The existing value
/// is always retained; the offending document is quarantined upstream.
#[derive(Debug, Clone)]
pub struct ImmutableConflict {
    pub label: String,
    pub node_id: String,
    pub property: String,
    pub existing: Tree,
    pub incoming: Tree,
}

#[derive(Debug, Default)]
pub struct NodeUpsertOutcome {
    pub nodes_upserted: u64,
    pub merge_warnings: u64,
    pub conflicts: Vec<ImmutableConflict>,
}

#[derive(Debug, Default)]
pub struct RelUpsertOutcome {
    pub relationships_created: u64,
}

/// The document store: per-document records, run records, quarantines,
/// and the append-only structured log.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upsert by `document_id`.
    async fn write_ingested(&self, doc: &IngestedDocument) -> Result<(), StoreError>;

    /// Upsert by `run_id`.
    async fn write_run(&self, run: &IngestionRun) -> Result<(), StoreError>;

    /// Insert, replacing any open quarantine for the same `file_path`.
    async fn quarantine(&self, record: &QuarantinedDocument) -> Result<(), StoreError>;

    /// Append-only.
    async fn log(&self, entry: &IngestionLog) -> Result<(), StoreError>;

    /// Whether a document with this raw content hash already reached the
    /// terminal `processed` state — the idempotent-skip check.
    async fn seen_processed(&self, content_hash: &str) -> Result<bool, StoreError>;
}

/// The graph sink. Upserts are idempotent merges by node id;
/// relationship endpoints that do not exist yet are soft-created so
/// insertion order across documents never matters.
#[async_trait::async_trait]
pub trait GraphSink: Send + Sync {
    async fn upsert_nodes(
        &self,
        label: &str,
        rows: Vec<models::NodeRecord>,
        merge: &MergeSpec,
    ) -> Result<NodeUpsertOutcome, StoreError>;

    async fn upsert_relationships(
        &self,
        rows: Vec<models::RelRecord>,
    ) -> Result<RelUpsertOutcome, StoreError>;

    /// Flush and release sessions.
    async fn close(&self) -> Result<(), StoreError>;
}
