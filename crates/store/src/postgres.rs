//! Postgres-backed stores: documents as JSONB rows, the graph as node and
//! edge tables with merge-on-conflict upserts. Property-level merge
//! policy is applied read-modify-write inside a transaction, since the
//! sink — not the database — knows each property's change type.

use crate::{
    DocumentStore, GraphSink, ImmutableConflict, MergeSpec, NodeUpsertOutcome, RelUpsertOutcome,
    StoreError,
};
use models::{
    ChangeType, IngestedDocument, IngestionLog, IngestionRun, NodeRecord, QuarantinedDocument,
    RelRecord,
};
use sqlx::PgPool;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Open a connection pool sized for the worker count.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

fn status_text<T: serde::Serialize>(status: T) -> Result<String, StoreError> {
    Ok(serde_json::to_value(status)?
        .as_str()
        .unwrap_or_default()
        .to_string())
}

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn open(pool: PgPool) -> Result<Self, StoreError> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS ingested_documents (
                document_id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                ingestion_status TEXT NOT NULL,
                doc JSONB NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS ingested_documents_content_hash
                ON ingested_documents (content_hash)",
            "CREATE TABLE IF NOT EXISTS ingestion_runs (
                run_id TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS ingestion_logs (
                seq BIGSERIAL PRIMARY KEY,
                doc JSONB NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS quarantined_documents (
                file_path TEXT PRIMARY KEY,
                doc JSONB NOT NULL
            )",
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl DocumentStore for PgDocumentStore {
    async fn write_ingested(&self, doc: &IngestedDocument) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ingested_documents (document_id, content_hash, ingestion_status, doc)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (document_id) DO UPDATE
               SET content_hash = EXCLUDED.content_hash,
                   ingestion_status = EXCLUDED.ingestion_status,
                   doc = EXCLUDED.doc",
        )
        .bind(&doc.document_id)
        .bind(&doc.raw.content_hash)
        .bind(status_text(doc.ingestion_status)?)
        .bind(serde_json::to_value(doc)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_run(&self, run: &IngestionRun) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ingestion_runs (run_id, doc) VALUES ($1, $2)
             ON CONFLICT (run_id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(&run.run_id)
        .bind(serde_json::to_value(run)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn quarantine(&self, record: &QuarantinedDocument) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO quarantined_documents (file_path, doc) VALUES ($1, $2)
             ON CONFLICT (file_path) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(&record.file_path)
        .bind(serde_json::to_value(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log(&self, entry: &IngestionLog) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO ingestion_logs (doc) VALUES ($1)")
            .bind(serde_json::to_value(entry)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seen_processed(&self, content_hash: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM ingested_documents
             WHERE content_hash = $1 AND ingestion_status = 'processed'
             LIMIT 1",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

pub struct PgGraphSink {
    pool: PgPool,
}

impl PgGraphSink {
    pub async fn open(pool: PgPool) -> Result<Self, StoreError> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS graph_nodes (
                label TEXT NOT NULL,
                id TEXT NOT NULL,
                properties JSONB NOT NULL DEFAULT '{}'::jsonb,
                prop_times JSONB NOT NULL DEFAULT '{}'::jsonb,
                PRIMARY KEY (label, id)
            )",
            "CREATE TABLE IF NOT EXISTS graph_edges (
                from_label TEXT NOT NULL,
                from_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                to_label TEXT NOT NULL,
                to_id TEXT NOT NULL,
                properties JSONB NOT NULL DEFAULT '{}'::jsonb,
                PRIMARY KEY (from_label, from_id, rel_type, to_label, to_id)
            )",
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn parse_time(value: Option<&serde_json::Value>) -> OffsetDateTime {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[async_trait::async_trait]
impl GraphSink for PgGraphSink {
    async fn upsert_nodes(
        &self,
        label: &str,
        rows: Vec<NodeRecord>,
        merge: &MergeSpec,
    ) -> Result<NodeUpsertOutcome, StoreError> {
        let mut outcome = NodeUpsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = rows.iter().map(|row| row.node_id.clone()).collect();
        let existing: Vec<(String, serde_json::Value, serde_json::Value)> = sqlx::query_as(
            "SELECT id, properties, prop_times FROM graph_nodes
             WHERE label = $1 AND id = ANY($2)
             FOR UPDATE",
        )
        .bind(label)
        .bind(&ids)
        .fetch_all(&mut tx)
        .await?;

        let mut current: BTreeMap<String, (serde_json::Value, serde_json::Value)> = existing
            .into_iter()
            .map(|(id, properties, times)| (id, (properties, times)))
            .collect();

        for row in rows {
            let (properties, times) = current
                .entry(row.node_id.clone())
                .or_insert_with(|| (serde_json::json!({}), serde_json::json!({})));
            let row_time = row
                .source_time
                .format(&Rfc3339)
                .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());

            for (name, incoming) in &row.properties {
                if incoming.is_null() {
                    continue;
                }
                let incoming_value = serde_json::Value::from(incoming);
                let slot = properties.get(name.as_str()).cloned();

                match slot {
                    None => {
                        properties[name.as_str()] = incoming_value;
                        times[name.as_str()] = serde_json::json!(row_time);
                    }
                    Some(existing_value) if existing_value == incoming_value => {}
                    Some(existing_value) => match merge.change_type(name) {
                        ChangeType::Immutable => outcome.conflicts.push(ImmutableConflict {
                            label: label.to_string(),
                            node_id: row.node_id.clone(),
                            property: name.clone(),
                            existing: tree::Tree::from(existing_value),
                            incoming: incoming.clone(),
                        }),
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
                            let stored_at = parse_time(times.get(name.as_str()));
                            if row.source_time >= stored_at {
                                properties[name.as_str()] = incoming_value;
                                times[name.as_str()] = serde_json::json!(row_time);
                            }
                        }
                    },
                }
            }

            sqlx::query(
                "INSERT INTO graph_nodes (label, id, properties, prop_times)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (label, id) DO UPDATE
                   SET properties = EXCLUDED.properties,
                       prop_times = EXCLUDED.prop_times",
            )
            .bind(label)
            .bind(&row.node_id)
            .bind(&*properties)
            .bind(&*times)
            .execute(&mut tx)
            .await?;
            outcome.nodes_upserted += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn upsert_relationships(
        &self,
        rows: Vec<RelRecord>,
    ) -> Result<RelUpsertOutcome, StoreError> {
        let mut outcome = RelUpsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for row in rows {
            for (label, id) in [
                (&row.from_label, &row.from_id),
                (&row.to_label, &row.to_id),
            ] {
                sqlx::query(
                    "INSERT INTO graph_nodes (label, id) VALUES ($1, $2)
                     ON CONFLICT (label, id) DO NOTHING",
                )
                .bind(label)
                .bind(id)
                .execute(&mut tx)
                .await?;
            }

            sqlx::query(
                "INSERT INTO graph_edges (from_label, from_id, rel_type, to_label, to_id, properties)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (from_label, from_id, rel_type, to_label, to_id) DO UPDATE
                   SET properties = graph_edges.properties || EXCLUDED.properties",
            )
            .bind(&row.from_label)
            .bind(&row.from_id)
            .bind(&row.rel_type)
            .bind(&row.to_label)
            .bind(&row.to_id)
            .bind(serde_json::to_value(&row.properties)?)
            .execute(&mut tx)
            .await?;
            outcome.relationships_created += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
