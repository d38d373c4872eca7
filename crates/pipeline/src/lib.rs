//! The ingestion orchestrator: drives one document at a time through
//! read → canonicalize → resolve → map → identify → relate → upsert,
//! records every stage in the document store, quarantines failures
//! without aborting the run, and fans documents out across a bounded
//! worker pool.

use models::{
    CanonicalContent, DocumentClassification, FailureCategory, FailureInfo, IngestedDocument,
    IngestionLog, IngestionRun, IngestionStatus, LogStatus, ParseStatus, QuarantinedDocument,
    RawContent, RawDocument, RunStatus, SchemaRef,
};
use registry::{Registry, Resolution};
use std::collections::BTreeMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{DocumentStore, GraphSink, StoreError};
use time::OffsetDateTime;

pub mod config;
pub mod identity;
pub mod mapper;
pub mod relation;
pub mod upsert;

pub use config::{load_registry, open_stores, BackendKind, Config};

type Details = BTreeMap<String, serde_json::Value>;

fn details<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Details {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

enum StageOutcome {
    Processed,
    Quarantine {
        category: FailureCategory,
        message: String,
        details: Details,
    },
}

pub struct IngestionPipeline {
    run_id: String,
    registry: Arc<Registry>,
    docs: Arc<dyn DocumentStore>,
    graph: Arc<dyn GraphSink>,
    run: Mutex<IngestionRun>,
    document_timeout: Duration,
    batch_size: usize,
    workers: usize,
}

impl IngestionPipeline {
    pub async fn new(
        config: &Config,
        registry: Arc<Registry>,
        docs: Arc<dyn DocumentStore>,
        graph: Arc<dyn GraphSink>,
    ) -> anyhow::Result<Self> {
        let run_id = config
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let run = IngestionRun::new(run_id.clone());
        docs.write_run(&run).await?;

        tracing::info!(run_id = %run_id, "ingestion run started");
        Ok(Self {
            run_id,
            registry,
            docs,
            graph,
            run: Mutex::new(run),
            document_timeout: config.document_timeout(),
            batch_size: config.batch_size,
            workers: config.workers,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ingest a set of files through the bounded worker pool. Parallel
    /// across documents, single-threaded within one; the sender blocks
    /// when the channel is full, which is the reader backpressure.
    pub async fn run(self: &Arc<Self>, paths: Vec<PathBuf>) -> anyhow::Result<()> {
        let workers = self.workers.max(1);
        let (tx, rx) = tokio::sync::mpsc::channel::<PathBuf>(workers * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let pipeline = Arc::clone(self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(path) = next else { break };
                    pipeline.process_path(&path).await;
                }
                tracing::debug!(worker, "ingestion worker drained");
            }));
        }

        for path in paths {
            if tx.send(path).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut panicked = false;
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "ingestion worker panicked");
                panicked = true;
            }
        }
        if panicked {
            self.update_run(|run| run.status = RunStatus::Failed).await?;
            anyhow::bail!("one or more ingestion workers panicked");
        }
        Ok(())
    }

    /// Finalize the run record and flush the graph sink.
    /// The run is a warning if anything was quarantined, success
    /// otherwise; `failed` is reserved for orchestrator-level errors.
    pub async fn close(&self) -> anyhow::Result<IngestionRun> {
        let snapshot = {
            let mut run = self.run.lock().expect("run lock is never poisoned");
            run.finished_at = Some(OffsetDateTime::now_utc());
            if run.status == RunStatus::Running {
                run.status = if run.metrics.documents_quarantined > 0 {
                    RunStatus::Warning
                } else {
                    RunStatus::Success
                };
            }
            run.clone()
        };
        self.write_run(&snapshot).await?;
        store::with_retries("close_graph", || self.graph.close()).await?;

        tracing::info!(
            run_id = %snapshot.run_id,
            status = ?snapshot.status,
            processed = snapshot.metrics.documents_processed,
            quarantined = snapshot.metrics.documents_quarantined,
            "ingestion run finished",
        );
        Ok(snapshot)
    }

    async fn process_path(&self, file_path: &FsPath) {
        if let Err(error) = self.ingest_file(file_path).await {
            // Only store failures while recording outcomes land here;
            // per-document failures are handled inside.
            tracing::error!(
                file_path = %file_path.display(),
                error = ?error,
                "failed to record document outcome",
            );
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(run_id = %self.run_id))]
    async fn ingest_file(&self, file_path: &FsPath) -> anyhow::Result<()> {
        let display_path = file_path.display().to_string();
        let document_id =
            tree::sha256_hex(format!("{display_path}|{}", self.run_id).as_bytes());

        let bytes = match tokio::fs::read(file_path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.log(
                    None,
                    "read_document",
                    LogStatus::Error,
                    format!("failed to read {display_path}: {error}"),
                    details([("file_path", serde_json::json!(display_path))]),
                )
                .await;
                return Ok(());
            }
        };
        let raw = canonical::raw_from_bytes(display_path.clone(), bytes.into());

        // Idempotence by raw hash: a document already processed in a
        // terminal state is skipped, not re-upserted.
        if store::with_retries("seen_processed", || {
            self.docs.seen_processed(&raw.content_hash)
        })
        .await?
        {
            self.log(
                Some(&document_id),
                "read_document",
                LogStatus::Skipped,
                format!("{display_path} already processed, skipping"),
                details([("content_hash", serde_json::json!(raw.content_hash))]),
            )
            .await;
            self.update_run(|run| run.metrics.documents_skipped += 1)
                .await?;
            return Ok(());
        }

        let mut record = IngestedDocument::new(
            document_id.clone(),
            self.run_id.clone(),
            RawContent {
                file_path: display_path,
                source_system: "fs".to_string(),
                content_type: raw.content_type.clone(),
                encoding: raw.encoding.clone(),
                content_hash: raw.content_hash.clone(),
            },
        );
        self.persist_document(&record).await?;
        self.log(
            Some(&document_id),
            "read_document",
            LogStatus::Success,
            "raw document registered",
            Details::new(),
        )
        .await;

        let staged = tokio::time::timeout(
            self.document_timeout,
            self.ingest_stages(&mut record, &raw),
        )
        .await;

        match staged {
            Err(_elapsed) => {
                // Partial upserts are not rolled back; a later retry of
                // the same document is idempotent.
                self.fail(
                    &mut record,
                    FailureCategory::Timeout,
                    format!(
                        "document exceeded its {}s processing budget",
                        self.document_timeout.as_secs(),
                    ),
                )
                .await?;
            }
            Ok(Err(error)) => {
                let category = if error.downcast_ref::<StoreError>().is_some() {
                    FailureCategory::SinkError
                } else {
                    FailureCategory::Other
                };
                self.fail(&mut record, category, format!("{error:#}")).await?;
            }
            Ok(Ok(StageOutcome::Processed)) => {
                record.ingestion_status = IngestionStatus::Processed;
                record.touch();
                self.persist_document(&record).await?;
                self.update_run(|run| run.metrics.documents_processed += 1)
                    .await?;
                self.log(
                    Some(&record.document_id),
                    "finalize",
                    LogStatus::Success,
                    "document processed",
                    details([(
                        "write_summary",
                        serde_json::to_value(record.write_summary)?,
                    )]),
                )
                .await;
            }
            Ok(Ok(StageOutcome::Quarantine {
                category,
                message,
                details,
            })) => {
                self.quarantine(&mut record, category, message, details)
                    .await?;
            }
        }
        Ok(())
    }

    async fn ingest_stages(
        &self,
        record: &mut IngestedDocument,
        raw: &RawDocument,
    ) -> anyhow::Result<StageOutcome> {
        let document_id = record.document_id.clone();

        // Canonicalize.
        let doc = canonical::canonicalize(raw);
        record.canonical = Some(CanonicalContent {
            format: "canonical_json_v1".to_string(),
            hash: doc.canonical_hash.clone(),
        });
        if let Some(error) = &doc.parse_error {
            record.parse_status = ParseStatus::ParseError;
            return Ok(StageOutcome::Quarantine {
                category: FailureCategory::ParseError,
                message: error.clone(),
                details: details([("content_type", serde_json::json!(raw.content_type))]),
            });
        }
        record.touch();
        self.persist_document(record).await?;
        self.log(
            Some(&document_id),
            "canonicalize",
            LogStatus::Success,
            format!("canonical hash {}", doc.canonical_hash),
            Details::new(),
        )
        .await;

        // Resolve the variant.
        let root = doc.to_tree();
        let variant = match registry::resolve_variant(&self.registry, &root) {
            Resolution::NoMatch { attempts } => {
                return Ok(StageOutcome::Quarantine {
                    category: FailureCategory::SchemaNotFound,
                    message: "no schema variant matched".to_string(),
                    details: details([("attempts", serde_json::to_value(attempts)?)]),
                });
            }
            Resolution::Ambiguous {
                score,
                tied,
                attempts,
            } => {
                return Ok(StageOutcome::Quarantine {
                    category: FailureCategory::VariantAmbiguous,
                    message: format!("{} variants tied at score {score}", tied.len()),
                    details: details([
                        ("tied", serde_json::json!(tied)),
                        ("attempts", serde_json::to_value(attempts)?),
                    ]),
                });
            }
            Resolution::Match {
                register,
                variant,
                score,
            } => {
                record.classification = Some(DocumentClassification {
                    registry_code: register.registry_code.clone(),
                    service_code: register.service_code.clone(),
                    method_code: register.method_code.clone(),
                });
                record.schema_ref = Some(SchemaRef {
                    register_schema: register.registry_code.clone(),
                    variant_id: variant.variant_id.clone(),
                });
                record.touch();
                self.persist_document(record).await?;
                self.log(
                    Some(&document_id),
                    "resolve_schema",
                    LogStatus::Success,
                    format!("selected variant {}", variant.variant_id),
                    details([("score", serde_json::json!(score))]),
                )
                .await;
                variant
            }
        };

        // Map, identify, relate.
        let mut mapped = match mapper::map_document(&document_id, &root, variant) {
            Ok(mapped) => mapped,
            Err(error) => {
                return Ok(StageOutcome::Quarantine {
                    category: FailureCategory::MappingError,
                    message: error.to_string(),
                    details: details([
                        ("mapping_id", serde_json::json!(error.mapping_id)),
                        ("path", serde_json::json!(error.path)),
                    ]),
                });
            }
        };
        for warning in &mapped.warnings {
            self.log(
                Some(&document_id),
                "map_entities",
                LogStatus::Warning,
                warning.clone(),
                Details::new(),
            )
            .await;
        }
        self.log(
            Some(&document_id),
            "map_entities",
            LogStatus::Success,
            format!("mapped {} entity instances", mapped.instances.len()),
            Details::new(),
        )
        .await;

        identity::assign_node_ids(&mut mapped.instances, &self.registry, &document_id);
        let relationships =
            relation::build_relationships(&self.registry, &mapped.instances, &document_id);
        self.log(
            Some(&document_id),
            "resolve_relationships",
            LogStatus::Success,
            format!("built {} relationships", relationships.len()),
            Details::new(),
        )
        .await;

        // Upsert.
        let outcome = upsert::upsert_document(
            &*self.graph,
            &self.registry,
            &mapped.instances,
            &relationships,
            &document_id,
            OffsetDateTime::now_utc(),
            self.batch_size,
        )
        .await?;
        record.write_summary = outcome.summary;
        self.log(
            Some(&document_id),
            "upsert_graph",
            LogStatus::Success,
            format!(
                "upserted {} nodes and {} relationships",
                outcome.summary.nodes_upserted, outcome.summary.relationships_created,
            ),
            Details::new(),
        )
        .await;
        self.update_run(|run| {
            run.metrics.entities_extracted += mapped.instances.len() as u64;
            run.metrics.entities_upserted += outcome.summary.nodes_upserted;
            run.metrics.relationships_created += outcome.summary.relationships_created;
            run.metrics.immutable_conflicts += outcome.conflicts.len() as u64;
        })
        .await?;

        if !outcome.conflicts.is_empty() {
            let conflicts: Vec<serde_json::Value> = outcome
                .conflicts
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "label": c.label,
                        "node_id": c.node_id,
                        "property": c.property,
                    })
                })
                .collect();
            return Ok(StageOutcome::Quarantine {
                category: FailureCategory::ImmutableConflict,
                message: format!(
                    "{} immutable properties conflicted with existing nodes",
                    outcome.conflicts.len(),
                ),
                details: details([("conflicts", serde_json::json!(conflicts))]),
            });
        }

        Ok(StageOutcome::Processed)
    }

    async fn quarantine(
        &self,
        record: &mut IngestedDocument,
        category: FailureCategory,
        message: String,
        details: Details,
    ) -> anyhow::Result<()> {
        record.ingestion_status = IngestionStatus::Quarantined;
        record.failure = Some(FailureInfo {
            category,
            message: message.clone(),
            details: details.clone(),
        });
        record.touch();
        self.persist_document(record).await?;

        let quarantined = QuarantinedDocument {
            document_id: record.document_id.clone(),
            file_path: record.raw.file_path.clone(),
            content_hash: record.raw.content_hash.clone(),
            reason: category,
            message: message.clone(),
            details: details.clone(),
            created_at: OffsetDateTime::now_utc(),
            status: Default::default(),
        };
        store::with_retries("quarantine", || self.docs.quarantine(&quarantined)).await?;

        self.update_run(|run| {
            run.metrics.documents_quarantined += 1;
            run.status = RunStatus::Warning;
        })
        .await?;
        self.log(
            Some(&record.document_id),
            "quarantine",
            LogStatus::Error,
            message,
            details,
        )
        .await;
        Ok(())
    }

    async fn fail(
        &self,
        record: &mut IngestedDocument,
        category: FailureCategory,
        message: String,
    ) -> anyhow::Result<()> {
        record.ingestion_status = IngestionStatus::Failed;
        record.failure = Some(FailureInfo {
            category,
            message: message.clone(),
            details: Details::new(),
        });
        record.touch();
        self.persist_document(record).await?;
        self.update_run(|run| run.metrics.documents_failed += 1)
            .await?;
        self.log(
            Some(&record.document_id),
            "finalize",
            LogStatus::Error,
            message,
            details([("category", serde_json::to_value(category)?)]),
        )
        .await;
        Ok(())
    }

    async fn persist_document(&self, record: &IngestedDocument) -> Result<(), StoreError> {
        store::with_retries("write_ingested", || self.docs.write_ingested(record)).await
    }

    async fn write_run(&self, run: &IngestionRun) -> Result<(), StoreError> {
        store::with_retries("write_run", || self.docs.write_run(run)).await
    }

    async fn update_run(&self, f: impl FnOnce(&mut IngestionRun)) -> Result<(), StoreError> {
        let snapshot = {
            let mut run = self.run.lock().expect("run lock is never poisoned");
            f(&mut run);
            run.clone()
        };
        self.write_run(&snapshot).await
    }

    /// Append a structured log record, mirrored to tracing. Log sink
    /// failures degrade to a process-level warning; they never fail the
    /// document.
    async fn log(
        &self,
        document_id: Option<&str>,
        step: &str,
        status: LogStatus,
        message: impl Into<String>,
        details: Details,
    ) {
        let message = message.into();
        match status {
            LogStatus::Error => {
                tracing::error!(step, document_id = document_id.unwrap_or(""), "{message}")
            }
            LogStatus::Warning => {
                tracing::warn!(step, document_id = document_id.unwrap_or(""), "{message}")
            }
            _ => tracing::info!(step, document_id = document_id.unwrap_or(""), "{message}"),
        }

        let entry = IngestionLog {
            run_id: self.run_id.clone(),
            document_id: document_id.map(String::from),
            ts: OffsetDateTime::now_utc(),
            step: step.to_string(),
            status,
            message,
            details,
        };
        if let Err(error) = self.docs.log(&entry).await {
            tracing::warn!(error = %error, "failed to append ingestion log");
        }
    }
}
