use anyhow::Context;
use registry::Registry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use store::{
    DocumentStore, FileDocumentStore, FileGraphSink, GraphSink, PgDocumentStore, PgGraphSink,
};
use std::time::Duration;

/// Backend selector shared by the schema registry, document store, and
/// graph sink.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    File,
    Postgres,
}

/// The single configuration record of the pipeline. Assembled by the
/// outer command; everything here is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory of schema JSON files (file schema backend).
    pub schemas_dir: PathBuf,
    /// Output directory for the file-backed stores.
    pub out_dir: PathBuf,
    #[serde(default)]
    pub schema_backend: BackendKind,
    #[serde(default)]
    pub store_backend: BackendKind,
    #[serde(default)]
    pub graph_backend: BackendKind,
    /// Connection string for any Postgres-backed component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_url: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fixed run id; a random one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

fn default_workers() -> usize {
    8
}
fn default_document_timeout_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    500
}

impl Config {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    fn postgres_url(&self) -> anyhow::Result<&str> {
        self.postgres_url
            .as_deref()
            .context("a postgres backend is selected but postgres_url is not configured")
    }
}

/// Load the schema registry per the configured backend.
pub async fn load_registry(config: &Config) -> anyhow::Result<Registry> {
    match config.schema_backend {
        BackendKind::File => Registry::from_dir(&config.schemas_dir).with_context(|| {
            format!("loading schemas from {}", config.schemas_dir.display())
        }),
        BackendKind::Postgres => {
            let pool = store::postgres::connect_pool(config.postgres_url()?, 2).await?;
            let registry = Registry::from_postgres(&pool).await?;
            pool.close().await;
            Ok(registry)
        }
    }
}

/// Open the document store and graph sink per the configured backends.
pub async fn open_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn DocumentStore>, Arc<dyn GraphSink>)> {
    let pool = match (config.store_backend, config.graph_backend) {
        (BackendKind::File, BackendKind::File) => None,
        _ => Some(
            store::postgres::connect_pool(config.postgres_url()?, config.workers as u32 + 2)
                .await?,
        ),
    };

    let docs: Arc<dyn DocumentStore> = match config.store_backend {
        BackendKind::File => Arc::new(FileDocumentStore::open(&config.out_dir)?),
        BackendKind::Postgres => Arc::new(
            PgDocumentStore::open(pool.clone().context("postgres pool not opened")?).await?,
        ),
    };

    let graph: Arc<dyn GraphSink> = match config.graph_backend {
        BackendKind::File => Arc::new(FileGraphSink::open(&config.out_dir)?),
        BackendKind::Postgres => Arc::new(
            PgGraphSink::open(pool.context("postgres pool not opened")?).await?,
        ),
    };

    Ok((docs, graph))
}
