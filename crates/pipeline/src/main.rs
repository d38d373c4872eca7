use anyhow::Context;
use clap::Parser;
use models::RunStatus;
use pipeline::{BackendKind, Config, IngestionPipeline};
use std::path::PathBuf;
use std::sync::Arc;

/// regraph ingests registry documents into a typed property graph.
#[derive(Debug, Parser)]
#[clap(name = "regraph", version)]
struct Args {
    /// Input file or directory (scanned recursively).
    #[clap(long, env = "REGRAPH_INPUT")]
    input: PathBuf,

    /// Directory of schema JSON files.
    #[clap(long, env = "REGRAPH_SCHEMAS", default_value = "schemas")]
    schemas: PathBuf,

    /// Output directory for the file-backed stores.
    #[clap(long, env = "REGRAPH_OUT", default_value = "out")]
    out_dir: PathBuf,

    #[clap(long, value_enum, default_value = "file")]
    schema_backend: BackendKind,

    #[clap(long, value_enum, default_value = "file")]
    store_backend: BackendKind,

    #[clap(long, value_enum, default_value = "file")]
    graph_backend: BackendKind,

    /// Connection string for any Postgres-backed component.
    #[clap(long, env = "REGRAPH_POSTGRES_URL")]
    postgres_url: Option<String>,

    /// Concurrent document workers.
    #[clap(long, default_value_t = 8)]
    workers: usize,

    /// Per-document wall-clock budget, in seconds.
    #[clap(long, default_value_t = 60)]
    document_timeout: u64,

    /// Rows per sink batch.
    #[clap(long, default_value_t = 500)]
    batch_size: usize,

    /// Fixed run id; random when omitted.
    #[clap(long)]
    run_id: Option<String>,
}

fn collect_files(root: &PathBuf) -> anyhow::Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.clone()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("reading input directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config {
        schemas_dir: args.schemas,
        out_dir: args.out_dir,
        schema_backend: args.schema_backend,
        store_backend: args.store_backend,
        graph_backend: args.graph_backend,
        postgres_url: args.postgres_url,
        workers: args.workers,
        document_timeout_secs: args.document_timeout,
        batch_size: args.batch_size,
        run_id: args.run_id,
    };

    let paths = collect_files(&args.input)?;
    anyhow::ensure!(!paths.is_empty(), "no input files under {}", args.input.display());

    let registry = Arc::new(pipeline::load_registry(&config).await?);
    let (docs, graph) = pipeline::open_stores(&config).await?;

    let ingest = Arc::new(IngestionPipeline::new(&config, registry, docs, graph).await?);
    ingest.run(paths).await?;
    let run = ingest.close().await?;

    println!(
        "run {} finished: {} processed, {} quarantined, {} failed, {} skipped; \
         {} nodes upserted, {} relationships created",
        run.run_id,
        run.metrics.documents_processed,
        run.metrics.documents_quarantined,
        run.metrics.documents_failed,
        run.metrics.documents_skipped,
        run.metrics.entities_upserted,
        run.metrics.relationships_created,
    );

    Ok(match run.status {
        RunStatus::Failed => std::process::ExitCode::FAILURE,
        _ => std::process::ExitCode::SUCCESS,
    })
}
