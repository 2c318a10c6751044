use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use meter_client::db::{InMemoryStore, PgStore, Store};
use meter_ingest::{
    config::{AppConfig, StoreConfig, StoreKind},
    detect::detect_format,
    fingerprint::fingerprint,
    observability,
    pipeline::{run_batch, BatchSummary, FileOutcome, Importer},
};

#[derive(Parser)]
#[command(name = "meter-ingest", about = "Import meter reading flow files into the reading store")]
struct Cli {
    /// Config file; defaults to $METER_IMPORT_CONFIG, then meter-import.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import files in the order given.
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Record failures and carry on with the remaining files.
        #[arg(long)]
        continue_on_error: bool,
        /// Files imported at the same time.
        #[arg(long)]
        concurrency: Option<usize>,
        /// One JSON object per file on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Print fingerprint and detected format without touching the store.
    Inspect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Create the tables in the configured Postgres database.
    Schema,
}

async fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn Store>> {
    match cfg.kind {
        StoreKind::Postgres => {
            if cfg.uri.is_empty() {
                anyhow::bail!("store.uri is required for the postgres store");
            }
            Ok(Arc::new(PgStore::connect(&cfg.uri, cfg.max_connections).await?))
        }
        StoreKind::Memory => {
            tracing::warn!("using the in-memory store; nothing is kept after this run");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

fn print_outcomes(summary: &BatchSummary, json: bool) -> Result<()> {
    for outcome in &summary.outcomes {
        if json {
            println!("{}", serde_json::to_string(outcome)?);
            continue;
        }
        match outcome {
            FileOutcome::Imported { path, report } => println!(
                "imported {} [{}] records={} meters+{} readings+{} duplicates={} skipped={}",
                path.display(),
                report.format,
                report.record_count,
                report.stats.meters_created,
                report.stats.readings_created,
                report.stats.duplicates_skipped,
                report.stats.records_skipped,
            ),
            FileOutcome::Skipped { path, reason } => println!("skipped  {}: {reason}", path.display()),
            FileOutcome::Failed { path, error } => println!("failed   {}: {error}", path.display()),
        }
    }
    if !json {
        println!(
            "{} imported, {} skipped, {} failed",
            summary.imported(),
            summary.skipped(),
            summary.failed()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { paths } => {
            for path in paths {
                let bytes = tokio::fs::read(&path).await?;
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                println!("{}  {}  {}", fingerprint(&bytes), detect_format(&name, &bytes), path.display());
            }
        }
        Command::Schema => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            if cfg.store.kind != StoreKind::Postgres {
                anyhow::bail!("schema only applies to the postgres store");
            }
            PgStore::connect(&cfg.store.uri, cfg.store.max_connections)
                .await?
                .apply_schema()
                .await?;
            tracing::info!("schema applied");
        }
        Command::Import {
            paths,
            continue_on_error,
            concurrency,
            json,
        } => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            let store = open_store(&cfg.store).await?;
            let importer = Importer::new(store, cfg.import.import_options());

            let mut batch = cfg.import.batch_options();
            batch.continue_on_error |= continue_on_error;
            if let Some(concurrency) = concurrency {
                batch.concurrency = concurrency;
            }

            match run_batch(&importer, &paths, &batch).await {
                Ok(summary) => {
                    print_outcomes(&summary, json)?;
                    tracing::info!(
                        imported = summary.imported(),
                        skipped = summary.skipped(),
                        failed = summary.failed(),
                        "batch finished"
                    );
                    if summary.failed() > 0 {
                        anyhow::bail!("{} of {} files failed", summary.failed(), paths.len());
                    }
                }
                Err(aborted) => {
                    print_outcomes(&aborted.summary, json)?;
                    return Err(aborted.into());
                }
            }
        }
    }

    Ok(())
}
