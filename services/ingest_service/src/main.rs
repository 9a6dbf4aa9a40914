//! Ingestion Service
//!
//! Responsibilities:
//! - Read ProviderGameRecord batches (JSON Lines) dropped by the scraping
//!   adapters into the batch directory
//! - Run the game ingestion pipeline (resolve identities, dedupe, insert)
//! - Fold approved review decisions back into the alias table and
//!   re-resolve flagged games
//! - Log per-batch metrics; processed files are renamed `.done`
//!
//! Whole batches are safe to re-run: ingestion is idempotent, so a crashed
//! or retried run never duplicates games or aliases.

use anyhow::{Context, Result};
use dotenv::dotenv;
use pitchrank_core::db::retry::execute_with_retry;
use pitchrank_core::db::{create_default_pool, PgStore};
use pitchrank_core::ingest::GameIngestPipeline;
use pitchrank_core::models::ProviderGameRecord;
use pitchrank_core::{IngestConfig, ResolverConfig};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default directory watched for `*.jsonl` batch files.
const DEFAULT_BATCH_DIR: &str = "./batches";

/// Attempts per store round-trip before the run is declared failed.
const MAX_DB_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let batch_dir = env::var("BATCH_DIR").unwrap_or_else(|_| DEFAULT_BATCH_DIR.to_string());
    let pool = create_default_pool().await?;
    let store = Arc::new(PgStore::new(pool));

    let pipeline = GameIngestPipeline::new(
        store.clone(),
        store.clone(),
        ResolverConfig::from_env(),
        IngestConfig::from_env(),
    );

    let files = batch_files(Path::new(&batch_dir))?;
    if files.is_empty() {
        info!(dir = %batch_dir, "no batch files to ingest");
    }

    for file in files {
        let records = read_batch(&file)?;
        info!(file = %file.display(), records = records.len(), "ingesting batch");

        let metrics = execute_with_retry(
            "ingest-batch",
            || {
                let pipeline = &pipeline;
                let records = &records;
                async move { Ok(pipeline.run(records).await?) }
            },
            MAX_DB_ATTEMPTS,
        )
        .await
        .with_context(|| format!("ingesting batch {}", file.display()))?;

        info!(
            file = %file.display(),
            accepted = metrics.accepted,
            duplicates = metrics.duplicates,
            quarantined = metrics.quarantined_total(),
            conflicts = metrics.conflicts,
            "batch done"
        );
        mark_done(&file)?;
    }

    // Retroactive corrections: approved reviews become aliases, and games
    // that were flagged at ingest time get their canonical references.
    let (aliases, sides) = pipeline.apply_approved_reviews().await?;
    info!(
        aliases_recorded = aliases,
        game_sides_resolved = sides,
        "applied approved review decisions"
    );

    Ok(())
}

/// Pending `*.jsonl` files in deterministic order.
fn batch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading batch directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

/// Parse one JSON Lines batch file. Unparseable lines are logged and
/// skipped; they are an adapter bug, not a reason to drop the whole batch.
fn read_batch(path: &Path) -> Result<Vec<ProviderGameRecord>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut records = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProviderGameRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                file = %path.display(),
                line = lineno + 1,
                error = %e,
                "skipping unparseable batch line"
            ),
        }
    }
    Ok(records)
}

fn mark_done(path: &Path) -> Result<()> {
    let mut done = path.as_os_str().to_owned();
    done.push(".done");
    std::fs::rename(path, &done)
        .with_context(|| format!("renaming processed batch {}", path.display()))?;
    Ok(())
}
