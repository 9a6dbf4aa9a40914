//! Ranking Service
//!
//! Responsibilities:
//! - Load resolved teams and games
//! - Recompute every cohort's strength ranking from scratch
//! - Append the snapshot rows, stamped with the data snapshot time
//!
//! The engine is a read-only consumer of identity and game data and may run
//! while ingestion is active; the snapshot timestamp records which data the
//! run could have seen, since it is not transactionally isolated from
//! late-arriving games.

use anyhow::Result;
use chrono::Utc;
use dotenv::dotenv;
use pitchrank_core::db::{create_default_pool, PgStore};
use pitchrank_core::models::RankStatus;
use pitchrank_core::ranking::{cohort_members, RankingEngine};
use pitchrank_core::store::{GameStore, IdentityStore, RankingStore};
use pitchrank_core::RankingConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool = create_default_pool().await?;
    let store = Arc::new(PgStore::new(pool));

    // Captured before loading: everything the run sees was persisted by now.
    let snapshot_at = Utc::now();
    let as_of = snapshot_at.date_naive();

    let teams = store.all_teams().await?;
    let games = store.all_games().await?;
    info!(
        teams = teams.len(),
        games = games.len(),
        cohorts = cohort_members(&teams).len(),
        "ranking input loaded"
    );

    let config = RankingConfig::from_env();
    let engine = RankingEngine::new(config);
    let rows =
        tokio::task::spawn_blocking(move || engine.rank_all(&teams, &games, as_of, snapshot_at))
            .await?;

    let active = rows
        .iter()
        .filter(|r| r.status == RankStatus::Active)
        .count();
    store.write_snapshot(&rows).await?;
    info!(
        rows = rows.len(),
        active,
        inactive = rows.len() - active,
        snapshot_at = %snapshot_at,
        "ranking snapshot written"
    );

    Ok(())
}
