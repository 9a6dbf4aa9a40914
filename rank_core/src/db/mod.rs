//! Database connection pooling and the Postgres store.
//!
//! The schema itself is owned by the migrations repo; this module only
//! assumes the tables it queries: `canonical_teams`, `team_aliases`,
//! `review_queue`, `canonical_games`, `game_conflicts`, `cohort_rankings`.
//! Uniqueness constraints the code leans on by name:
//! `canonical_games_pkey`, `uq_canonical_games_composite`,
//! `uq_team_aliases_approved`.

use crate::models::{AgeGroup, Gender, MatchMethod, ReviewStatus};
use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::time::Duration;

pub mod games;
pub mod identity;
pub mod retry;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Timeout for acquiring a connection
    pub acquire_timeout: Duration,
    /// How long idle connections are kept alive
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),  // 5 minutes
            max_lifetime: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl DbPoolConfig {
    /// Create config from environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        Self {
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            acquire_timeout: env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_lifetime),
        }
    }
}

/// Create a database connection pool with the given configuration.
pub async fn create_pool(database_url: &str, config: &DbPoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .context("Failed to create database connection pool")?;

    tracing::info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

/// Create a database connection pool from DATABASE_URL with env overrides.
pub async fn create_default_pool() -> Result<PgPool> {
    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL environment variable must be set")?;

    let config = DbPoolConfig::from_env_with_defaults(DbPoolConfig::default());
    create_pool(&database_url, &config).await
}

/// Postgres-backed implementation of every store trait. One struct so the
/// merge/unmerge rewrites can span identity and game tables inside a single
/// transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ----------------------------------------------------------------------------
// Column codecs shared by the store impls
// ----------------------------------------------------------------------------

pub(crate) fn age_group_from_db(years: i16) -> Result<AgeGroup> {
    u8::try_from(years)
        .map(AgeGroup::new)
        .map_err(|_| anyhow!("age_group column out of range: {years}"))
}

pub(crate) fn gender_from_db(raw: &str) -> Result<Gender> {
    Gender::parse(raw).ok_or_else(|| anyhow!("unrecognized gender column value: {raw:?}"))
}

pub(crate) fn method_from_db(raw: &str) -> Result<MatchMethod> {
    MatchMethod::parse(raw).ok_or_else(|| anyhow!("unrecognized match method: {raw:?}"))
}

pub(crate) fn status_from_db(raw: &str) -> Result<ReviewStatus> {
    ReviewStatus::parse(raw).ok_or_else(|| anyhow!("unrecognized review status: {raw:?}"))
}

pub(crate) fn score_from_db(score: i32) -> Result<u32> {
    u32::try_from(score).map_err(|_| anyhow!("negative score column value: {score}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbPoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_column_codecs() {
        assert_eq!(age_group_from_db(12).unwrap(), AgeGroup::new(12));
        assert!(age_group_from_db(-1).is_err());
        assert_eq!(gender_from_db("female").unwrap(), Gender::Female);
        assert!(gender_from_db("??").is_err());
        assert_eq!(method_from_db("fuzzy_auto").unwrap(), MatchMethod::FuzzyAuto);
        assert_eq!(status_from_db("pending").unwrap(), ReviewStatus::Pending);
        assert_eq!(score_from_db(3).unwrap(), 3);
        assert!(score_from_db(-2).is_err());
    }
}
