//! Pitchrank Core - Team identity resolution and cohort strength rankings.
//!
//! This crate provides:
//! - Tiered, confidence-scored resolution of provider team ids onto
//!   canonical team identities
//! - Perspective-pair game ingestion with idempotent, conflict-aware inserts
//! - Merge/unmerge graph surgery for identity corrections
//! - Recency-weighted, opponent-strength-adjusted ranking per age/gender
//!   cohort with cohort-scoped normalization
//! - Repository traits with in-memory and Postgres implementations

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod matching;
pub mod models;
pub mod ranking;
pub mod resolver;
pub mod store;

pub use config::{IngestConfig, RankingConfig, ResolverConfig};
pub use error::{IngestError, MergeError, QuarantineReason};
pub use ingest::{GameIngestPipeline, RecordOutcome, RunMetrics};
pub use models::*;
pub use ranking::RankingEngine;
pub use resolver::{Resolution, TeamResolver, TeamSighting};
