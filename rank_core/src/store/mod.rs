//! Repository interfaces for identity, game and ranking data.
//!
//! The resolver and pipeline are written against these traits rather than
//! ambient tables so they can be exercised in isolation with the in-memory
//! implementation. The Postgres implementations live in `db::`.
//!
//! Uniqueness guarantees (one approved alias per provider key, one game per
//! deterministic id, one game per composite key) are enforced by the store;
//! racing writers surface them as expected outcomes, never as fatal errors.

use crate::models::{
    CanonicalGame, CanonicalTeam, Cohort, CohortRankingRow, CompositeKey, GameConflict, GameSide,
    ReviewQueueEntry, TeamAlias,
};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod memory;

/// Outcome of a game insert attempt. The duplicate variants are the
/// uniqueness-constraint backstop for concurrent ingestion runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Deterministic game id already present.
    DuplicateId,
    /// Composite natural key already present.
    DuplicateComposite,
}

/// Identifies one alias row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasKey {
    pub provider: String,
    pub provider_team_id: String,
}

/// Instruction for an atomic team split. Built by
/// `resolver::maintenance::unmerge_team`.
#[derive(Debug, Clone)]
pub struct SplitPlan {
    pub original: Uuid,
    pub new_team: CanonicalTeam,
    /// Aliases (and the games keyed by them) that move to the new identity.
    pub moved_aliases: Vec<AliasKey>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReport {
    pub aliases_moved: usize,
    pub games_moved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SplitReport {
    pub new_team_id: Option<Uuid>,
    pub aliases_moved: usize,
    pub games_moved: usize,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_approved_alias(
        &self,
        provider: &str,
        provider_team_id: &str,
    ) -> Result<Option<TeamAlias>>;

    /// Records an alias. Returns `false` when an approved alias already
    /// exists for the key, i.e. a racing writer got there first.
    async fn record_alias(&self, alias: TeamAlias) -> Result<bool>;

    async fn create_team(&self, team: CanonicalTeam) -> Result<()>;

    async fn get_team(&self, id: Uuid) -> Result<Option<CanonicalTeam>>;

    /// Non-deprecated teams of one cohort; the fuzzy tier's candidate pool.
    async fn teams_in_cohort(&self, cohort: Cohort) -> Result<Vec<CanonicalTeam>>;

    async fn all_teams(&self) -> Result<Vec<CanonicalTeam>>;

    async fn aliases_for_team(&self, team_id: Uuid) -> Result<Vec<TeamAlias>>;

    /// Enqueues unless a pending entry already exists for the same provider
    /// key; returns the entry id when a new entry was created.
    async fn enqueue_review(&self, entry: ReviewQueueEntry) -> Result<Option<Uuid>>;

    /// Approved entries whose decision has not yet been folded back into the
    /// alias table.
    async fn unapplied_approved_reviews(&self) -> Result<Vec<ReviewQueueEntry>>;

    async fn mark_review_applied(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn find_by_id(&self, game_id: &str) -> Result<Option<CanonicalGame>>;

    async fn find_by_composite(&self, key: &CompositeKey) -> Result<Option<CanonicalGame>>;

    /// At-most-once insert per deterministic id and per composite key.
    async fn insert(&self, game: &CanonicalGame) -> Result<InsertOutcome>;

    async fn record_conflict(&self, conflict: &GameConflict) -> Result<()>;

    /// Explicit reconciliation of a conflicted game's scores. Only the
    /// conflict path calls this; normal ingestion never mutates a game.
    async fn reconcile_scores(
        &self,
        game_id: &str,
        home_score: u32,
        away_score: u32,
    ) -> Result<()>;

    /// Games with at least one canonical side unset.
    async fn unresolved_games(&self) -> Result<Vec<CanonicalGame>>;

    async fn set_side_team(&self, game_id: &str, side: GameSide, team_id: Uuid) -> Result<()>;

    async fn all_games(&self) -> Result<Vec<CanonicalGame>>;
}

#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Appends a snapshot; earlier rows are superseded, never mutated.
    /// Invalidation happens inside the maintenance rewrites, which drop
    /// snapshot rows for the teams they touch.
    async fn write_snapshot(&self, rows: &[CohortRankingRow]) -> Result<()>;
}

/// Transactional graph-rewrite operations for identity corrections. Each
/// implementation must apply the whole rewrite or none of it, and must
/// serialize against concurrent ingestion for the affected team ids.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    /// Moves every alias and game reference from `source` onto `target` and
    /// deprecates `source` with a `merged_into` pointer. Invalidates ranking
    /// snapshots for both teams.
    async fn apply_merge(&self, source: Uuid, target: Uuid) -> Result<MergeReport>;

    /// Creates the split-off team and moves the planned aliases plus the
    /// games keyed by them. Invalidates ranking snapshots for both teams.
    async fn apply_split(&self, plan: &SplitPlan) -> Result<SplitReport>;
}
