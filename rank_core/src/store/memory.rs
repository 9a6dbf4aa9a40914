//! In-memory store implementation.
//!
//! Backs the test suites and dry runs. A single `RwLock` over the whole
//! state gives the same atomicity the Postgres implementation gets from
//! transactions: maintenance rewrites happen entirely under one write guard.

use super::{
    AliasKey, GameStore, IdentityStore, InsertOutcome, MaintenanceStore, MergeReport,
    RankingStore, SplitPlan, SplitReport,
};
use crate::models::{
    CanonicalGame, CanonicalTeam, Cohort, CohortRankingRow, CompositeKey, GameConflict, GameSide,
    ReviewQueueEntry, ReviewStatus, TeamAlias,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    teams: HashMap<Uuid, CanonicalTeam>,
    aliases: Vec<TeamAlias>,
    reviews: Vec<ReviewQueueEntry>,
    games: HashMap<String, CanonicalGame>,
    conflicts: Vec<GameConflict>,
    rankings: Vec<CohortRankingRow>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded conflicts, for inspection in tests and dry runs.
    pub fn conflicts(&self) -> Vec<GameConflict> {
        self.inner.read().conflicts.clone()
    }

    pub fn reviews(&self) -> Vec<ReviewQueueEntry> {
        self.inner.read().reviews.clone()
    }

    pub fn ranking_rows(&self) -> Vec<CohortRankingRow> {
        self.inner.read().rankings.clone()
    }

    pub fn game_count(&self) -> usize {
        self.inner.read().games.len()
    }

    pub fn alias_count(&self) -> usize {
        self.inner.read().aliases.len()
    }

    /// Stands in for the external reviewer flipping an entry's status.
    pub fn set_review_status(&self, id: Uuid, status: ReviewStatus) {
        let mut state = self.inner.write();
        if let Some(entry) = state.reviews.iter_mut().find(|e| e.id == id) {
            entry.status = status;
        }
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_approved_alias(
        &self,
        provider: &str,
        provider_team_id: &str,
    ) -> Result<Option<TeamAlias>> {
        let state = self.inner.read();
        Ok(state
            .aliases
            .iter()
            .find(|a| {
                a.provider == provider
                    && a.provider_team_id == provider_team_id
                    && a.status == ReviewStatus::Approved
            })
            .cloned())
    }

    async fn record_alias(&self, alias: TeamAlias) -> Result<bool> {
        let mut state = self.inner.write();
        if alias.status == ReviewStatus::Approved {
            let taken = state.aliases.iter().any(|a| {
                a.provider == alias.provider
                    && a.provider_team_id == alias.provider_team_id
                    && a.status == ReviewStatus::Approved
            });
            if taken {
                return Ok(false);
            }
        }
        state.aliases.push(alias);
        Ok(true)
    }

    async fn create_team(&self, team: CanonicalTeam) -> Result<()> {
        let mut state = self.inner.write();
        if state.teams.contains_key(&team.id) {
            return Err(anyhow!("team {} already exists", team.id));
        }
        state.teams.insert(team.id, team);
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<CanonicalTeam>> {
        Ok(self.inner.read().teams.get(&id).cloned())
    }

    async fn teams_in_cohort(&self, cohort: Cohort) -> Result<Vec<CanonicalTeam>> {
        let state = self.inner.read();
        let mut teams: Vec<CanonicalTeam> = state
            .teams
            .values()
            .filter(|t| !t.deprecated && t.cohort() == cohort)
            .cloned()
            .collect();
        teams.sort_by_key(|t| t.id);
        Ok(teams)
    }

    async fn all_teams(&self) -> Result<Vec<CanonicalTeam>> {
        let state = self.inner.read();
        let mut teams: Vec<CanonicalTeam> = state.teams.values().cloned().collect();
        teams.sort_by_key(|t| t.id);
        Ok(teams)
    }

    async fn aliases_for_team(&self, team_id: Uuid) -> Result<Vec<TeamAlias>> {
        let state = self.inner.read();
        Ok(state
            .aliases
            .iter()
            .filter(|a| a.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn enqueue_review(&self, entry: ReviewQueueEntry) -> Result<Option<Uuid>> {
        let mut state = self.inner.write();
        let pending_exists = state.reviews.iter().any(|e| {
            e.provider == entry.provider
                && e.provider_team_id == entry.provider_team_id
                && e.status == ReviewStatus::Pending
        });
        if pending_exists {
            return Ok(None);
        }
        let id = entry.id;
        state.reviews.push(entry);
        Ok(Some(id))
    }

    async fn unapplied_approved_reviews(&self) -> Result<Vec<ReviewQueueEntry>> {
        let state = self.inner.read();
        Ok(state
            .reviews
            .iter()
            .filter(|e| e.status == ReviewStatus::Approved && !e.applied)
            .cloned()
            .collect())
    }

    async fn mark_review_applied(&self, id: Uuid) -> Result<()> {
        let mut state = self.inner.write();
        match state.reviews.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.applied = true;
                Ok(())
            }
            None => Err(anyhow!("review entry {id} not found")),
        }
    }
}

#[async_trait]
impl GameStore for InMemoryStore {
    async fn find_by_id(&self, game_id: &str) -> Result<Option<CanonicalGame>> {
        Ok(self.inner.read().games.get(game_id).cloned())
    }

    async fn find_by_composite(&self, key: &CompositeKey) -> Result<Option<CanonicalGame>> {
        let state = self.inner.read();
        Ok(state
            .games
            .values()
            .find(|g| g.composite_key() == *key)
            .cloned())
    }

    async fn insert(&self, game: &CanonicalGame) -> Result<InsertOutcome> {
        let mut state = self.inner.write();
        if state.games.contains_key(&game.game_id) {
            return Ok(InsertOutcome::DuplicateId);
        }
        let key = game.composite_key();
        if state.games.values().any(|g| g.composite_key() == key) {
            return Ok(InsertOutcome::DuplicateComposite);
        }
        state.games.insert(game.game_id.clone(), game.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn record_conflict(&self, conflict: &GameConflict) -> Result<()> {
        self.inner.write().conflicts.push(conflict.clone());
        Ok(())
    }

    async fn reconcile_scores(
        &self,
        game_id: &str,
        home_score: u32,
        away_score: u32,
    ) -> Result<()> {
        let mut state = self.inner.write();
        match state.games.get_mut(game_id) {
            Some(game) => {
                game.home_score = home_score;
                game.away_score = away_score;
                Ok(())
            }
            None => Err(anyhow!("game {game_id} not found")),
        }
    }

    async fn unresolved_games(&self) -> Result<Vec<CanonicalGame>> {
        let state = self.inner.read();
        let mut games: Vec<CanonicalGame> = state
            .games
            .values()
            .filter(|g| g.is_unresolved())
            .cloned()
            .collect();
        games.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        Ok(games)
    }

    async fn set_side_team(&self, game_id: &str, side: GameSide, team_id: Uuid) -> Result<()> {
        let mut state = self.inner.write();
        match state.games.get_mut(game_id) {
            Some(game) => {
                match side {
                    GameSide::Home => game.home_team = Some(team_id),
                    GameSide::Away => game.away_team = Some(team_id),
                }
                Ok(())
            }
            None => Err(anyhow!("game {game_id} not found")),
        }
    }

    async fn all_games(&self) -> Result<Vec<CanonicalGame>> {
        let state = self.inner.read();
        let mut games: Vec<CanonicalGame> = state.games.values().cloned().collect();
        games.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        Ok(games)
    }
}

#[async_trait]
impl RankingStore for InMemoryStore {
    async fn write_snapshot(&self, rows: &[CohortRankingRow]) -> Result<()> {
        self.inner.write().rankings.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl MaintenanceStore for InMemoryStore {
    async fn apply_merge(&self, source: Uuid, target: Uuid) -> Result<MergeReport> {
        let mut state = self.inner.write();
        if !state.teams.contains_key(&source) || !state.teams.contains_key(&target) {
            return Err(anyhow!("merge endpoints must both exist"));
        }

        let mut report = MergeReport::default();
        for alias in state.aliases.iter_mut().filter(|a| a.team_id == source) {
            alias.team_id = target;
            report.aliases_moved += 1;
        }
        for game in state.games.values_mut() {
            let mut moved = false;
            if game.home_team == Some(source) {
                game.home_team = Some(target);
                moved = true;
            }
            if game.away_team == Some(source) {
                game.away_team = Some(target);
                moved = true;
            }
            if moved {
                report.games_moved += 1;
            }
        }
        let team = state
            .teams
            .get_mut(&source)
            .ok_or_else(|| anyhow!("source team vanished mid-merge"))?;
        team.deprecated = true;
        team.merged_into = Some(target);
        state
            .rankings
            .retain(|r| r.team_id != source && r.team_id != target);
        Ok(report)
    }

    async fn apply_split(&self, plan: &SplitPlan) -> Result<SplitReport> {
        let mut state = self.inner.write();
        if !state.teams.contains_key(&plan.original) {
            return Err(anyhow!("split original {} not found", plan.original));
        }
        if state.teams.contains_key(&plan.new_team.id) {
            return Err(anyhow!("split target team id already exists"));
        }

        let moved: Vec<AliasKey> = plan.moved_aliases.clone();
        let mut report = SplitReport {
            new_team_id: Some(plan.new_team.id),
            ..Default::default()
        };

        state.teams.insert(plan.new_team.id, plan.new_team.clone());
        for alias in state.aliases.iter_mut() {
            if alias.team_id == plan.original
                && moved.iter().any(|k| {
                    k.provider == alias.provider && k.provider_team_id == alias.provider_team_id
                })
            {
                alias.team_id = plan.new_team.id;
                report.aliases_moved += 1;
            }
        }
        for game in state.games.values_mut() {
            let mut moved_game = false;
            if game.home_team == Some(plan.original)
                && moved.iter().any(|k| {
                    k.provider == game.provider && k.provider_team_id == game.home_provider_id
                })
            {
                game.home_team = Some(plan.new_team.id);
                moved_game = true;
            }
            if game.away_team == Some(plan.original)
                && moved.iter().any(|k| {
                    k.provider == game.provider && k.provider_team_id == game.away_provider_id
                })
            {
                game.away_team = Some(plan.new_team.id);
                moved_game = true;
            }
            if moved_game {
                report.games_moved += 1;
            }
        }
        state
            .rankings
            .retain(|r| r.team_id != plan.original && r.team_id != plan.new_team.id);
        Ok(report)
    }
}
