//! Game ingestion pipeline.
//!
//! Converts perspective-pair provider rows into canonical games: normalize,
//! resolve both identities, build the deterministic id, dedupe on the
//! composite natural key, insert at most once. Quarantine and duplicate
//! paths stay inside the pipeline; only store unavailability aborts a run,
//! and aborted runs are safe to replay wholesale because inserts are
//! idempotent.

pub mod normalize;

use crate::config::{ConflictPolicy, IngestConfig, ResolverConfig};
use crate::error::{IngestError, QuarantineReason};
use crate::models::{CanonicalGame, GameConflict, GameSide, ProviderGameRecord};
use crate::resolver::TeamResolver;
use crate::store::{GameStore, IdentityStore, InsertOutcome};
use chrono::Utc;
use normalize::{normalize_record, OrientedGame};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one provider row.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Inserted {
        game_id: String,
        /// Sides left without a canonical reference (0..=2); those games are
        /// flagged for re-resolution, not discarded.
        unresolved_sides: u8,
    },
    /// True duplicate: composite natural key already stored. Expected for
    /// every second perspective row and for every re-run.
    Duplicate,
    Quarantined(QuarantineReason),
    /// Deterministic id collision with a differing composite key; recorded
    /// for reconciliation, existing row kept unless configured otherwise.
    Conflict { game_id: String },
}

/// Per-run counters, logged at the end of every batch.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub processed: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub conflicts: u64,
    pub unresolved_sides: u64,
    pub quarantined: HashMap<QuarantineReason, u64>,
}

impl RunMetrics {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Inserted {
                unresolved_sides, ..
            } => {
                self.accepted += 1;
                self.unresolved_sides += u64::from(*unresolved_sides);
            }
            RecordOutcome::Duplicate => self.duplicates += 1,
            RecordOutcome::Quarantined(reason) => {
                *self.quarantined.entry(*reason).or_default() += 1;
            }
            RecordOutcome::Conflict { .. } => self.conflicts += 1,
        }
    }

    pub fn quarantined_total(&self) -> u64 {
        self.quarantined.values().sum()
    }
}

pub struct GameIngestPipeline {
    identity: Arc<dyn IdentityStore>,
    games: Arc<dyn GameStore>,
    resolver: TeamResolver,
    config: IngestConfig,
}

impl GameIngestPipeline {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        games: Arc<dyn GameStore>,
        resolver_config: ResolverConfig,
        config: IngestConfig,
    ) -> Self {
        let resolver = TeamResolver::new(identity.clone(), resolver_config);
        Self {
            identity,
            games,
            resolver,
            config,
        }
    }

    /// Ingest a whole batch, accumulating metrics.
    pub async fn run(&self, records: &[ProviderGameRecord]) -> Result<RunMetrics, IngestError> {
        let mut metrics = RunMetrics::default();
        for record in records {
            let outcome = self.ingest_record(record).await?;
            metrics.record(&outcome);
        }
        info!(
            processed = metrics.processed,
            accepted = metrics.accepted,
            duplicates = metrics.duplicates,
            quarantined = metrics.quarantined_total(),
            conflicts = metrics.conflicts,
            unresolved_sides = metrics.unresolved_sides,
            "ingestion batch complete"
        );
        Ok(metrics)
    }

    pub async fn ingest_record(
        &self,
        record: &ProviderGameRecord,
    ) -> Result<RecordOutcome, IngestError> {
        let oriented = match normalize_record(record) {
            Ok(oriented) => oriented,
            Err(reason) => {
                debug!(provider = %record.provider, reason = reason.as_str(), "record quarantined");
                return Ok(RecordOutcome::Quarantined(reason));
            }
        };

        // Resolve both sides. A failed side leaves the reference unset; the
        // game is still worth keeping because the provider id will resolve
        // eventually and the import must not need repeating.
        let home = self.resolver.resolve(&oriented.home_sighting()).await?;
        let away = self.resolver.resolve(&oriented.away_sighting()).await?;

        let game_id = oriented.game_id();
        let key = oriented.composite_key();

        // Composite natural key first: an exact match is the second
        // perspective row or a re-run, unless the sides disagree on cohort.
        if let Some(existing) = self.games.find_by_composite(&key).await? {
            if existing.age_group.distance(&oriented.age_group) > self.config.age_group_tolerance {
                warn!(
                    game_id = %existing.game_id,
                    existing_age = %existing.age_group,
                    incoming_age = %oriented.age_group,
                    "perspective rows disagree on age group"
                );
                return Ok(RecordOutcome::Quarantined(QuarantineReason::AgeGroupMismatch));
            }
            return Ok(RecordOutcome::Duplicate);
        }

        // Same deterministic id with a different composite key means the
        // scores changed between scrapes: an identity conflict, never a
        // silent skip and never a silent overwrite.
        if let Some(existing) = self.games.find_by_id(&game_id).await? {
            return self.handle_conflict(&oriented, existing).await;
        }

        let game = CanonicalGame {
            game_id: game_id.clone(),
            provider: oriented.provider.clone(),
            home_team: home.team_id(),
            away_team: away.team_id(),
            home_provider_id: oriented.home_provider_id.clone(),
            away_provider_id: oriented.away_provider_id.clone(),
            date: oriented.date,
            home_score: oriented.home_score,
            away_score: oriented.away_score,
            age_group: oriented.age_group,
            gender: oriented.gender,
            division: oriented.division.clone(),
            created_at: Utc::now(),
        };
        let unresolved_sides =
            u8::from(game.home_team.is_none()) + u8::from(game.away_team.is_none());

        // The store's uniqueness constraints are the backstop for racing
        // inserts; both duplicate outcomes are expected, not fatal.
        match self.games.insert(&game).await? {
            InsertOutcome::Inserted => Ok(RecordOutcome::Inserted {
                game_id,
                unresolved_sides,
            }),
            InsertOutcome::DuplicateComposite => Ok(RecordOutcome::Duplicate),
            InsertOutcome::DuplicateId => match self.games.find_by_id(&game_id).await? {
                Some(existing) => self.handle_conflict(&oriented, existing).await,
                None => Ok(RecordOutcome::Duplicate),
            },
        }
    }

    async fn handle_conflict(
        &self,
        oriented: &OrientedGame,
        existing: CanonicalGame,
    ) -> Result<RecordOutcome, IngestError> {
        let conflict = GameConflict {
            game_id: existing.game_id.clone(),
            existing: existing.composite_key(),
            incoming: oriented.composite_key(),
            detected_at: Utc::now(),
        };
        self.games.record_conflict(&conflict).await?;
        warn!(
            game_id = %existing.game_id,
            existing_score = format!("{}-{}", existing.home_score, existing.away_score),
            incoming_score = format!("{}-{}", oriented.home_score, oriented.away_score),
            "identity conflict: same game, different scores"
        );

        if self.config.conflict_policy == ConflictPolicy::UpdateIfNewer
            && oriented.scraped_at > existing.created_at
        {
            // Orient the incoming scores onto the stored row's home side.
            let (home_score, away_score) =
                if oriented.home_provider_id == existing.home_provider_id {
                    (oriented.home_score, oriented.away_score)
                } else {
                    (oriented.away_score, oriented.home_score)
                };
            self.games
                .reconcile_scores(&existing.game_id, home_score, away_score)
                .await?;
            info!(game_id = %existing.game_id, "reconciled conflicted game to newer scrape");
        }

        Ok(RecordOutcome::Conflict {
            game_id: existing.game_id,
        })
    }

    /// Fold approved review decisions back into the alias table, then give
    /// flagged games their canonical references. Returns (aliases recorded,
    /// game sides resolved).
    pub async fn apply_approved_reviews(&self) -> Result<(u64, u64), IngestError> {
        let mut aliases_recorded = 0u64;
        for entry in self.identity.unapplied_approved_reviews().await? {
            let Some(team_id) = entry.candidate_team_id else {
                warn!(
                    provider = %entry.provider,
                    provider_team_id = %entry.provider_team_id,
                    "approved review entry has no candidate team, skipping"
                );
                continue;
            };
            let alias = crate::models::TeamAlias {
                provider: entry.provider.clone(),
                provider_team_id: entry.provider_team_id.clone(),
                provider_team_name: entry.provider_team_name.clone(),
                team_id,
                method: crate::models::MatchMethod::FuzzyReviewed,
                confidence: entry.confidence,
                status: crate::models::ReviewStatus::Approved,
                created_at: Utc::now(),
            };
            if self.identity.record_alias(alias).await? {
                aliases_recorded += 1;
            }
            self.identity.mark_review_applied(entry.id).await?;
        }

        let sides_resolved = self.re_resolve_unresolved().await?;
        Ok((aliases_recorded, sides_resolved))
    }

    /// Retroactively resolve games whose sides were unset at ingest time.
    pub async fn re_resolve_unresolved(&self) -> Result<u64, IngestError> {
        let mut resolved = 0u64;
        for game in self.games.unresolved_games().await? {
            for side in [GameSide::Home, GameSide::Away] {
                if game.team_on(side).is_some() {
                    continue;
                }
                let provider_id = game.provider_id_on(side);
                if let Some(alias) = self
                    .identity
                    .find_approved_alias(&game.provider, provider_id)
                    .await?
                {
                    self.games
                        .set_side_team(&game.game_id, side, alias.team_id)
                        .await?;
                    resolved += 1;
                }
            }
        }
        if resolved > 0 {
            info!(sides = resolved, "re-resolved flagged game references");
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderGameRecord;
    use crate::store::memory::InMemoryStore;
    use chrono::NaiveDate;

    fn record(
        provider: &str,
        team_id: &str,
        opponent_id: &str,
        is_home: bool,
        goals_for: u32,
        goals_against: u32,
    ) -> ProviderGameRecord {
        ProviderGameRecord {
            provider: provider.to_string(),
            team_id: team_id.to_string(),
            team_name: format!("Team {team_id}"),
            club_name: format!("Club {team_id}"),
            opponent_id: opponent_id.to_string(),
            opponent_name: format!("Team {opponent_id}"),
            opponent_club: format!("Club {opponent_id}"),
            age_group: "U12".to_string(),
            gender: "boys".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 9, 6),
            is_home,
            goals_for: Some(goals_for),
            goals_against: Some(goals_against),
            division: None,
            source_url: None,
            scraped_at: Utc::now(),
        }
    }

    fn pipeline(store: Arc<InMemoryStore>) -> GameIngestPipeline {
        GameIngestPipeline::new(
            store.clone(),
            store,
            ResolverConfig::default(),
            IngestConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_perspective_pair_produces_one_game() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let rows = [
            record("px", "14", "249", true, 2, 1),
            record("px", "249", "14", false, 1, 2),
        ];
        let metrics = pipeline.run(&rows).await.unwrap();

        assert_eq!(metrics.processed, 2);
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.duplicates, 1);
        assert_eq!(store.game_count(), 1);

        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.home_provider_id, "14");
        assert_eq!(game.home_score, 2);
        assert_eq!(game.away_score, 1);
    }

    #[tokio::test]
    async fn test_perspective_symmetry_order_independent() {
        // Process the away perspective first; orientation must not change.
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let rows = [
            record("px", "249", "14", false, 1, 2),
            record("px", "14", "249", true, 2, 1),
        ];
        pipeline.run(&rows).await.unwrap();

        assert_eq!(store.game_count(), 1);
        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.home_provider_id, "14");
        assert_eq!(game.home_score, 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let rows = [
            record("px", "14", "249", true, 2, 1),
            record("px", "249", "14", false, 1, 2),
            record("px", "14", "300", true, 0, 0),
        ];
        pipeline.run(&rows).await.unwrap();
        let games_before = store.game_count();
        let aliases_before = store.alias_count();

        let metrics = pipeline.run(&rows).await.unwrap();
        assert_eq!(metrics.accepted, 0);
        assert_eq!(metrics.duplicates, 3);
        assert_eq!(store.game_count(), games_before);
        assert_eq!(store.alias_count(), aliases_before);
    }

    #[tokio::test]
    async fn test_missing_scores_are_quarantined_not_counted_as_duplicates() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let mut row = record("px", "14", "249", true, 0, 0);
        row.goals_for = None;
        row.goals_against = None;
        let metrics = pipeline.run(std::slice::from_ref(&row)).await.unwrap();

        assert_eq!(metrics.accepted, 0);
        assert_eq!(metrics.duplicates, 0);
        assert_eq!(
            metrics.quarantined.get(&QuarantineReason::MissingScore),
            Some(&1)
        );
        assert_eq!(store.game_count(), 0);
    }

    #[tokio::test]
    async fn test_conflict_on_same_id_different_scores() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        // First import: 2-1.
        pipeline
            .run(&[record("px", "14", "249", true, 2, 1)])
            .await
            .unwrap();
        // Corrected rescrape: 3-1. Same deterministic id, new composite key.
        let metrics = pipeline
            .run(&[record("px", "14", "249", true, 3, 1)])
            .await
            .unwrap();

        assert_eq!(metrics.conflicts, 1);
        assert_eq!(metrics.duplicates, 0);
        assert_eq!(metrics.accepted, 0);
        // Keep-existing policy: still one row with the original scores.
        assert_eq!(store.game_count(), 1);
        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        assert_eq!((game.home_score, game.away_score), (2, 1));
        assert_eq!(store.conflicts().len(), 1);
        assert_eq!(store.conflicts()[0].incoming.home_score, 3);
    }

    #[tokio::test]
    async fn test_conflict_update_if_newer_reconciles() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = GameIngestPipeline::new(
            store.clone(),
            store.clone(),
            ResolverConfig::default(),
            IngestConfig {
                conflict_policy: ConflictPolicy::UpdateIfNewer,
                ..IngestConfig::default()
            },
        );

        pipeline
            .run(&[record("px", "14", "249", true, 2, 1)])
            .await
            .unwrap();
        let mut corrected = record("px", "249", "14", false, 1, 3);
        corrected.scraped_at = Utc::now() + chrono::Duration::hours(1);
        let metrics = pipeline.run(std::slice::from_ref(&corrected)).await.unwrap();

        assert_eq!(metrics.conflicts, 1);
        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        // Reconciled to the newer scrape, oriented onto the stored home side.
        assert_eq!((game.home_score, game.away_score), (3, 1));
        assert_eq!(store.conflicts().len(), 1);
    }

    #[tokio::test]
    async fn test_age_group_mismatch_quarantines_second_row() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        pipeline
            .run(&[record("px", "14", "249", true, 2, 1)])
            .await
            .unwrap();
        let mut other_side = record("px", "249", "14", false, 1, 2);
        other_side.age_group = "U14".to_string();
        let metrics = pipeline.run(std::slice::from_ref(&other_side)).await.unwrap();

        assert_eq!(
            metrics.quarantined.get(&QuarantineReason::AgeGroupMismatch),
            Some(&1)
        );
        assert_eq!(store.game_count(), 1);
    }

    #[tokio::test]
    async fn test_same_pairing_different_division_stays_two_games() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let mut league = record("px", "14", "249", true, 2, 1);
        league.division = Some("League".to_string());
        let mut cup = record("px", "14", "249", true, 1, 0);
        cup.division = Some("Cup".to_string());

        let metrics = pipeline.run(&[league, cup]).await.unwrap();
        assert_eq!(metrics.accepted, 2);
        assert_eq!(metrics.conflicts, 0);
        assert_eq!(store.game_count(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_side_is_kept_and_re_resolved() {
        let store = Arc::new(InMemoryStore::new());
        // Force everything into the review band so no side resolves.
        let pipeline = GameIngestPipeline::new(
            store.clone(),
            store.clone(),
            ResolverConfig {
                auto_approve_threshold: 1.01,
                review_threshold: 0.0,
            },
            IngestConfig::default(),
        );

        // Seed one canonical team so the review entries carry candidates.
        let team = crate::models::CanonicalTeam {
            id: uuid::Uuid::new_v4(),
            display_name: "Team 14".to_string(),
            club_name: "Club 14".to_string(),
            age_group: crate::models::AgeGroup::new(12),
            gender: crate::models::Gender::Male,
            region: None,
            deprecated: false,
            merged_into: None,
            created_at: Utc::now(),
        };
        let team_id = team.id;
        store.create_team(team).await.unwrap();

        let metrics = pipeline
            .run(&[record("px", "14", "249", true, 2, 1)])
            .await
            .unwrap();
        assert_eq!(metrics.accepted, 1);
        assert_eq!(metrics.unresolved_sides, 2);

        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        assert!(game.is_unresolved());

        // External reviewer approves the entry for provider id "14".
        let entry = store
            .reviews()
            .into_iter()
            .find(|e| e.provider_team_id == "14")
            .unwrap();
        assert_eq!(entry.candidate_team_id, Some(team_id));
        store.set_review_status(entry.id, crate::models::ReviewStatus::Approved);

        let (aliases, sides) = pipeline.apply_approved_reviews().await.unwrap();
        assert_eq!(aliases, 1);
        assert_eq!(sides, 1);

        let game = store
            .find_by_id("px:2025-09-06:14:249:U12")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(game.home_team, Some(team_id));
        assert!(game.away_team.is_none());
    }
}
