//! Postgres implementation of the identity and maintenance stores.
//!
//! Merge and split are single transactions: the alias moves, game reference
//! moves, deprecation flag and ranking invalidation all commit together or
//! roll back together (dropping the transaction uncommitted rolls back).
//! Both lock the affected team rows first, which serializes maintenance
//! against concurrent ingestion for those teams.

use super::{age_group_from_db, gender_from_db, method_from_db, status_from_db, PgStore};
use crate::models::{
    CanonicalTeam, Cohort, ReviewQueueEntry, ReviewStatus, TeamAlias,
};
use crate::store::{
    IdentityStore, MaintenanceStore, MergeReport, SplitPlan, SplitReport,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

const TEAM_COLUMNS: &str =
    "id, display_name, club_name, age_group, gender, region, deprecated, merged_into, created_at";

const ALIAS_COLUMNS: &str =
    "provider, provider_team_id, provider_team_name, team_id, method, confidence, status, created_at";

const REVIEW_COLUMNS: &str = "id, provider, provider_team_id, provider_team_name, club_name, \
     age_group, gender, candidate_team_id, confidence, status, applied, created_at";

fn team_from_row(row: &PgRow) -> Result<CanonicalTeam> {
    Ok(CanonicalTeam {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        club_name: row.try_get("club_name")?,
        age_group: age_group_from_db(row.try_get("age_group")?)?,
        gender: gender_from_db(row.try_get("gender")?)?,
        region: row.try_get("region")?,
        deprecated: row.try_get("deprecated")?,
        merged_into: row.try_get("merged_into")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alias_from_row(row: &PgRow) -> Result<TeamAlias> {
    Ok(TeamAlias {
        provider: row.try_get("provider")?,
        provider_team_id: row.try_get("provider_team_id")?,
        provider_team_name: row.try_get("provider_team_name")?,
        team_id: row.try_get("team_id")?,
        method: method_from_db(row.try_get("method")?)?,
        confidence: row.try_get("confidence")?,
        status: status_from_db(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn review_from_row(row: &PgRow) -> Result<ReviewQueueEntry> {
    Ok(ReviewQueueEntry {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        provider_team_id: row.try_get("provider_team_id")?,
        provider_team_name: row.try_get("provider_team_name")?,
        club_name: row.try_get("club_name")?,
        age_group: age_group_from_db(row.try_get("age_group")?)?,
        gender: gender_from_db(row.try_get("gender")?)?,
        candidate_team_id: row.try_get("candidate_team_id")?,
        confidence: row.try_get("confidence")?,
        status: status_from_db(row.try_get("status")?)?,
        applied: row.try_get("applied")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_approved_alias(
        &self,
        provider: &str,
        provider_team_id: &str,
    ) -> Result<Option<TeamAlias>> {
        let row = sqlx::query(&format!(
            "SELECT {ALIAS_COLUMNS} FROM team_aliases \
             WHERE provider = $1 AND provider_team_id = $2 AND status = 'approved'"
        ))
        .bind(provider)
        .bind(provider_team_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(alias_from_row).transpose()
    }

    async fn record_alias(&self, alias: TeamAlias) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO team_aliases \
             (provider, provider_team_id, provider_team_name, team_id, method, confidence, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&alias.provider)
        .bind(&alias.provider_team_id)
        .bind(&alias.provider_team_name)
        .bind(alias.team_id)
        .bind(alias.method.as_str())
        .bind(alias.confidence)
        .bind(alias.status.as_str())
        .bind(alias.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            // The partial unique index on approved aliases is the backstop
            // for racing ingestion runs; losing the race is expected.
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("uq_team_aliases_approved") =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context("recording team alias"),
        }
    }

    async fn create_team(&self, team: CanonicalTeam) -> Result<()> {
        sqlx::query(
            "INSERT INTO canonical_teams \
             (id, display_name, club_name, age_group, gender, region, deprecated, merged_into, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(team.id)
        .bind(&team.display_name)
        .bind(&team.club_name)
        .bind(i16::from(team.age_group.years()))
        .bind(team.gender.as_str())
        .bind(&team.region)
        .bind(team.deprecated)
        .bind(team.merged_into)
        .bind(team.created_at)
        .execute(&self.pool)
        .await
        .context("creating canonical team")?;
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<CanonicalTeam>> {
        let row = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM canonical_teams WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(team_from_row).transpose()
    }

    async fn teams_in_cohort(&self, cohort: Cohort) -> Result<Vec<CanonicalTeam>> {
        let rows = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM canonical_teams \
             WHERE age_group = $1 AND gender = $2 AND NOT deprecated \
             ORDER BY id"
        ))
        .bind(i16::from(cohort.age_group.years()))
        .bind(cohort.gender.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_from_row).collect()
    }

    async fn all_teams(&self) -> Result<Vec<CanonicalTeam>> {
        let rows = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM canonical_teams ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_from_row).collect()
    }

    async fn aliases_for_team(&self, team_id: Uuid) -> Result<Vec<TeamAlias>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALIAS_COLUMNS} FROM team_aliases WHERE team_id = $1 \
             ORDER BY created_at, provider, provider_team_id"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alias_from_row).collect()
    }

    async fn enqueue_review(&self, entry: ReviewQueueEntry) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            "INSERT INTO review_queue \
             (id, provider, provider_team_id, provider_team_name, club_name, age_group, gender, \
              candidate_team_id, confidence, status, applied, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (provider, provider_team_id) WHERE status = 'pending' DO NOTHING \
             RETURNING id",
        )
        .bind(entry.id)
        .bind(&entry.provider)
        .bind(&entry.provider_team_id)
        .bind(&entry.provider_team_name)
        .bind(&entry.club_name)
        .bind(i16::from(entry.age_group.years()))
        .bind(entry.gender.as_str())
        .bind(entry.candidate_team_id)
        .bind(entry.confidence)
        .bind(entry.status.as_str())
        .bind(entry.applied)
        .bind(entry.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn unapplied_approved_reviews(&self) -> Result<Vec<ReviewQueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM review_queue \
             WHERE status = $1 AND NOT applied ORDER BY created_at"
        ))
        .bind(ReviewStatus::Approved.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn mark_review_applied(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE review_queue SET applied = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("marking review entry applied")?;
        Ok(())
    }
}

#[async_trait]
impl MaintenanceStore for PgStore {
    async fn apply_merge(&self, source: Uuid, target: Uuid) -> Result<MergeReport> {
        let mut tx = self.pool.begin().await?;

        // Exclusive scope over both teams for the duration of the rewrite.
        sqlx::query("SELECT id FROM canonical_teams WHERE id = ANY($1) FOR UPDATE")
            .bind(vec![source, target])
            .fetch_all(&mut *tx)
            .await?;

        let aliases_moved = sqlx::query("UPDATE team_aliases SET team_id = $2 WHERE team_id = $1")
            .bind(source)
            .bind(target)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let home_moved =
            sqlx::query("UPDATE canonical_games SET home_team = $2 WHERE home_team = $1")
                .bind(source)
                .bind(target)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        let away_moved =
            sqlx::query("UPDATE canonical_games SET away_team = $2 WHERE away_team = $1")
                .bind(source)
                .bind(target)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        sqlx::query(
            "UPDATE canonical_teams SET deprecated = TRUE, merged_into = $2 WHERE id = $1",
        )
        .bind(source)
        .bind(target)
        .execute(&mut *tx)
        .await?;

        // Identity changed under these teams; their snapshots are stale.
        sqlx::query("DELETE FROM cohort_rankings WHERE team_id = ANY($1)")
            .bind(vec![source, target])
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("committing merge transaction")?;

        Ok(MergeReport {
            aliases_moved: aliases_moved as usize,
            games_moved: (home_moved + away_moved) as usize,
        })
    }

    async fn apply_split(&self, plan: &SplitPlan) -> Result<SplitReport> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM canonical_teams WHERE id = $1 FOR UPDATE")
            .bind(plan.original)
            .fetch_all(&mut *tx)
            .await?;

        let team = &plan.new_team;
        sqlx::query(
            "INSERT INTO canonical_teams \
             (id, display_name, club_name, age_group, gender, region, deprecated, merged_into, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(team.id)
        .bind(&team.display_name)
        .bind(&team.club_name)
        .bind(i16::from(team.age_group.years()))
        .bind(team.gender.as_str())
        .bind(&team.region)
        .bind(team.deprecated)
        .bind(team.merged_into)
        .bind(team.created_at)
        .execute(&mut *tx)
        .await?;

        let mut report = SplitReport {
            new_team_id: Some(team.id),
            ..Default::default()
        };

        for key in &plan.moved_aliases {
            report.aliases_moved += sqlx::query(
                "UPDATE team_aliases SET team_id = $3 \
                 WHERE team_id = $4 AND provider = $1 AND provider_team_id = $2",
            )
            .bind(&key.provider)
            .bind(&key.provider_team_id)
            .bind(team.id)
            .bind(plan.original)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

            report.games_moved += sqlx::query(
                "UPDATE canonical_games SET home_team = $3 \
                 WHERE home_team = $4 AND provider = $1 AND home_provider_id = $2",
            )
            .bind(&key.provider)
            .bind(&key.provider_team_id)
            .bind(team.id)
            .bind(plan.original)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

            report.games_moved += sqlx::query(
                "UPDATE canonical_games SET away_team = $3 \
                 WHERE away_team = $4 AND provider = $1 AND away_provider_id = $2",
            )
            .bind(&key.provider)
            .bind(&key.provider_team_id)
            .bind(team.id)
            .bind(plan.original)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        }

        sqlx::query("DELETE FROM cohort_rankings WHERE team_id = ANY($1)")
            .bind(vec![plan.original, team.id])
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("committing split transaction")?;
        Ok(report)
    }
}
