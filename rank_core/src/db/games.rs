//! Postgres implementation of the game and ranking stores.

use super::{age_group_from_db, gender_from_db, score_from_db, PgStore};
use crate::models::{
    CanonicalGame, CohortRankingRow, CompositeKey, GameConflict, GameSide,
};
use crate::store::{GameStore, InsertOutcome, RankingStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

const GAME_COLUMNS: &str = "game_id, provider, home_team, away_team, home_provider_id, \
     away_provider_id, date, home_score, away_score, age_group, gender, division, created_at";

fn game_from_row(row: &PgRow) -> Result<CanonicalGame> {
    Ok(CanonicalGame {
        game_id: row.try_get("game_id")?,
        provider: row.try_get("provider")?,
        home_team: row.try_get("home_team")?,
        away_team: row.try_get("away_team")?,
        home_provider_id: row.try_get("home_provider_id")?,
        away_provider_id: row.try_get("away_provider_id")?,
        date: row.try_get("date")?,
        home_score: score_from_db(row.try_get("home_score")?)?,
        away_score: score_from_db(row.try_get("away_score")?)?,
        age_group: age_group_from_db(row.try_get("age_group")?)?,
        gender: gender_from_db(row.try_get("gender")?)?,
        division: row.try_get("division")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl GameStore for PgStore {
    async fn find_by_id(&self, game_id: &str) -> Result<Option<CanonicalGame>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM canonical_games WHERE game_id = $1"
        ))
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn find_by_composite(&self, key: &CompositeKey) -> Result<Option<CanonicalGame>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM canonical_games \
             WHERE provider = $1 AND home_provider_id = $2 AND away_provider_id = $3 \
               AND date = $4 AND home_score = $5 AND away_score = $6"
        ))
        .bind(&key.provider)
        .bind(&key.home_provider_id)
        .bind(&key.away_provider_id)
        .bind(key.date)
        .bind(key.home_score as i32)
        .bind(key.away_score as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(game_from_row).transpose()
    }

    async fn insert(&self, game: &CanonicalGame) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO canonical_games \
             (game_id, provider, home_team, away_team, home_provider_id, away_provider_id, \
              date, home_score, away_score, age_group, gender, division, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&game.game_id)
        .bind(&game.provider)
        .bind(game.home_team)
        .bind(game.away_team)
        .bind(&game.home_provider_id)
        .bind(&game.away_provider_id)
        .bind(game.date)
        .bind(game.home_score as i32)
        .bind(game.away_score as i32)
        .bind(i16::from(game.age_group.years()))
        .bind(game.gender.as_str())
        .bind(&game.division)
        .bind(game.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            // Racing writers land here; both constraints are expected
            // outcomes, not failures.
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("canonical_games_pkey") =>
            {
                Ok(InsertOutcome::DuplicateId)
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("uq_canonical_games_composite") =>
            {
                Ok(InsertOutcome::DuplicateComposite)
            }
            Err(e) => Err(e).context("inserting canonical game"),
        }
    }

    async fn record_conflict(&self, conflict: &GameConflict) -> Result<()> {
        sqlx::query(
            "INSERT INTO game_conflicts \
             (game_id, existing_home_score, existing_away_score, \
              incoming_home_score, incoming_away_score, detected_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&conflict.game_id)
        .bind(conflict.existing.home_score as i32)
        .bind(conflict.existing.away_score as i32)
        .bind(conflict.incoming.home_score as i32)
        .bind(conflict.incoming.away_score as i32)
        .bind(conflict.detected_at)
        .execute(&self.pool)
        .await
        .context("recording game conflict")?;
        Ok(())
    }

    async fn reconcile_scores(
        &self,
        game_id: &str,
        home_score: u32,
        away_score: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE canonical_games SET home_score = $2, away_score = $3 WHERE game_id = $1",
        )
        .bind(game_id)
        .bind(home_score as i32)
        .bind(away_score as i32)
        .execute(&self.pool)
        .await
        .context("reconciling conflicted game scores")?;
        Ok(())
    }

    async fn unresolved_games(&self) -> Result<Vec<CanonicalGame>> {
        let rows = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM canonical_games \
             WHERE home_team IS NULL OR away_team IS NULL ORDER BY game_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(game_from_row).collect()
    }

    async fn set_side_team(&self, game_id: &str, side: GameSide, team_id: Uuid) -> Result<()> {
        let sql = match side {
            GameSide::Home => "UPDATE canonical_games SET home_team = $2 WHERE game_id = $1",
            GameSide::Away => "UPDATE canonical_games SET away_team = $2 WHERE game_id = $1",
        };
        sqlx::query(sql)
            .bind(game_id)
            .bind(team_id)
            .execute(&self.pool)
            .await
            .context("setting resolved game side")?;
        Ok(())
    }

    async fn all_games(&self) -> Result<Vec<CanonicalGame>> {
        let rows = sqlx::query(&format!(
            "SELECT {GAME_COLUMNS} FROM canonical_games ORDER BY game_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(game_from_row).collect()
    }
}

#[async_trait]
impl RankingStore for PgStore {
    async fn write_snapshot(&self, rows: &[CohortRankingRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO cohort_rankings \
                 (team_id, age_group, gender, games_played, win_pct, raw_points, raw_offense, \
                  raw_defense, raw_sos, norm_offense, norm_defense, norm_sos, power_score, \
                  rank, status, computed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            )
            .bind(row.team_id)
            .bind(i16::from(row.age_group.years()))
            .bind(row.gender.as_str())
            .bind(row.games_played as i32)
            .bind(row.win_pct)
            .bind(row.raw_points)
            .bind(row.raw_offense)
            .bind(row.raw_defense)
            .bind(row.raw_sos)
            .bind(row.norm_offense)
            .bind(row.norm_defense)
            .bind(row.norm_sos)
            .bind(row.power_score)
            .bind(row.rank.map(|r| r as i32))
            .bind(row.status.as_str())
            .bind(row.computed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("committing ranking snapshot")?;
        Ok(())
    }
}
