//! Raw record normalization and perspective collapse.
//!
//! Providers deliver two rows per physical game, one from each team's point
//! of view. Orienting both rows on the home/away flag collapses them onto
//! the same (home id, away id, home score, away score) tuple, which is the
//! primary deduplication signal downstream.

use crate::error::QuarantineReason;
use crate::matching::normalize;
use crate::models::{AgeGroup, CompositeKey, Gender, ProviderGameRecord};
use crate::resolver::TeamSighting;
use chrono::{DateTime, NaiveDate, Utc};

/// One physical game, oriented into home/away, with both sides' provider
/// references kept for identity resolution.
#[derive(Debug, Clone)]
pub struct OrientedGame {
    pub provider: String,
    pub home_provider_id: String,
    pub away_provider_id: String,
    pub home_name: String,
    pub home_club: String,
    pub away_name: String,
    pub away_club: String,
    pub date: NaiveDate,
    pub home_score: u32,
    pub away_score: u32,
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub division: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl OrientedGame {
    /// Deterministic identifier:
    /// `"<provider>:<date>:<min(id1,id2)>:<max(id1,id2)>:<age>[:<division>]"`.
    ///
    /// Scores are deliberately excluded; a rescrape with corrected scores
    /// collides here and surfaces as a conflict instead of a second row.
    /// Age group and division qualify the id so the same pairing on the same
    /// date in two competitions stays two records.
    pub fn game_id(&self) -> String {
        let (lo, hi) = if self.home_provider_id <= self.away_provider_id {
            (&self.home_provider_id, &self.away_provider_id)
        } else {
            (&self.away_provider_id, &self.home_provider_id)
        };
        let mut id = format!(
            "{}:{}:{}:{}:{}",
            self.provider, self.date, lo, hi, self.age_group
        );
        if let Some(div) = &self.division {
            let slug = normalize(div).replace(' ', "-");
            if !slug.is_empty() {
                id.push(':');
                id.push_str(&slug);
            }
        }
        id
    }

    pub fn composite_key(&self) -> CompositeKey {
        CompositeKey {
            provider: self.provider.clone(),
            home_provider_id: self.home_provider_id.clone(),
            away_provider_id: self.away_provider_id.clone(),
            date: self.date,
            home_score: self.home_score,
            away_score: self.away_score,
        }
    }

    pub fn home_sighting(&self) -> TeamSighting {
        TeamSighting {
            provider: self.provider.clone(),
            provider_team_id: self.home_provider_id.clone(),
            team_name: self.home_name.clone(),
            club_name: self.home_club.clone(),
            age_group: self.age_group,
            gender: self.gender,
        }
    }

    pub fn away_sighting(&self) -> TeamSighting {
        TeamSighting {
            provider: self.provider.clone(),
            provider_team_id: self.away_provider_id.clone(),
            team_name: self.away_name.clone(),
            club_name: self.away_club.clone(),
            age_group: self.age_group,
            gender: self.gender,
        }
    }
}

/// Validate one provider row and orient it. Returns the quarantine reason
/// instead of a game when the row is malformed or incomplete.
pub fn normalize_record(record: &ProviderGameRecord) -> Result<OrientedGame, QuarantineReason> {
    if record.provider.trim().is_empty()
        || record.team_id.trim().is_empty()
        || record.opponent_id.trim().is_empty()
    {
        return Err(QuarantineReason::MissingIdentity);
    }
    let date = record.date.ok_or(QuarantineReason::MissingDate)?;
    let (goals_for, goals_against) = match (record.goals_for, record.goals_against) {
        (Some(gf), Some(ga)) => (gf, ga),
        _ => return Err(QuarantineReason::MissingScore),
    };
    let age_group: AgeGroup = record
        .age_group
        .parse()
        .map_err(|_| QuarantineReason::BadCohort)?;
    let gender = Gender::parse(&record.gender).ok_or(QuarantineReason::BadCohort)?;

    let division = record
        .division
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let game = if record.is_home {
        OrientedGame {
            provider: record.provider.clone(),
            home_provider_id: record.team_id.clone(),
            away_provider_id: record.opponent_id.clone(),
            home_name: record.team_name.clone(),
            home_club: record.club_name.clone(),
            away_name: record.opponent_name.clone(),
            away_club: record.opponent_club.clone(),
            date,
            home_score: goals_for,
            away_score: goals_against,
            age_group,
            gender,
            division,
            scraped_at: record.scraped_at,
        }
    } else {
        OrientedGame {
            provider: record.provider.clone(),
            home_provider_id: record.opponent_id.clone(),
            away_provider_id: record.team_id.clone(),
            home_name: record.opponent_name.clone(),
            home_club: record.opponent_club.clone(),
            away_name: record.team_name.clone(),
            away_club: record.club_name.clone(),
            date,
            home_score: goals_against,
            away_score: goals_for,
            age_group,
            gender,
            division,
            scraped_at: record.scraped_at,
        }
    };
    Ok(game)
}
