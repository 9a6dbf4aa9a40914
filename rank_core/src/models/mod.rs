//! Domain model for canonical teams, aliases, games and ranking rows.
//!
//! Everything the resolver, ingestion pipeline and ranking engine exchange
//! lives here. Provider codes stay open strings (new providers appear without
//! a code change); match methods and review states are closed enums so match
//! arms stay exhaustive.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Cohort axes: age group and gender
// ============================================================================

/// An age group such as U12. Stored as the age-cap year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgeGroup(u8);

impl AgeGroup {
    pub fn new(years: u8) -> Self {
        Self(years)
    }

    pub fn years(&self) -> u8 {
        self.0
    }

    /// Absolute distance in years, used for the cross-side mismatch tolerance.
    pub fn distance(&self, other: &AgeGroup) -> u8 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    /// Accepts the formats providers actually emit: "U12", "u12", "12U", "12".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        let rest: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_lowercase();
        if digits.is_empty() || (!rest.is_empty() && rest != "u") {
            return Err(format!("unrecognized age group: {trimmed:?}"));
        }
        let years: u8 = digits
            .parse()
            .map_err(|_| format!("unrecognized age group: {trimmed:?}"))?;
        if !(4..=23).contains(&years) {
            return Err(format!("age group out of range: {trimmed:?}"));
        }
        Ok(Self(years))
    }
}

impl TryFrom<String> for AgeGroup {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AgeGroup> for String {
    fn from(a: AgeGroup) -> String {
        a.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Coed,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Coed => "coed",
        }
    }

    /// Lenient parse covering the labels providers use for youth divisions.
    pub fn parse(raw: &str) -> Option<Gender> {
        match raw.trim().to_lowercase().as_str() {
            "m" | "b" | "male" | "boys" | "boy" | "men" => Some(Gender::Male),
            "f" | "g" | "female" | "girls" | "girl" | "women" => Some(Gender::Female),
            "x" | "coed" | "co-ed" | "mixed" => Some(Gender::Coed),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (age group, gender) ranking population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cohort {
    pub age_group: AgeGroup,
    pub gender: Gender,
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.age_group, self.gender)
    }
}

// ============================================================================
// Identity: canonical teams, aliases, review queue
// ============================================================================

/// How an alias was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    DirectId,
    FuzzyAuto,
    FuzzyReviewed,
    Manual,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::DirectId => "direct_id",
            MatchMethod::FuzzyAuto => "fuzzy_auto",
            MatchMethod::FuzzyReviewed => "fuzzy_reviewed",
            MatchMethod::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<MatchMethod> {
        match raw {
            "direct_id" => Some(MatchMethod::DirectId),
            "fuzzy_auto" => Some(MatchMethod::FuzzyAuto),
            "fuzzy_reviewed" => Some(MatchMethod::FuzzyReviewed),
            "manual" => Some(MatchMethod::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<ReviewStatus> {
        match raw {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

/// A deduplicated real-world team.
///
/// Never hard-deleted: merge corrections deprecate the losing identity and
/// leave a `merged_into` pointer so history stays navigable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTeam {
    pub id: Uuid,
    pub display_name: String,
    pub club_name: String,
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub region: Option<String>,
    pub deprecated: bool,
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalTeam {
    pub fn cohort(&self) -> Cohort {
        Cohort {
            age_group: self.age_group,
            gender: self.gender,
        }
    }

    /// Invariant: a team is deprecated exactly when it carries a merge pointer.
    pub fn is_consistent(&self) -> bool {
        self.deprecated == self.merged_into.is_some()
    }
}

/// One provider's identifier for a canonical team.
///
/// At most one `Approved` alias may exist per (provider, provider_team_id);
/// the stores enforce this and racing inserts surface as an expected outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAlias {
    pub provider: String,
    pub provider_team_id: String,
    /// Name the provider used for this team, kept for audit and splits.
    pub provider_team_name: String,
    pub team_id: Uuid,
    pub method: MatchMethod,
    pub confidence: f64,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// A low-confidence alias candidate parked for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub id: Uuid,
    pub provider: String,
    pub provider_team_id: String,
    pub provider_team_name: String,
    pub club_name: String,
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub candidate_team_id: Option<Uuid>,
    pub confidence: f64,
    pub status: ReviewStatus,
    /// Set once the approved decision has been folded back into the alias
    /// table and flagged games were re-resolved.
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Games
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameSide {
    Home,
    Away,
}

/// Natural key used purely for duplicate detection, independent of the
/// deterministic game identifier (which excludes scores).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub provider: String,
    pub home_provider_id: String,
    pub away_provider_id: String,
    pub date: NaiveDate,
    pub home_score: u32,
    pub away_score: u32,
}

/// One real match, oriented into home/away.
///
/// Immutable once persisted; score corrections go through the explicit
/// conflict path, never through a silent overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalGame {
    /// `"<provider>:<date>:<min(id1,id2)>:<max(id1,id2)>[:<age>[:<division>]]"`
    pub game_id: String,
    pub provider: String,
    /// Unset when identity resolution failed for that side; the game is kept
    /// and flagged for re-resolution rather than discarded.
    pub home_team: Option<Uuid>,
    pub away_team: Option<Uuid>,
    pub home_provider_id: String,
    pub away_provider_id: String,
    pub date: NaiveDate,
    pub home_score: u32,
    pub away_score: u32,
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub division: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CanonicalGame {
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

    pub fn is_unresolved(&self) -> bool {
        self.home_team.is_none() || self.away_team.is_none()
    }

    pub fn team_on(&self, side: GameSide) -> Option<Uuid> {
        match side {
            GameSide::Home => self.home_team,
            GameSide::Away => self.away_team,
        }
    }

    pub fn provider_id_on(&self, side: GameSide) -> &str {
        match side {
            GameSide::Home => &self.home_provider_id,
            GameSide::Away => &self.away_provider_id,
        }
    }
}

/// A deterministic identifier collision with a differing composite key:
/// same provider/teams/date, different scores. Recorded for reconciliation,
/// never silently resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConflict {
    pub game_id: String,
    pub existing: CompositeKey,
    pub incoming: CompositeKey,
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// Provider contract
// ============================================================================

/// One per-perspective result row as delivered by a scraping adapter.
///
/// Two rows arrive per physical game, one from each team's point of view;
/// the normalizer collapses them onto a single oriented game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGameRecord {
    pub provider: String,
    pub team_id: String,
    pub team_name: String,
    #[serde(default)]
    pub club_name: String,
    pub opponent_id: String,
    pub opponent_name: String,
    #[serde(default)]
    pub opponent_club: String,
    /// Raw provider text, e.g. "U12" or "2013"; parsed by the normalizer.
    pub age_group: String,
    pub gender: String,
    /// Absent or null when the provider page carried no date; the
    /// normalizer quarantines such rows.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub is_home: bool,
    pub goals_for: Option<u32>,
    pub goals_against: Option<u32>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

// ============================================================================
// Ranking output
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankStatus {
    Active,
    Inactive,
}

impl RankStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankStatus::Active => "active",
            RankStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<RankStatus> {
        match raw {
            "active" => Some(RankStatus::Active),
            "inactive" => Some(RankStatus::Inactive),
            _ => None,
        }
    }
}

/// One team's computed strength within one cohort at a point in time.
/// Snapshots are append-only; a new run supersedes, never mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRankingRow {
    pub team_id: Uuid,
    pub age_group: AgeGroup,
    pub gender: Gender,
    pub games_played: u32,
    pub win_pct: f64,
    pub raw_points: f64,
    pub raw_offense: f64,
    pub raw_defense: f64,
    pub raw_sos: f64,
    pub norm_offense: f64,
    pub norm_defense: f64,
    pub norm_sos: f64,
    pub power_score: f64,
    /// `None` for inactive teams: retained with raw data, excluded from
    /// ranking positions.
    pub rank: Option<u32>,
    pub status: RankStatus,
    pub computed_at: DateTime<Utc>,
}
