//! Cohort ranking engine.
//!
//! Stateless over the persisted game and team data: every run recomputes
//! from scratch, trading compute for correctness. Per cohort the engine
//! windows each team's recent games, derives raw components, adjusts for
//! opponent strength, normalizes within the cohort and assembles a
//! reproducible ordering.

pub mod sos;

use crate::config::RankingConfig;
use crate::models::{
    CanonicalGame, CanonicalTeam, Cohort, CohortRankingRow, RankStatus,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use sos::{baseline_strengths, observed_strengths, refine_strengths, schedule_strength, points_for};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// One windowed game from a team's perspective, already recency-weighted.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub weight: f64,
    /// Canonical opponent, when that side resolved.
    pub opponent: Option<Uuid>,
    pub points: f64,
    pub goals_for: f64,
    pub goals_against: f64,
    pub won: bool,
    pub drew: bool,
}

/// A team's selected games inside the rolling window, most recent first.
#[derive(Debug, Clone)]
pub struct TeamWindow {
    pub team_id: Uuid,
    pub entries: Vec<WindowEntry>,
}

impl TeamWindow {
    pub fn games_played(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn weighted_points(&self) -> f64 {
        self.entries.iter().map(|e| e.weight * e.points).sum()
    }

    pub fn weighted_goals_for(&self) -> f64 {
        self.entries.iter().map(|e| e.weight * e.goals_for).sum()
    }

    pub fn weighted_goals_against(&self) -> f64 {
        self.entries.iter().map(|e| e.weight * e.goals_against).sum()
    }

    pub fn win_pct(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let wins = self.entries.iter().filter(|e| e.won).count();
        wins as f64 / self.entries.len() as f64
    }
}

pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Rank every cohort present among the given teams. Cohorts are
    /// independent, so they fan out across threads.
    pub fn rank_all(
        &self,
        teams: &[CanonicalTeam],
        games: &[CanonicalGame],
        as_of: NaiveDate,
        computed_at: DateTime<Utc>,
    ) -> Vec<CohortRankingRow> {
        let mut cohorts: Vec<Cohort> = teams
            .iter()
            .filter(|t| !t.deprecated)
            .map(|t| t.cohort())
            .collect();
        cohorts.sort_by_key(|c| (c.age_group, c.gender.as_str()));
        cohorts.dedup();

        cohorts
            .par_iter()
            .flat_map(|cohort| self.rank_cohort(*cohort, teams, games, as_of, computed_at))
            .collect()
    }

    /// Rank one cohort. `teams` and `games` may span the whole dataset;
    /// membership is filtered here and out-of-cohort games still feed the
    /// partial-signal opponent estimates.
    pub fn rank_cohort(
        &self,
        cohort: Cohort,
        teams: &[CanonicalTeam],
        games: &[CanonicalGame],
        as_of: NaiveDate,
        computed_at: DateTime<Utc>,
    ) -> Vec<CohortRankingRow> {
        let mut members: Vec<&CanonicalTeam> = teams
            .iter()
            .filter(|t| !t.deprecated && t.cohort() == cohort)
            .collect();
        members.sort_by_key(|t| t.id);
        if members.is_empty() {
            return Vec::new();
        }

        let windows: Vec<TeamWindow> = members
            .iter()
            .map(|t| build_window(&self.config, t.id, games, as_of))
            .collect();

        let baseline = baseline_strengths(&windows, self.config.min_games);
        let observed = observed_strengths(games, &self.config, as_of);
        let strengths = refine_strengths(
            &baseline,
            &windows,
            &observed,
            self.config.sos_iterations,
            self.config.sos_default,
        );

        struct Raw {
            team_id: Uuid,
            games_played: u32,
            win_pct: f64,
            points: f64,
            offense: f64,
            defense: f64,
            sos: f64,
        }

        let raws: Vec<Raw> = windows
            .iter()
            .map(|w| Raw {
                team_id: w.team_id,
                games_played: w.games_played(),
                win_pct: w.win_pct(),
                points: w.weighted_points(),
                offense: w.weighted_goals_for(),
                defense: w.weighted_goals_against(),
                sos: schedule_strength(w, &strengths, &observed, self.config.sos_default),
            })
            .collect();

        let active: Vec<&Raw> = raws
            .iter()
            .filter(|r| r.games_played >= self.config.min_games)
            .collect();

        // Normalization is cohort-scoped by construction: percentiles are
        // computed over this cohort's active teams and nothing else.
        let offense_values: Vec<f64> = active.iter().map(|r| r.offense).collect();
        let defense_values: Vec<f64> = active.iter().map(|r| -r.defense).collect();
        let sos_values: Vec<f64> = active.iter().map(|r| r.sos).collect();
        let norm_offense = percentile_ranks(&offense_values);
        let norm_defense = percentile_ranks(&defense_values);
        let norm_sos = percentile_ranks(&sos_values);

        struct Scored {
            index: usize,
            power: f64,
        }

        let mut scored: Vec<Scored> = active
            .iter()
            .enumerate()
            .map(|(i, _)| Scored {
                index: i,
                power: self.config.weight_offense * norm_offense[i]
                    + self.config.weight_defense * norm_defense[i]
                    + self.config.weight_sos * norm_sos[i],
            })
            .collect();
        // Reproducible ordering: power, then win percentage, then team id.
        scored.sort_by(|a, b| {
            b.power
                .total_cmp(&a.power)
                .then_with(|| {
                    active[b.index]
                        .win_pct
                        .total_cmp(&active[a.index].win_pct)
                })
                .then_with(|| active[a.index].team_id.cmp(&active[b.index].team_id))
        });

        let mut rows: Vec<CohortRankingRow> = Vec::with_capacity(raws.len());
        for (position, s) in scored.iter().enumerate() {
            let raw = active[s.index];
            rows.push(CohortRankingRow {
                team_id: raw.team_id,
                age_group: cohort.age_group,
                gender: cohort.gender,
                games_played: raw.games_played,
                win_pct: raw.win_pct,
                raw_points: raw.points,
                raw_offense: raw.offense,
                raw_defense: raw.defense,
                raw_sos: raw.sos,
                norm_offense: norm_offense[s.index],
                norm_defense: norm_defense[s.index],
                norm_sos: norm_sos[s.index],
                power_score: s.power,
                rank: Some(position as u32 + 1),
                status: RankStatus::Active,
                computed_at,
            });
        }

        // Below the minimum-games bar: retained with raw data, no position.
        for raw in raws
            .iter()
            .filter(|r| r.games_played < self.config.min_games)
        {
            rows.push(CohortRankingRow {
                team_id: raw.team_id,
                age_group: cohort.age_group,
                gender: cohort.gender,
                games_played: raw.games_played,
                win_pct: raw.win_pct,
                raw_points: raw.points,
                raw_offense: raw.offense,
                raw_defense: raw.defense,
                raw_sos: raw.sos,
                norm_offense: 0.0,
                norm_defense: 0.0,
                norm_sos: 0.0,
                power_score: 0.0,
                rank: None,
                status: RankStatus::Inactive,
                computed_at,
            });
        }

        debug!(
            cohort = %cohort,
            teams = rows.len(),
            active = scored.len(),
            "cohort ranked"
        );
        rows
    }
}

/// Select and weight one team's games: inside the rolling window, newest
/// first, capped, then tiered into recent/middle/oldest bands. Weights of
/// the selected games always sum to 1.0; empty bands redistribute their
/// weight proportionally.
pub fn build_window(
    config: &RankingConfig,
    team_id: Uuid,
    games: &[CanonicalGame],
    as_of: NaiveDate,
) -> TeamWindow {
    let cutoff = as_of - Duration::days(config.window_days);
    let mut selected: Vec<&CanonicalGame> = games
        .iter()
        .filter(|g| g.date > cutoff && g.date <= as_of)
        .filter(|g| g.home_team == Some(team_id) || g.away_team == Some(team_id))
        .collect();
    selected.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.game_id.cmp(&b.game_id)));
    selected.truncate(config.max_games);

    let n = selected.len();
    if n == 0 {
        return TeamWindow {
            team_id,
            entries: Vec::new(),
        };
    }

    // Band of index i among n games, thirds by recency: 0 recent, 2 oldest.
    let band_of = |i: usize| -> usize { (i * 3) / n };
    let mut band_counts = [0usize; 3];
    for i in 0..n {
        band_counts[band_of(i)] += 1;
    }
    let occupied_weight: f64 = (0..3)
        .filter(|b| band_counts[*b] > 0)
        .map(|b| config.band_weights[b])
        .sum();

    let entries = selected
        .iter()
        .enumerate()
        .map(|(i, game)| {
            let band = band_of(i);
            let weight = config.band_weights[band] / occupied_weight / band_counts[band] as f64;
            let is_home = game.home_team == Some(team_id);
            let (goals_for, goals_against) = if is_home {
                (game.home_score, game.away_score)
            } else {
                (game.away_score, game.home_score)
            };
            WindowEntry {
                weight,
                opponent: if is_home { game.away_team } else { game.home_team },
                points: points_for(config, goals_for, goals_against),
                goals_for: goals_for as f64,
                goals_against: goals_against as f64,
                won: goals_for > goals_against,
                drew: goals_for == goals_against,
            }
        })
        .collect();

    TeamWindow { team_id, entries }
}

/// Percentile rank of each value within its own slice, in [0, 1], higher
/// value first. Ties share the averaged rank, so a block of identical raw
/// values normalizes to one identical percentile; that is expected, not a
/// defect.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0.5];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg_position = (i + j) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = avg_position / (n - 1) as f64;
        }
        i = j + 1;
    }
    ranks
}

/// Group non-deprecated teams by cohort; handy for callers that report
/// per-cohort counts.
pub fn cohort_members(teams: &[CanonicalTeam]) -> HashMap<Cohort, Vec<Uuid>> {
    let mut members: HashMap<Cohort, Vec<Uuid>> = HashMap::new();
    for team in teams.iter().filter(|t| !t.deprecated) {
        members.entry(team.cohort()).or_default().push(team.id);
    }
    members
}
