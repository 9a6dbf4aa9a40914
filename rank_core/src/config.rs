//! Runtime configuration for the resolver, pipeline and ranking engine.
//!
//! Every knob loads from environment variables with documented defaults so
//! the batch services can be tuned without a rebuild.

use std::env;

/// Default fuzzy score at or above which an alias is auto-approved.
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 0.90;

/// Default lower bound of the manual-review band.
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.70;

/// Default rolling ranking window in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 365;

/// Default cap on games per team inside the window.
pub const DEFAULT_MAX_GAMES: usize = 30;

/// Default minimum games for a team to hold a ranking position.
pub const DEFAULT_MIN_GAMES: u32 = 5;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Thresholds of the tiered resolution cascade.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Score at or above which a fuzzy match becomes an approved alias.
    pub auto_approve_threshold: f64,
    /// Score at or above which (but below auto-approve) a candidate goes to
    /// the review queue. Below this a new team is created.
    pub review_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: DEFAULT_AUTO_APPROVE_THRESHOLD,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
        }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        Self {
            auto_approve_threshold: env_f64(
                "FUZZY_AUTO_APPROVE_THRESHOLD",
                DEFAULT_AUTO_APPROVE_THRESHOLD,
            )
            .clamp(0.0, 1.0),
            review_threshold: env_f64("FUZZY_REVIEW_THRESHOLD", DEFAULT_REVIEW_THRESHOLD)
                .clamp(0.0, 1.0),
        }
    }
}

/// What to do when a deterministic game id collides with a differing
/// composite key (same teams/date, different scores).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the stored scores, record the conflict for review.
    KeepExisting,
    /// Reconcile to the incoming scores when the incoming scrape is newer,
    /// still recording the conflict.
    UpdateIfNewer,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum age-group distance the two perspective rows may disagree by
    /// before the second row quarantines.
    pub age_group_tolerance: u8,
    pub conflict_policy: ConflictPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            age_group_tolerance: 0,
            conflict_policy: ConflictPolicy::KeepExisting,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let conflict_policy = match env::var("CONFLICT_POLICY").as_deref() {
            Ok("update_if_newer") => ConflictPolicy::UpdateIfNewer,
            _ => ConflictPolicy::KeepExisting,
        };
        Self {
            age_group_tolerance: env_parse("AGE_GROUP_TOLERANCE", 0),
            conflict_policy,
        }
    }
}

/// Knobs of the cohort ranking computation.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub window_days: i64,
    pub max_games: usize,
    /// Recency band weights (recent, middle, oldest); must sum to 1.0.
    pub band_weights: [f64; 3],
    pub win_points: f64,
    pub draw_points: f64,
    pub loss_points: f64,
    pub min_games: u32,
    /// Fixed-point refinement passes for opponent strength.
    pub sos_iterations: u32,
    /// Last-resort opponent strength when a team has no observable games.
    pub sos_default: f64,
    pub weight_offense: f64,
    pub weight_defense: f64,
    pub weight_sos: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            max_games: DEFAULT_MAX_GAMES,
            band_weights: [0.50, 0.35, 0.15],
            win_points: 3.0,
            draw_points: 1.0,
            loss_points: 0.0,
            min_games: DEFAULT_MIN_GAMES,
            sos_iterations: 2,
            sos_default: 1.0,
            weight_offense: 0.25,
            weight_defense: 0.25,
            weight_sos: 0.50,
        }
    }
}

impl RankingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_days: env_parse("RANKING_WINDOW_DAYS", defaults.window_days),
            max_games: env_parse("RANKING_MAX_GAMES", defaults.max_games),
            band_weights: [
                env_f64("RANKING_WEIGHT_RECENT", defaults.band_weights[0]),
                env_f64("RANKING_WEIGHT_MIDDLE", defaults.band_weights[1]),
                env_f64("RANKING_WEIGHT_OLDEST", defaults.band_weights[2]),
            ],
            win_points: env_f64("RANKING_WIN_POINTS", defaults.win_points),
            draw_points: env_f64("RANKING_DRAW_POINTS", defaults.draw_points),
            loss_points: env_f64("RANKING_LOSS_POINTS", defaults.loss_points),
            min_games: env_parse("RANKING_MIN_GAMES", defaults.min_games),
            sos_iterations: env_parse("SOS_ITERATIONS", defaults.sos_iterations),
            sos_default: env_f64("SOS_DEFAULT", defaults.sos_default),
            weight_offense: env_f64("RANKING_COMPOSITE_OFFENSE", defaults.weight_offense),
            weight_defense: env_f64("RANKING_COMPOSITE_DEFENSE", defaults.weight_defense),
            weight_sos: env_f64("RANKING_COMPOSITE_SOS", defaults.weight_sos),
        }
    }
}
