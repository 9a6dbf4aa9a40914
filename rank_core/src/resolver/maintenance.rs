//! Merge and unmerge corrections to the identity graph.
//!
//! Teams, aliases and games form a bipartite graph; both corrections are
//! graph rewrites that the store applies transactionally. Validation and
//! planning happen here, application (and rollback on partial failure)
//! happens inside the store. Callers must serialize these operations against
//! concurrent ingestion for the affected teams.

use crate::error::MergeError;
use crate::models::{CanonicalTeam, TeamAlias};
use crate::store::{AliasKey, IdentityStore, MaintenanceStore, MergeReport, SplitPlan, SplitReport};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Fold `source` into `target`: every alias and game reference moves to
/// `target`, `source` is deprecated with a `merged_into` pointer. Ranking
/// snapshots for both teams are invalidated by the store.
pub async fn merge_teams(
    identity: &dyn IdentityStore,
    maintenance: &dyn MaintenanceStore,
    source: Uuid,
    target: Uuid,
) -> Result<MergeReport, MergeError> {
    if source == target {
        return Err(MergeError::SelfMerge);
    }
    let source_team = identity
        .get_team(source)
        .await?
        .ok_or(MergeError::TeamNotFound(source))?;
    let target_team = identity
        .get_team(target)
        .await?
        .ok_or(MergeError::TeamNotFound(target))?;
    if target_team.deprecated {
        return Err(MergeError::TargetDeprecated(target));
    }
    if source_team.cohort() != target_team.cohort() {
        return Err(MergeError::CohortMismatch { source_id: source, target });
    }

    let report = maintenance.apply_merge(source, target).await?;
    info!(
        %source,
        %target,
        aliases_moved = report.aliases_moved,
        games_moved = report.games_moved,
        "merged duplicate team identity"
    );
    Ok(report)
}

/// Split one incorrectly merged identity back into two.
///
/// The earliest-created alias anchors the original identity; every
/// later-created alias, and every game keyed by those provider ids, moves
/// onto a new team seeded from the original. The store applies the move
/// atomically.
pub async fn unmerge_team(
    identity: &dyn IdentityStore,
    maintenance: &dyn MaintenanceStore,
    team_id: Uuid,
) -> Result<SplitReport, MergeError> {
    let team = identity
        .get_team(team_id)
        .await?
        .ok_or(MergeError::TeamNotFound(team_id))?;

    let mut aliases = identity.aliases_for_team(team_id).await?;
    if aliases.len() < 2 {
        return Err(MergeError::NothingToSplit(team_id));
    }
    // Deterministic ordering: creation time, then provider key.
    aliases.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| a.provider_team_id.cmp(&b.provider_team_id))
    });

    let moved: Vec<&TeamAlias> = aliases.iter().skip(1).collect();
    let new_team = split_seed(&team, moved[0]);
    let plan = SplitPlan {
        original: team_id,
        new_team,
        moved_aliases: moved
            .iter()
            .map(|a| AliasKey {
                provider: a.provider.clone(),
                provider_team_id: a.provider_team_id.clone(),
            })
            .collect(),
    };

    let report = maintenance.apply_split(&plan).await?;
    info!(
        original = %team_id,
        new_team = ?report.new_team_id,
        aliases_moved = report.aliases_moved,
        games_moved = report.games_moved,
        "split wrongly merged team identity"
    );
    Ok(report)
}

/// The split-off team keeps the cohort and club of the original but takes
/// its display name from what the split-out provider actually called it.
fn split_seed(original: &CanonicalTeam, first_moved: &TeamAlias) -> CanonicalTeam {
    let display_name = if first_moved.provider_team_name.trim().is_empty() {
        original.display_name.clone()
    } else {
        first_moved.provider_team_name.clone()
    };
    CanonicalTeam {
        id: Uuid::new_v4(),
        display_name,
        club_name: original.club_name.clone(),
        age_group: original.age_group,
        gender: original.gender,
        region: original.region.clone(),
        deprecated: false,
        merged_into: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgeGroup, CanonicalGame, Gender, MatchMethod, ReviewStatus,
    };
    use crate::store::memory::InMemoryStore;
    use crate::store::GameStore;
    use chrono::{Duration, NaiveDate, Utc};
    use std::sync::Arc;

    fn team(name: &str) -> CanonicalTeam {
        CanonicalTeam {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            club_name: "Rapids".to_string(),
            age_group: AgeGroup::new(12),
            gender: Gender::Male,
            region: None,
            deprecated: false,
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    fn alias(provider: &str, pid: &str, name: &str, team_id: Uuid, age_secs: i64) -> TeamAlias {
        TeamAlias {
            provider: provider.to_string(),
            provider_team_id: pid.to_string(),
            provider_team_name: name.to_string(),
            team_id,
            method: MatchMethod::DirectId,
            confidence: 1.0,
            status: ReviewStatus::Approved,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn game(provider: &str, home_pid: &str, away_pid: &str, home: Uuid, away: Uuid) -> CanonicalGame {
        CanonicalGame {
            game_id: format!("{provider}:2025-04-01:{home_pid}:{away_pid}"),
            provider: provider.to_string(),
            home_team: Some(home),
            away_team: Some(away),
            home_provider_id: home_pid.to_string(),
            away_provider_id: away_pid.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            home_score: 1,
            away_score: 0,
            age_group: AgeGroup::new(12),
            gender: Gender::Male,
            division: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_merge_moves_everything_and_deprecates() {
        let store = Arc::new(InMemoryStore::new());
        let keep = team("Rapids Blue");
        let dupe = team("Rapids Blue B");
        let other = team("Thunder");
        let (keep_id, dupe_id, other_id) = (keep.id, dupe.id, other.id);
        for t in [keep, dupe, other] {
            store.create_team(t).await.unwrap();
        }
        store
            .record_alias(alias("px", "1", "Rapids Blue", keep_id, 100))
            .await
            .unwrap();
        store
            .record_alias(alias("qy", "2", "Rapids Blue B", dupe_id, 50))
            .await
            .unwrap();
        store
            .insert(&game("qy", "2", "9", dupe_id, other_id))
            .await
            .unwrap();

        let report = merge_teams(store.as_ref(), store.as_ref(), dupe_id, keep_id)
            .await
            .unwrap();
        assert_eq!(report.aliases_moved, 1);
        assert_eq!(report.games_moved, 1);

        // Deprecated source holds only the merge pointer.
        let source = store.get_team(dupe_id).await.unwrap().unwrap();
        assert!(source.deprecated);
        assert_eq!(source.merged_into, Some(keep_id));
        assert!(source.is_consistent());

        // Zero aliases and zero games still reference the source.
        assert!(store.aliases_for_team(dupe_id).await.unwrap().is_empty());
        let games = store.all_games().await.unwrap();
        assert!(games
            .iter()
            .all(|g| g.home_team != Some(dupe_id) && g.away_team != Some(dupe_id)));
        assert!(games.iter().any(|g| g.home_team == Some(keep_id)));
    }

    #[tokio::test]
    async fn test_merge_rejects_cohort_mismatch() {
        let store = Arc::new(InMemoryStore::new());
        let a = team("Rapids Blue");
        let mut b = team("Rapids Blue");
        b.age_group = AgeGroup::new(14);
        let (a_id, b_id) = (a.id, b.id);
        store.create_team(a).await.unwrap();
        store.create_team(b).await.unwrap();

        let err = merge_teams(store.as_ref(), store.as_ref(), a_id, b_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::CohortMismatch { .. }));
    }

    #[tokio::test]
    async fn test_merge_rejects_deprecated_target() {
        let store = Arc::new(InMemoryStore::new());
        let a = team("Rapids Blue");
        let mut b = team("Rapids Blue");
        b.deprecated = true;
        b.merged_into = Some(Uuid::new_v4());
        let (a_id, b_id) = (a.id, b.id);
        store.create_team(a).await.unwrap();
        store.create_team(b).await.unwrap();

        let err = merge_teams(store.as_ref(), store.as_ref(), a_id, b_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::TargetDeprecated(_)));
    }

    #[tokio::test]
    async fn test_unmerge_splits_later_aliases_with_their_games() {
        let store = Arc::new(InMemoryStore::new());
        let merged = team("Rapids Blue");
        let opponent = team("Thunder");
        let (merged_id, opponent_id) = (merged.id, opponent.id);
        store.create_team(merged).await.unwrap();
        store.create_team(opponent).await.unwrap();

        // Earliest alias anchors the original; the later one splits out.
        store
            .record_alias(alias("px", "1", "Rapids Blue", merged_id, 1000))
            .await
            .unwrap();
        store
            .record_alias(alias("px", "2", "Rapids Blue D2", merged_id, 10))
            .await
            .unwrap();
        store
            .insert(&game("px", "1", "9", merged_id, opponent_id))
            .await
            .unwrap();
        store
            .insert(&game("px", "2", "9", merged_id, opponent_id))
            .await
            .unwrap();

        let report = unmerge_team(store.as_ref(), store.as_ref(), merged_id)
            .await
            .unwrap();
        let new_id = report.new_team_id.unwrap();
        assert_eq!(report.aliases_moved, 1);
        assert_eq!(report.games_moved, 1);

        // The original keeps alias "1" and its game; "2" moved wholesale.
        let kept = store.aliases_for_team(merged_id).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].provider_team_id, "1");
        let moved = store.aliases_for_team(new_id).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].provider_team_id, "2");

        let games = store.all_games().await.unwrap();
        let game1 = games.iter().find(|g| g.home_provider_id == "1").unwrap();
        let game2 = games.iter().find(|g| g.home_provider_id == "2").unwrap();
        assert_eq!(game1.home_team, Some(merged_id));
        assert_eq!(game2.home_team, Some(new_id));

        // The split-off team is named after what its provider called it.
        let new_team = store.get_team(new_id).await.unwrap().unwrap();
        assert_eq!(new_team.display_name, "Rapids Blue D2");
        assert_eq!(new_team.cohort().age_group, AgeGroup::new(12));
    }

    #[tokio::test]
    async fn test_unmerge_requires_two_aliases() {
        let store = Arc::new(InMemoryStore::new());
        let t = team("Rapids Blue");
        let t_id = t.id;
        store.create_team(t).await.unwrap();
        store
            .record_alias(alias("px", "1", "Rapids Blue", t_id, 0))
            .await
            .unwrap();

        let err = unmerge_team(store.as_ref(), store.as_ref(), t_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::NothingToSplit(_)));
    }
}
