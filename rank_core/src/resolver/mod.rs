//! Team identity resolution.
//!
//! Maps a provider-scoped team reference onto a canonical team through a
//! strict priority cascade:
//!
//! 1. Direct-ID: a previously approved alias is authoritative and overrides
//!    any fuzzy signal.
//! 2. Fuzzy: similarity against canonical teams of the same cohort only;
//!    cross-cohort candidates are never generated.
//! 3. Creation: no plausible candidate means a new canonical team, aliased
//!    immediately so the provider id is stable from then on.
//!
//! Scores inside the review band enqueue a human decision and resolve to an
//! unresolved reference; low confidence is never an error.

pub mod maintenance;

use crate::config::ResolverConfig;
use crate::matching::score_candidate;
use crate::models::{
    AgeGroup, CanonicalTeam, Cohort, Gender, MatchMethod, ReviewQueueEntry, ReviewStatus,
    TeamAlias,
};
use crate::store::IdentityStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One provider-side team reference, as seen in a result row.
#[derive(Debug, Clone)]
pub struct TeamSighting {
    pub provider: String,
    pub provider_team_id: String,
    pub team_name: String,
    pub club_name: String,
    pub age_group: AgeGroup,
    pub gender: Gender,
}

impl TeamSighting {
    pub fn cohort(&self) -> Cohort {
        Cohort {
            age_group: self.age_group,
            gender: self.gender,
        }
    }
}

/// What resolution produced for one sighting.
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved {
        team_id: Uuid,
        method: MatchMethod,
        confidence: f64,
    },
    /// Confidence fell in the review band; a queue entry exists (or already
    /// existed) and the referencing game is ingested with this side unset.
    PendingReview {
        candidate: Option<Uuid>,
        confidence: f64,
    },
}

impl Resolution {
    pub fn team_id(&self) -> Option<Uuid> {
        match self {
            Resolution::Resolved { team_id, .. } => Some(*team_id),
            Resolution::PendingReview { .. } => None,
        }
    }
}

pub struct TeamResolver {
    store: Arc<dyn IdentityStore>,
    config: ResolverConfig,
}

impl TeamResolver {
    pub fn new(store: Arc<dyn IdentityStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub async fn resolve(&self, sighting: &TeamSighting) -> Result<Resolution> {
        // Tier 1: an approved alias is a previously confirmed mapping.
        if let Some(alias) = self
            .store
            .find_approved_alias(&sighting.provider, &sighting.provider_team_id)
            .await?
        {
            return Ok(Resolution::Resolved {
                team_id: alias.team_id,
                method: MatchMethod::DirectId,
                confidence: 1.0,
            });
        }

        // Tier 2: fuzzy search, cohort-restricted by construction.
        let candidates = self.store.teams_in_cohort(sighting.cohort()).await?;
        let best = candidates
            .iter()
            .map(|team| {
                let score = score_candidate(
                    &sighting.team_name,
                    &sighting.club_name,
                    &team.display_name,
                    &team.club_name,
                );
                (team, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((team, score)) = best {
            if score >= self.config.auto_approve_threshold {
                return self.approve_fuzzy(sighting, team.id, score).await;
            }
            if score >= self.config.review_threshold {
                return self.enqueue(sighting, Some(team.id), score).await;
            }
        }

        // Tier 3: nothing plausible; this is a new team.
        self.create_team(sighting).await
    }

    async fn approve_fuzzy(
        &self,
        sighting: &TeamSighting,
        team_id: Uuid,
        score: f64,
    ) -> Result<Resolution> {
        let alias = TeamAlias {
            provider: sighting.provider.clone(),
            provider_team_id: sighting.provider_team_id.clone(),
            provider_team_name: sighting.team_name.clone(),
            team_id,
            method: MatchMethod::FuzzyAuto,
            confidence: score,
            status: ReviewStatus::Approved,
            created_at: Utc::now(),
        };
        if self.store.record_alias(alias).await? {
            debug!(
                provider = %sighting.provider,
                provider_team_id = %sighting.provider_team_id,
                score,
                "fuzzy auto-approved alias"
            );
            return Ok(Resolution::Resolved {
                team_id,
                method: MatchMethod::FuzzyAuto,
                confidence: score,
            });
        }
        // A concurrent run approved this key first; its mapping wins.
        self.existing_or(team_id, MatchMethod::FuzzyAuto, score, sighting)
            .await
    }

    async fn enqueue(
        &self,
        sighting: &TeamSighting,
        candidate: Option<Uuid>,
        score: f64,
    ) -> Result<Resolution> {
        let entry = ReviewQueueEntry {
            id: Uuid::new_v4(),
            provider: sighting.provider.clone(),
            provider_team_id: sighting.provider_team_id.clone(),
            provider_team_name: sighting.team_name.clone(),
            club_name: sighting.club_name.clone(),
            age_group: sighting.age_group,
            gender: sighting.gender,
            candidate_team_id: candidate,
            confidence: score,
            status: ReviewStatus::Pending,
            applied: false,
            created_at: Utc::now(),
        };
        if self.store.enqueue_review(entry).await?.is_some() {
            info!(
                provider = %sighting.provider,
                provider_team_id = %sighting.provider_team_id,
                score,
                "resolution ambiguous, queued for review"
            );
        }
        Ok(Resolution::PendingReview {
            candidate,
            confidence: score,
        })
    }

    async fn create_team(&self, sighting: &TeamSighting) -> Result<Resolution> {
        let team = CanonicalTeam {
            id: Uuid::new_v4(),
            display_name: sighting.team_name.clone(),
            club_name: sighting.club_name.clone(),
            age_group: sighting.age_group,
            gender: sighting.gender,
            region: None,
            deprecated: false,
            merged_into: None,
            created_at: Utc::now(),
        };
        let team_id = team.id;
        self.store.create_team(team).await?;

        // Alias the provider id immediately: the identity must be stable for
        // future imports even though it was created rather than matched.
        let alias = TeamAlias {
            provider: sighting.provider.clone(),
            provider_team_id: sighting.provider_team_id.clone(),
            provider_team_name: sighting.team_name.clone(),
            team_id,
            method: MatchMethod::DirectId,
            confidence: 1.0,
            status: ReviewStatus::Approved,
            created_at: Utc::now(),
        };
        if self.store.record_alias(alias).await? {
            info!(
                provider = %sighting.provider,
                provider_team_id = %sighting.provider_team_id,
                %team_id,
                "created canonical team for unmatched sighting"
            );
            return Ok(Resolution::Resolved {
                team_id,
                method: MatchMethod::DirectId,
                confidence: 1.0,
            });
        }
        self.existing_or(team_id, MatchMethod::DirectId, 1.0, sighting)
            .await
    }

    /// After losing an alias race, defer to whatever mapping won.
    async fn existing_or(
        &self,
        fallback_team: Uuid,
        method: MatchMethod,
        confidence: f64,
        sighting: &TeamSighting,
    ) -> Result<Resolution> {
        match self
            .store
            .find_approved_alias(&sighting.provider, &sighting.provider_team_id)
            .await?
        {
            Some(alias) => Ok(Resolution::Resolved {
                team_id: alias.team_id,
                method: MatchMethod::DirectId,
                confidence: 1.0,
            }),
            None => Ok(Resolution::Resolved {
                team_id: fallback_team,
                method,
                confidence,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn sighting(provider: &str, id: &str, name: &str, club: &str) -> TeamSighting {
        TeamSighting {
            provider: provider.to_string(),
            provider_team_id: id.to_string(),
            team_name: name.to_string(),
            club_name: club.to_string(),
            age_group: AgeGroup::new(12),
            gender: Gender::Male,
        }
    }

    fn team(name: &str, club: &str, age: u8, gender: Gender) -> CanonicalTeam {
        CanonicalTeam {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            club_name: club.to_string(),
            age_group: AgeGroup::new(age),
            gender,
            region: None,
            deprecated: false,
            merged_into: None,
            created_at: Utc::now(),
        }
    }

    fn resolver(store: Arc<InMemoryStore>) -> TeamResolver {
        TeamResolver::new(store, ResolverConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_sighting_creates_team_and_alias() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = resolver(store.clone());

        let result = resolver
            .resolve(&sighting("px", "77", "Rapids 2013 Blue", "Rapids"))
            .await
            .unwrap();

        let Resolution::Resolved {
            team_id,
            method,
            confidence,
        } = result
        else {
            panic!("expected resolved");
        };
        assert_eq!(method, MatchMethod::DirectId);
        assert_eq!(confidence, 1.0);
        assert!(store.get_team(team_id).await.unwrap().is_some());
        assert_eq!(store.alias_count(), 1);
    }

    #[tokio::test]
    async fn test_direct_id_precedence_over_fuzzy() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = resolver(store.clone());

        // First sighting creates the team and a direct alias.
        let first = resolver
            .resolve(&sighting("px", "77", "Rapids 2013 Blue", "Rapids"))
            .await
            .unwrap();
        let original = first.team_id().unwrap();

        // A second canonical team with an identical name would fuzzy-match,
        // but the approved alias must win.
        store
            .create_team(team("Rapids 2013 Blue", "Rapids", 12, Gender::Male))
            .await
            .unwrap();

        let second = resolver
            .resolve(&sighting("px", "77", "Rapids 2013 Blue", "Rapids"))
            .await
            .unwrap();
        let Resolution::Resolved {
            team_id, method, ..
        } = second
        else {
            panic!("expected resolved");
        };
        assert_eq!(team_id, original);
        assert_eq!(method, MatchMethod::DirectId);
    }

    #[tokio::test]
    async fn test_fuzzy_auto_approves_high_score() {
        let store = Arc::new(InMemoryStore::new());
        let existing = team("Rapids 2013 Blue", "Rapids", 12, Gender::Male);
        let existing_id = existing.id;
        store.create_team(existing).await.unwrap();
        let resolver = resolver(store.clone());

        // Different provider, near-identical name.
        let result = resolver
            .resolve(&sighting("qy", "a9", "Rapids U12 Blue", "Rapids FC"))
            .await
            .unwrap();

        let Resolution::Resolved {
            team_id,
            method,
            confidence,
        } = result
        else {
            panic!("expected resolved");
        };
        assert_eq!(team_id, existing_id);
        assert_eq!(method, MatchMethod::FuzzyAuto);
        assert!(confidence >= 0.90);

        // The alias must now be approved, so the next import is direct.
        let again = resolver
            .resolve(&sighting("qy", "a9", "Rapids U12 Blue", "Rapids FC"))
            .await
            .unwrap();
        let Resolution::Resolved { method, .. } = again else {
            panic!("expected resolved");
        };
        assert_eq!(method, MatchMethod::DirectId);
    }

    #[tokio::test]
    async fn test_review_band_enqueues_and_stays_unresolved() {
        let store = Arc::new(InMemoryStore::new());
        let existing = team("Rapids Blue", "Rapids", 12, Gender::Male);
        let existing_id = existing.id;
        store.create_team(existing).await.unwrap();
        let resolver = TeamResolver::new(
            store.clone(),
            ResolverConfig {
                auto_approve_threshold: 0.99,
                review_threshold: 0.50,
            },
        );

        let result = resolver
            .resolve(&sighting("qy", "b4", "Rapids Blau", "Rapids"))
            .await
            .unwrap();

        let Resolution::PendingReview {
            candidate,
            confidence,
        } = result
        else {
            panic!("expected review");
        };
        assert_eq!(candidate, Some(existing_id));
        assert!(confidence >= 0.50 && confidence < 0.99);
        assert_eq!(store.reviews().len(), 1);

        // Re-importing the same sighting must not stack duplicate entries.
        resolver
            .resolve(&sighting("qy", "b4", "Rapids Blau", "Rapids"))
            .await
            .unwrap();
        assert_eq!(store.reviews().len(), 1);
    }

    #[tokio::test]
    async fn test_cohort_isolation_in_fuzzy_matching() {
        let store = Arc::new(InMemoryStore::new());
        // Identical name, wrong cohort on both axes.
        store
            .create_team(team("Rapids 2013 Blue", "Rapids", 14, Gender::Male))
            .await
            .unwrap();
        store
            .create_team(team("Rapids 2013 Blue", "Rapids", 12, Gender::Female))
            .await
            .unwrap();
        let resolver = resolver(store.clone());

        let result = resolver
            .resolve(&sighting("px", "3", "Rapids 2013 Blue", "Rapids"))
            .await
            .unwrap();

        // Neither cross-cohort team may absorb the sighting: a new team is
        // created in the U12 male cohort.
        let Resolution::Resolved {
            team_id, method, ..
        } = result
        else {
            panic!("expected resolved");
        };
        assert_eq!(method, MatchMethod::DirectId);
        let created = store.get_team(team_id).await.unwrap().unwrap();
        assert_eq!(created.age_group, AgeGroup::new(12));
        assert_eq!(created.gender, Gender::Male);
        assert_eq!(store.all_teams().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_deprecated_teams_excluded_from_candidates() {
        let store = Arc::new(InMemoryStore::new());
        let mut old = team("Rapids 2013 Blue", "Rapids", 12, Gender::Male);
        old.deprecated = true;
        old.merged_into = Some(Uuid::new_v4());
        store.create_team(old).await.unwrap();
        let resolver = resolver(store.clone());

        let result = resolver
            .resolve(&sighting("px", "8", "Rapids 2013 Blue", "Rapids"))
            .await
            .unwrap();

        let Resolution::Resolved { method, .. } = result else {
            panic!("expected resolved");
        };
        // The deprecated twin was not a candidate, so a fresh team appears.
        assert_eq!(method, MatchMethod::DirectId);
    }
}
