//! Error taxonomy for ingestion, resolution and maintenance.
//!
//! Quarantine and duplicate paths are handled inside the pipeline and never
//! propagate as run-level failures; run-level failure is reserved for the
//! backing store being unreachable, which is always safe to retry because
//! inserts are idempotent.

use thiserror::Error;

/// Why a record was parked for manual data-quality triage instead of
/// inserted. Quarantined records are never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuarantineReason {
    /// Both scores absent; the row is an incomplete scrape.
    MissingScore,
    MissingDate,
    /// A required identifying field (provider, team id, opponent id) is empty.
    MissingIdentity,
    /// Age group or gender text the normalizer could not parse.
    BadCohort,
    /// The two perspective rows disagree on age group beyond the tolerance.
    AgeGroupMismatch,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::MissingScore => "missing_score",
            QuarantineReason::MissingDate => "missing_date",
            QuarantineReason::MissingIdentity => "missing_identity",
            QuarantineReason::BadCohort => "bad_cohort",
            QuarantineReason::AgeGroupMismatch => "age_group_mismatch",
        }
    }
}

/// Hard failures out of the ingestion pipeline. Expected outcomes
/// (duplicate skips, review-band resolutions, conflicts) are modeled as
/// outcome variants, not errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Failures of the merge/unmerge maintenance operations. Any partial
/// application must have been rolled back by the store before this is
/// returned.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("team not found: {0}")]
    TeamNotFound(uuid::Uuid),
    #[error("cannot merge a team into itself")]
    SelfMerge,
    #[error("merge target {0} is deprecated")]
    TargetDeprecated(uuid::Uuid),
    #[error("source {source_id} and target {target} are in different cohorts")]
    CohortMismatch {
        source_id: uuid::Uuid,
        target: uuid::Uuid,
    },
    #[error("team {0} has fewer than two aliases, nothing to split")]
    NothingToSplit(uuid::Uuid),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarantine_reason_labels() {
        assert_eq!(QuarantineReason::MissingScore.as_str(), "missing_score");
        assert_eq!(
            QuarantineReason::AgeGroupMismatch.as_str(),
            "age_group_mismatch"
        );
    }
}
