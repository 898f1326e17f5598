//! Merge planning: dry-run every completed slot branch against the base.
//!
//! Planning leaves no residue. Each branch is probed with the shim's
//! dry-run protocol (merge without commit or fast-forward, then hard-reset
//! on success or abort on conflict), so the base working copy ends exactly
//! where it started.

use tracing::{debug, info};

use super::types::{MergePlan, MergeStep, StepState};
use super::MergeError;
use crate::git::GitRepo;
use crate::model::{BranchName, SlotNumber};

/// One completed slot branch to plan for.
#[derive(Clone, Debug)]
pub struct MergeCandidate {
    pub slot: SlotNumber,
    pub branch: BranchName,
}

/// Predict the merge outcome for each candidate, in order.
pub async fn plan_merges(
    repo: &GitRepo,
    base_branch: &str,
    candidates: &[MergeCandidate],
) -> Result<MergePlan, MergeError> {
    let root = repo.root().to_path_buf();
    repo.checkout(&root, base_branch).await?;

    let mut steps = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        debug!(branch = %candidate.branch, "dry-running merge");
        let predicted_conflicts = repo.merge_dry_run(&root, &candidate.branch).await?;
        let state = if predicted_conflicts.is_empty() {
            StepState::Ready
        } else {
            StepState::Blocked
        };
        info!(
            branch = %candidate.branch,
            state = %state,
            conflicts = predicted_conflicts.len(),
            "planned merge step"
        );
        steps.push(MergeStep {
            slot: candidate.slot,
            branch: candidate.branch.clone(),
            state,
            predicted_conflicts,
        });
    }

    Ok(MergePlan {
        base_branch: base_branch.to_owned(),
        steps,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
