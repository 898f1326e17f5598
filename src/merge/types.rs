//! Merge coordinator types.
//!
//! A [`MergePlan`] is the dry-run prediction: one step per completed slot,
//! marked `ready` or `blocked` by its predicted conflict set. A
//! [`MergeResult`] is what actually happened: merged branches, remaining
//! conflicts, and whether a conflicted merge was rolled back.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{BranchName, SlotNumber};

// ---------------------------------------------------------------------------
// StepState
// ---------------------------------------------------------------------------

/// Predicted state of one merge step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepState {
    /// No conflicts predicted.
    Ready,
    /// Conflicts predicted; see the step's conflict list.
    Blocked,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeStep
// ---------------------------------------------------------------------------

/// One slot branch's predicted merge outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStep {
    /// The slot that produced the branch.
    pub slot: SlotNumber,
    /// The branch to merge.
    pub branch: BranchName,
    /// Predicted state against the base at planning time.
    pub state: StepState,
    /// Paths predicted to conflict (empty for `ready`).
    pub predicted_conflicts: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// MergePlan
// ---------------------------------------------------------------------------

/// The full dry-run prediction for a session's branches.
///
/// Predictions are advisory: each step was probed against the *unmerged*
/// base, so earlier real merges can invalidate later predictions in either
/// direction. Execution attempts steps in order and trusts git, not the
/// plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    /// The branch merged into.
    pub base_branch: String,
    /// Steps in slot order.
    pub steps: Vec<MergeStep>,
}

impl MergePlan {
    /// Steps with no predicted conflicts.
    #[must_use]
    pub fn ready_steps(&self) -> Vec<&MergeStep> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Ready)
            .collect()
    }

    /// Steps with predicted conflicts.
    #[must_use]
    pub fn blocked_steps(&self) -> Vec<&MergeStep> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Blocked)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BranchConflict / MergeResult
// ---------------------------------------------------------------------------

/// A branch whose real merge conflicted, with the conflicting paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchConflict {
    pub branch: BranchName,
    pub files: Vec<PathBuf>,
}

/// Outcome of executing a merge plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    /// True when every attempted merge landed without conflicts.
    pub success: bool,
    /// Branches actually merged into the base, in order.
    pub merged_branches: Vec<BranchName>,
    /// Conflicts that stopped execution (at most one entry — execution
    /// stops at the first conflicted branch).
    pub conflicts: Vec<BranchConflict>,
    /// True when a conflicted merge was aborted and the base rolled back to
    /// its pre-attempt state.
    pub rolled_back: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn step(slot: u8, branch: &str, conflicts: &[&str]) -> MergeStep {
        MergeStep {
            slot: SlotNumber::new(slot).unwrap(),
            branch: BranchName::new(branch).unwrap(),
            state: if conflicts.is_empty() {
                StepState::Ready
            } else {
                StepState::Blocked
            },
            predicted_conflicts: conflicts.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn plan_partitions_steps_by_state() {
        let plan = MergePlan {
            base_branch: "main".to_owned(),
            steps: vec![
                step(1, "xroads/slot-1-claude-us-001", &[]),
                step(2, "xroads/slot-2-codex-us-002", &["src/lib.rs"]),
            ],
        };
        assert_eq!(plan.ready_steps().len(), 1);
        assert_eq!(plan.blocked_steps().len(), 1);
        assert_eq!(
            plan.blocked_steps()[0].predicted_conflicts,
            vec![PathBuf::from("src/lib.rs")]
        );
    }

    #[test]
    fn result_serialises_camel_case() {
        let result = MergeResult {
            success: false,
            merged_branches: vec![BranchName::new("xroads/slot-1-claude-us-001").unwrap()],
            conflicts: vec![BranchConflict {
                branch: BranchName::new("xroads/slot-2-codex-us-002").unwrap(),
                files: vec![PathBuf::from("src/lib.rs")],
            }],
            rolled_back: true,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"mergedBranches\""));
        assert!(json.contains("\"rolledBack\":true"));
        let back: MergeResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
