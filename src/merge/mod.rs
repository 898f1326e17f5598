//! Merge coordination: plan → execute → (optional) automated resolution.
//!
//! After a session completes, each slot branch is merged back into the base
//! branch. The coordinator first *plans* (a residue-free dry run per branch,
//! predicting conflicts), then *executes* (sequential real merges, stopping
//! and rolling back at the first conflict). Automated three-way resolution
//! of trivial conflicts exists but only runs on explicit request.

pub mod execute;
pub mod plan;
pub mod resolve;
pub mod types;

pub use execute::{execute_merges, execute_merges_resolving};
pub use plan::{plan_merges, MergeCandidate};
pub use resolve::{
    classify_conflict, resolve_working_copy, Classification, RefusalReason, RefusedFile,
    ResolveReport, ResolvedFile,
};
pub use types::{BranchConflict, MergePlan, MergeResult, MergeStep, StepState};

use crate::git::GitError;

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Errors from the merge coordinator's machinery. Conflicts themselves are
/// not errors — they are reported in [`MergeResult`] and [`ResolveReport`].
#[derive(Clone, Debug)]
pub enum MergeError {
    /// The underlying repository operation failed.
    Git(GitError),
    /// The automated resolution step failed mechanically (I/O, subprocess).
    ResolutionFailed { detail: String },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git(e) => write!(f, "{e}"),
            Self::ResolutionFailed { detail } => {
                write!(f, "conflict resolution failed: {detail}")
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Git(e) => Some(e),
            Self::ResolutionFailed { .. } => None,
        }
    }
}

impl From<GitError> for MergeError {
    fn from(e: GitError) -> Self {
        Self::Git(e)
    }
}
