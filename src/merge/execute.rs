//! Merge execution: sequential real merges with stop-on-first-conflict.
//!
//! Attempts every step of the plan in order. Predictions are advisory —
//! earlier merges change the base, so a step planned `blocked` may now land
//! cleanly (and vice versa). The first real conflict stops execution: the
//! mid-merge state is aborted, the conflict recorded, and the result flagged
//! `rolled_back`. Branches merged before the stop stay merged.

use tracing::{info, warn};

use super::types::{BranchConflict, MergePlan, MergeResult};
use super::MergeError;
use crate::git::{GitRepo, MergeOptions, MergeOutcome};

/// Execute `plan` against the base branch.
pub async fn execute_merges(repo: &GitRepo, plan: &MergePlan) -> Result<MergeResult, MergeError> {
    let root = repo.root().to_path_buf();
    repo.checkout(&root, &plan.base_branch).await?;

    let mut merged_branches = Vec::new();
    let mut conflicts = Vec::new();
    let mut rolled_back = false;

    for step in &plan.steps {
        let outcome = repo
            .merge(
                &root,
                &step.branch,
                MergeOptions {
                    commit: true,
                    fast_forward: false,
                },
            )
            .await?;

        match outcome {
            MergeOutcome::Clean => {
                info!(branch = %step.branch, "merged");
                merged_branches.push(step.branch.clone());
            }
            MergeOutcome::Conflicted(files) => {
                warn!(
                    branch = %step.branch,
                    files = files.len(),
                    "merge conflict; aborting and stopping"
                );
                repo.abort_merge(&root).await?;
                conflicts.push(BranchConflict {
                    branch: step.branch.clone(),
                    files,
                });
                rolled_back = true;
                break;
            }
        }
    }

    Ok(MergeResult {
        success: conflicts.is_empty(),
        merged_branches,
        conflicts,
        rolled_back,
    })
}

/// Execute `plan`, attempting automated resolution at each conflict before
/// giving up. A fully resolved conflict is committed and execution
/// continues; a partially resolved one is aborted and stops execution as in
/// [`execute_merges`].
pub async fn execute_merges_resolving(
    repo: &GitRepo,
    plan: &MergePlan,
) -> Result<MergeResult, MergeError> {
    let root = repo.root().to_path_buf();
    repo.checkout(&root, &plan.base_branch).await?;

    let mut merged_branches = Vec::new();
    let mut conflicts = Vec::new();
    let mut rolled_back = false;

    for step in &plan.steps {
        let outcome = repo
            .merge(
                &root,
                &step.branch,
                MergeOptions {
                    commit: true,
                    fast_forward: false,
                },
            )
            .await?;

        match outcome {
            MergeOutcome::Clean => {
                info!(branch = %step.branch, "merged");
                merged_branches.push(step.branch.clone());
            }
            MergeOutcome::Conflicted(files) => {
                let report = super::resolve::resolve_working_copy(repo, &root).await?;
                if report.fully_resolved() {
                    info!(
                        branch = %step.branch,
                        resolved = report.resolved.len(),
                        "conflicts auto-resolved"
                    );
                    repo.commit(
                        &root,
                        &format!("merge {} (auto-resolved)", step.branch),
                        false,
                    )
                    .await?;
                    merged_branches.push(step.branch.clone());
                } else {
                    warn!(
                        branch = %step.branch,
                        refused = report.refused.len(),
                        "conflicts not auto-resolvable; aborting and stopping"
                    );
                    repo.abort_merge(&root).await?;
                    conflicts.push(BranchConflict {
                        branch: step.branch.clone(),
                        files,
                    });
                    rolled_back = true;
                    break;
                }
            }
        }
    }

    Ok(MergeResult {
        success: conflicts.is_empty(),
        merged_branches,
        conflicts,
        rolled_back,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::DEFAULT_COMMAND_TIMEOUT;
    use crate::merge::plan::{plan_merges, MergeCandidate};
    use crate::model::{BranchName, SlotNumber};
    use std::path::Path;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.name", "test"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.join("shared.txt"), "base\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", "init"]);
        git(dir, &["branch", "-M", "main"]);
    }

    fn commit_on_branch(dir: &Path, branch: &str, file: &str, contents: &str) {
        git(dir, &["checkout", "-q", "-b", branch, "main"]);
        std::fs::write(dir.join(file), contents).unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", &format!("edit {file}")]);
        git(dir, &["checkout", "-q", "main"]);
    }

    fn candidate(slot: u8, branch: &str) -> MergeCandidate {
        MergeCandidate {
            slot: SlotNumber::new(slot).unwrap(),
            branch: BranchName::new(branch).unwrap(),
        }
    }

    #[tokio::test]
    async fn all_clean_branches_merge() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        commit_on_branch(tmp.path(), "xroads/slot-1", "one.txt", "one\n");
        commit_on_branch(tmp.path(), "xroads/slot-2", "two.txt", "two\n");

        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let plan = plan_merges(
            &repo,
            "main",
            &[candidate(1, "xroads/slot-1"), candidate(2, "xroads/slot-2")],
        )
        .await
        .unwrap();
        let result = execute_merges(&repo, &plan).await.unwrap();

        assert!(result.success);
        assert!(!result.rolled_back);
        assert_eq!(result.merged_branches.len(), 2);
        assert!(result.conflicts.is_empty());
        // Both branches' files land on main.
        assert!(tmp.path().join("one.txt").exists());
        assert!(tmp.path().join("two.txt").exists());
    }

    #[tokio::test]
    async fn first_conflict_stops_and_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        // Both slots rewrite the same file with different content. Slot 1
        // merges; slot 2 then conflicts against it.
        commit_on_branch(tmp.path(), "xroads/slot-1", "shared.txt", "slot 1 version\n");
        commit_on_branch(tmp.path(), "xroads/slot-2", "shared.txt", "slot 2 version\n");
        // A third branch that would merge cleanly is never attempted.
        commit_on_branch(tmp.path(), "xroads/slot-3", "three.txt", "three\n");

        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let plan = plan_merges(
            &repo,
            "main",
            &[
                candidate(1, "xroads/slot-1"),
                candidate(2, "xroads/slot-2"),
                candidate(3, "xroads/slot-3"),
            ],
        )
        .await
        .unwrap();
        let result = execute_merges(&repo, &plan).await.unwrap();

        assert!(!result.success);
        assert!(result.rolled_back);
        assert_eq!(
            result.merged_branches,
            vec![BranchName::new("xroads/slot-1").unwrap()]
        );
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(
            result.conflicts[0].branch,
            BranchName::new("xroads/slot-2").unwrap()
        );
        assert_eq!(
            result.conflicts[0].files,
            vec![std::path::PathBuf::from("shared.txt")]
        );
        // Slot 3 was never attempted.
        assert!(!tmp.path().join("three.txt").exists());
        // The abort left no mid-merge state.
        assert!(repo
            .list_conflicted_files(tmp.path())
            .await
            .unwrap()
            .is_empty());
        // Slot 1's content survived the rollback of slot 2.
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("shared.txt")).unwrap(),
            "slot 1 version\n"
        );
    }

    #[tokio::test]
    async fn whitespace_conflict_is_auto_resolved_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        // Both slots rewrite shared.txt to the same content modulo
        // whitespace: a conflict for git, trivial for the resolver.
        commit_on_branch(tmp.path(), "xroads/slot-1", "shared.txt", "value = 1\n");
        commit_on_branch(tmp.path(), "xroads/slot-2", "shared.txt", "value  =  1\n");

        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let plan = plan_merges(
            &repo,
            "main",
            &[candidate(1, "xroads/slot-1"), candidate(2, "xroads/slot-2")],
        )
        .await
        .unwrap();
        let result = execute_merges_resolving(&repo, &plan).await.unwrap();

        assert!(result.success, "expected auto-resolution, got {result:?}");
        assert_eq!(result.merged_branches.len(), 2);
        // Theirs (slot 2's spacing) won the trivial resolution.
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("shared.txt")).unwrap(),
            "value  =  1\n"
        );
        assert!(repo
            .list_conflicted_files(tmp.path())
            .await
            .unwrap()
            .is_empty());
    }
}
