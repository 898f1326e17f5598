//! Slot provisioning.
//!
//! Turns a [`SlotAssignment`] into a ready-to-launch working copy. Paths and
//! branch names are deterministic functions of the assignment, so repeated
//! runs reuse prior artefacts where they are still valid and repair what a
//! failed run left behind: a stale directory is removed, a stale branch is
//! force-deleted, stale worktree registrations are pruned.
//!
//! Working-copy creation failures are fatal for the slot. Writing the brief
//! files and maintaining the ignore list degrade gracefully — logged, never
//! fatal — because an agent can limp along without them.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::brief::{SCRATCH_DIRS, SCRATCH_FILES};
use crate::git::{GitError, GitRepo};
use crate::model::{BranchName, SlotAssignment};

// ---------------------------------------------------------------------------
// ProvisionError
// ---------------------------------------------------------------------------

/// Errors from slot provisioning. Fatal for the affected slot only; the
/// session continues with the remaining slots.
#[derive(Clone, Debug)]
pub enum ProvisionError {
    /// Creating the working copy failed.
    WorkingCopyCreateFailed {
        branch: BranchName,
        path: PathBuf,
        source: GitError,
    },
    /// The provisioned directory is not a genuine checkout.
    WorkingCopyValidationFailed { path: PathBuf },
    /// A filesystem operation around the working copy failed.
    Io { path: PathBuf, detail: String },
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkingCopyCreateFailed {
                branch,
                path,
                source,
            } => {
                write!(
                    f,
                    "failed to create working copy for branch '{branch}' at '{}': {source}",
                    path.display()
                )
            }
            Self::WorkingCopyValidationFailed { path } => {
                write!(
                    f,
                    "'{}' exists but is not a git checkout; remove it and retry",
                    path.display()
                )
            }
            Self::Io { path, detail } => {
                write!(f, "I/O error at '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkingCopyCreateFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProvisionedSlot
// ---------------------------------------------------------------------------

/// A working copy ready for launch.
#[derive(Debug)]
pub struct ProvisionedSlot {
    pub path: PathBuf,
    pub branch: BranchName,
    /// True when an existing valid working copy was reused.
    pub reused: bool,
}

/// The orchestrator-authored files for a slot.
pub struct SlotFiles {
    /// Rendered `AGENT.md` contents.
    pub brief: String,
    /// Rendered `prd.json` contents (filtered to the slot's stories).
    pub prd_json: String,
}

// ---------------------------------------------------------------------------
// SlotProvisioner
// ---------------------------------------------------------------------------

/// Provisions working copies under one worktrees root.
pub struct SlotProvisioner<'a> {
    repo: &'a GitRepo,
    worktrees_root: PathBuf,
}

impl<'a> SlotProvisioner<'a> {
    /// Create a provisioner rooting worktrees at `worktrees_root` (absolute).
    #[must_use]
    pub fn new(repo: &'a GitRepo, worktrees_root: PathBuf) -> Self {
        Self {
            repo,
            worktrees_root,
        }
    }

    /// The deterministic working-copy path for an assignment.
    #[must_use]
    pub fn slot_path(&self, assignment: &SlotAssignment) -> PathBuf {
        self.worktrees_root.join(assignment.worktree_dir_name())
    }

    /// Whether `path` looks like a genuine checkout (the repository tool's
    /// presence marker — for a worktree, a `.git` file — exists inside).
    #[must_use]
    pub fn validate(path: &Path) -> bool {
        path.is_dir() && path.join(".git").exists()
    }

    /// Realise the working copy for `assignment` and write its slot files.
    pub async fn provision(
        &self,
        assignment: &SlotAssignment,
        files: &SlotFiles,
    ) -> Result<ProvisionedSlot, ProvisionError> {
        let path = self.slot_path(assignment);
        let branch = assignment.branch_name();

        let reused = if Self::validate(&path) {
            info!(slot = %assignment.slot, path = %path.display(), "reusing working copy");
            true
        } else {
            self.create_fresh(&path, &branch).await?;
            false
        };

        if !Self::validate(&path) {
            return Err(ProvisionError::WorkingCopyValidationFailed { path });
        }

        // Steps below degrade gracefully: the working copy is usable even if
        // a brief write or the ignore bookkeeping fails.
        self.write_slot_files(&path, files);
        self.ensure_ignored(&path).await;

        Ok(ProvisionedSlot {
            path,
            branch,
            reused,
        })
    }

    async fn create_fresh(
        &self,
        path: &Path,
        branch: &BranchName,
    ) -> Result<(), ProvisionError> {
        // A directory without the presence marker is leftover junk.
        if path.exists() {
            debug!(path = %path.display(), "removing stale slot directory");
            std::fs::remove_dir_all(path).map_err(|e| ProvisionError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::Io {
                path: parent.to_path_buf(),
                detail: e.to_string(),
            })?;
        }

        let create_err = |source: GitError| ProvisionError::WorkingCopyCreateFailed {
            branch: branch.clone(),
            path: path.to_path_buf(),
            source,
        };

        // A branch left behind by a prior failed run blocks `-b`; delete it
        // and clear any stale worktree registration that pinned it.
        if self.repo.branch_exists(branch).await.map_err(create_err)? {
            info!(branch = %branch, "deleting stale branch from prior run");
            self.repo
                .prune_working_copies()
                .await
                .map_err(create_err)?;
            self.repo
                .delete_branch(branch, true)
                .await
                .map_err(create_err)?;
        }

        self.repo
            .create_working_copy(branch, path)
            .await
            .map_err(create_err)?;
        Ok(())
    }

    /// Write `prd.json`, `AGENT.md`, and `progress.txt` into the working
    /// copy. `progress.txt` is the agent's file — never overwritten once it
    /// exists. Failures are logged and swallowed.
    pub fn write_slot_files(&self, path: &Path, files: &SlotFiles) {
        for (name, contents) in [("AGENT.md", &files.brief), ("prd.json", &files.prd_json)] {
            if let Err(e) = std::fs::write(path.join(name), contents) {
                warn!(file = name, path = %path.display(), "failed to write slot file: {e}");
            }
        }
        let progress = path.join("progress.txt");
        if !progress.exists() {
            if let Err(e) = std::fs::write(&progress, "") {
                warn!(path = %path.display(), "failed to write progress.txt: {e}");
            }
        }
    }

    /// Make sure the working copy's ignore file lists the scratch files and
    /// directories, untrack any that are already in the index, and commit
    /// the ignore update (allow-empty) so it cannot surface in later merges.
    /// Failures are logged and swallowed.
    pub async fn ensure_ignored(&self, path: &Path) {
        let gitignore = path.join(".gitignore");
        let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
        let mut updated = existing.clone();

        for entry in SCRATCH_FILES.iter().chain(SCRATCH_DIRS.iter()) {
            if !existing.lines().any(|line| line.trim() == *entry) {
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(entry);
                updated.push('\n');
            }
        }

        if updated != existing {
            if let Err(e) = std::fs::write(&gitignore, &updated) {
                warn!(path = %path.display(), "failed to update .gitignore: {e}");
                return;
            }
        }

        for name in SCRATCH_FILES {
            let file = Path::new(name);
            match self.repo.is_tracked(path, file).await {
                Ok(true) => {
                    if let Err(e) = self.repo.remove_from_index(path, file).await {
                        warn!(file = name, "failed to untrack scratch file: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(file = name, "tracked check failed: {e}"),
            }
        }

        if let Err(e) = self.repo.stage(path, Path::new(".gitignore")).await {
            warn!(path = %path.display(), "failed to stage .gitignore: {e}");
            return;
        }
        if let Err(e) = self
            .repo
            .commit(path, "chore: ignore agent scratch files", true)
            .await
        {
            warn!(path = %path.display(), "failed to commit ignore update: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::DEFAULT_COMMAND_TIMEOUT;
    use crate::model::{ActionKind, AgentKind, SlotNumber, StoryId};
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
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "-q", "-m", "init"]);
        git(dir, &["branch", "-M", "main"]);
    }

    fn assignment() -> SlotAssignment {
        SlotAssignment {
            slot: SlotNumber::new(1).unwrap(),
            agent: AgentKind::new("claude").unwrap(),
            action: ActionKind::new("implement").unwrap(),
            stories: vec![
                StoryId::new("US-001").unwrap(),
                StoryId::new("US-002").unwrap(),
            ],
        }
    }

    fn files() -> SlotFiles {
        SlotFiles {
            brief: "# brief\n".to_owned(),
            prd_json: "{}\n".to_owned(),
        }
    }

    #[tokio::test]
    async fn provisions_a_fresh_slot() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let provisioner = SlotProvisioner::new(&repo, tmp.path().join("worktrees"));

        let slot = provisioner.provision(&assignment(), &files()).await.unwrap();
        assert!(!slot.reused);
        assert!(slot.path.ends_with("slot-1-claude-us-001-us-002"));
        assert!(SlotProvisioner::validate(&slot.path));
        assert_eq!(
            repo.current_branch(&slot.path).await.unwrap(),
            "xroads/slot-1-claude-us-001-us-002"
        );

        // Slot files written.
        assert_eq!(
            std::fs::read_to_string(slot.path.join("AGENT.md")).unwrap(),
            "# brief\n"
        );
        assert!(slot.path.join("prd.json").exists());
        assert!(slot.path.join("progress.txt").exists());

        // Ignore entries present and scratch files untracked.
        let ignore = std::fs::read_to_string(slot.path.join(".gitignore")).unwrap();
        for entry in SCRATCH_FILES {
            assert!(ignore.contains(entry), "missing {entry} in .gitignore");
        }
        assert!(!repo
            .is_tracked(&slot.path, Path::new("AGENT.md"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reprovisioning_reuses_and_preserves_progress() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let provisioner = SlotProvisioner::new(&repo, tmp.path().join("worktrees"));

        let first = provisioner.provision(&assignment(), &files()).await.unwrap();
        std::fs::write(first.path.join("progress.txt"), "day 1: started\n").unwrap();

        let second = provisioner.provision(&assignment(), &files()).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.path, first.path);
        // The agent's log survives reprovisioning.
        assert_eq!(
            std::fs::read_to_string(second.path.join("progress.txt")).unwrap(),
            "day 1: started\n"
        );
    }

    #[tokio::test]
    async fn repairs_stale_directory_and_branch() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let provisioner = SlotProvisioner::new(&repo, tmp.path().join("worktrees"));
        let a = assignment();

        // Simulate a prior run that died: branch exists, directory is junk
        // without a presence marker.
        git(tmp.path(), &["branch", "xroads/slot-1-claude-us-001-us-002"]);
        let stale = provisioner.slot_path(&a);
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("junk.txt"), "leftover").unwrap();

        let slot = provisioner.provision(&a, &files()).await.unwrap();
        assert!(!slot.reused);
        assert!(SlotProvisioner::validate(&slot.path));
        assert!(!slot.path.join("junk.txt").exists());
    }

    #[tokio::test]
    async fn ensure_ignored_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::open(tmp.path(), DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        let provisioner = SlotProvisioner::new(&repo, tmp.path().join("worktrees"));

        let slot = provisioner.provision(&assignment(), &files()).await.unwrap();
        let before = std::fs::read_to_string(slot.path.join(".gitignore")).unwrap();
        provisioner.ensure_ignored(&slot.path).await;
        let after = std::fs::read_to_string(slot.path.join(".gitignore")).unwrap();
        assert_eq!(before, after);
    }
}
