//! Version-control shim.
//!
//! A capability surface over the `git` binary: worktree management, checkout,
//! merge (with a residue-free dry-run protocol), index operations, and branch
//! operations. All repository access in the orchestrator goes through this
//! module — no other component invokes `git` directly, and commands against
//! one repository are serialised so the index never sees two writers.
//!
//! The shim performs no retries. Callers decide what a failure means.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;

use crate::model::BranchName;

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// GitError
// ---------------------------------------------------------------------------

/// Errors from the version-control shim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitError {
    /// The given path is not inside a git repository.
    NotARepository { path: PathBuf },
    /// A path the operation requires does not exist.
    PathNotFound { path: PathBuf },
    /// A path the operation would create already exists.
    PathExists { path: PathBuf },
    /// A git command exited non-zero.
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    /// A git command exceeded the per-command deadline.
    TimedOut { command: String, secs: u64 },
    /// The git command could not be run at all.
    Io { command: String, detail: String },
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotARepository { path } => {
                write!(f, "'{}' is not a git repository", path.display())
            }
            Self::PathNotFound { path } => {
                write!(f, "path '{}' does not exist", path.display())
            }
            Self::PathExists { path } => {
                write!(f, "path '{}' already exists", path.display())
            }
            Self::CommandFailed {
                command,
                exit_code,
                stderr,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::TimedOut { command, secs } => {
                write!(f, "`{command}` did not finish within {secs}s")
            }
            Self::Io { command, detail } => {
                write!(f, "failed to run `{command}`: {detail}")
            }
        }
    }
}

impl std::error::Error for GitError {}

// ---------------------------------------------------------------------------
// Merge types
// ---------------------------------------------------------------------------

/// How a merge should be performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOptions {
    /// Create the merge commit (`false` → `--no-commit`).
    pub commit: bool,
    /// Allow fast-forward (`false` → `--no-ff`).
    pub fast_forward: bool,
}

/// What a merge attempt produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge applied cleanly.
    Clean,
    /// The merge stopped with these conflicted paths. The working copy is
    /// left mid-merge; the caller must abort or resolve.
    Conflicted(Vec<PathBuf>),
}

impl MergeOutcome {
    /// True when the merge applied cleanly.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

// ---------------------------------------------------------------------------
// GitRepo
// ---------------------------------------------------------------------------

/// Handle to one git repository, rooted at the primary working copy.
///
/// Commands are serialised through an internal lock (spec: the repository
/// index has a single writer). Every command gets a deadline; a timed-out
/// child is killed on drop.
#[derive(Debug)]
pub struct GitRepo {
    root: PathBuf,
    timeout: Duration,
    lock: Mutex<()>,
}

impl GitRepo {
    /// Open a repository at `root`.
    ///
    /// # Errors
    /// [`GitError::PathNotFound`] if `root` does not exist,
    /// [`GitError::NotARepository`] if it is not a git checkout.
    pub async fn open(root: impl Into<PathBuf>, timeout: Duration) -> Result<Self, GitError> {
        let root = root.into();
        if !root.exists() {
            return Err(GitError::PathNotFound { path: root });
        }
        let repo = Self {
            root,
            timeout,
            lock: Mutex::new(()),
        };
        if repo.exec(&repo.root, &["rev-parse", "--git-dir"]).await.is_err() {
            return Err(GitError::NotARepository { path: repo.root });
        }
        Ok(repo)
    }

    /// The repository root (primary working copy).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    // -- command plumbing ---------------------------------------------------

    /// Run `git <args>` in `dir`, returning raw output. Serialised; deadlined.
    async fn raw(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output, GitError> {
        let command = format!("git {}", args.join(" "));
        let _guard = self.lock.lock().await;

        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir).kill_on_drop(true);

        let fut = cmd.output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GitError::Io {
                command,
                detail: e.to_string(),
            }),
            Err(_) => Err(GitError::TimedOut {
                command,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Run a command and return stdout, failing on non-zero exit.
    async fn exec(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.raw(dir, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Run a command where a non-zero exit is an answer, not an error.
    /// Returns `true` on exit 0.
    async fn probe(&self, dir: &Path, args: &[&str]) -> Result<bool, GitError> {
        let output = self.raw(dir, args).await?;
        Ok(output.status.success())
    }

    // -- working copies -----------------------------------------------------

    /// Create a new lightweight working copy at `path`, bound to a **new**
    /// branch forked from the current HEAD.
    ///
    /// # Errors
    /// [`GitError::PathExists`] if `path` already exists.
    pub async fn create_working_copy(
        &self,
        branch: &BranchName,
        path: &Path,
    ) -> Result<(), GitError> {
        if path.exists() {
            return Err(GitError::PathExists {
                path: path.to_path_buf(),
            });
        }
        let path_str = path.to_string_lossy();
        self.exec(
            &self.root,
            &["worktree", "add", "-b", branch.as_str(), &path_str],
        )
        .await?;
        Ok(())
    }

    /// Create a working copy at `path` reusing an **existing** branch.
    pub async fn add_working_copy_from_branch(
        &self,
        branch: &BranchName,
        path: &Path,
    ) -> Result<(), GitError> {
        if path.exists() {
            return Err(GitError::PathExists {
                path: path.to_path_buf(),
            });
        }
        let path_str = path.to_string_lossy();
        self.exec(&self.root, &["worktree", "add", &path_str, branch.as_str()])
            .await?;
        Ok(())
    }

    /// Enumerate working-copy paths, including the primary one.
    pub async fn list_working_copies(&self) -> Result<Vec<PathBuf>, GitError> {
        let out = self
            .exec(&self.root, &["worktree", "list", "--porcelain"])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| line.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }

    /// Force-remove the working copy at `path`.
    pub async fn remove_working_copy(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.exec(&self.root, &["worktree", "remove", "--force", &path_str])
            .await?;
        Ok(())
    }

    /// Clear stale working-copy registrations.
    pub async fn prune_working_copies(&self) -> Result<(), GitError> {
        self.exec(&self.root, &["worktree", "prune"]).await?;
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// The branch checked out in `dir`.
    pub async fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        let out = self
            .exec(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(out.trim().to_owned())
    }

    /// The commit id of HEAD in `dir`.
    pub async fn head_commit(&self, dir: &Path) -> Result<String, GitError> {
        let out = self.exec(dir, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_owned())
    }

    /// Paths currently in the unmerged (conflicted) index state in `dir`.
    pub async fn list_conflicted_files(&self, dir: &Path) -> Result<Vec<PathBuf>, GitError> {
        let out = self
            .exec(dir, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Read one index stage of a conflicted path: 1 = common ancestor,
    /// 2 = ours, 3 = theirs. Returns `None` when the stage is absent
    /// (e.g. no ancestor for an add/add conflict).
    pub async fn show_stage(
        &self,
        dir: &Path,
        stage: u8,
        path: &Path,
    ) -> Result<Option<String>, GitError> {
        let spec = format!(":{stage}:{}", path.to_string_lossy());
        match self.exec(dir, &["show", &spec]).await {
            Ok(content) => Ok(Some(content)),
            Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // -- state changes ------------------------------------------------------

    /// Check out `branch` in `dir`.
    pub async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.exec(dir, &["checkout", branch]).await?;
        Ok(())
    }

    /// Merge `branch` into the branch checked out in `dir`.
    ///
    /// A conflicted merge is reported as [`MergeOutcome::Conflicted`], not an
    /// error — the working copy is left mid-merge for the caller to abort or
    /// resolve. Any other non-zero exit is [`GitError::CommandFailed`].
    pub async fn merge(
        &self,
        dir: &Path,
        branch: &BranchName,
        opts: MergeOptions,
    ) -> Result<MergeOutcome, GitError> {
        let mut args = vec!["merge"];
        if !opts.commit {
            args.push("--no-commit");
        }
        if !opts.fast_forward {
            args.push("--no-ff");
        }
        args.push(branch.as_str());

        match self.exec(dir, &args).await {
            Ok(_) => Ok(MergeOutcome::Clean),
            Err(err @ GitError::CommandFailed { .. }) => {
                let conflicted = self.list_conflicted_files(dir).await?;
                if conflicted.is_empty() {
                    // A failure without unmerged paths is a real error
                    // (e.g. unknown branch), not a conflict.
                    Err(err)
                } else {
                    Ok(MergeOutcome::Conflicted(conflicted))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Predict the outcome of merging `branch` into the branch checked out in
    /// `dir`, leaving no residue: merge without commit or fast-forward, then
    /// hard-reset to the pre-merge commit on success or abort on conflict.
    ///
    /// Returns the predicted conflict paths (empty = clean).
    pub async fn merge_dry_run(
        &self,
        dir: &Path,
        branch: &BranchName,
    ) -> Result<Vec<PathBuf>, GitError> {
        let before = self.head_commit(dir).await?;
        let outcome = self
            .merge(
                dir,
                branch,
                MergeOptions {
                    commit: false,
                    fast_forward: false,
                },
            )
            .await?;
        match outcome {
            MergeOutcome::Clean => {
                self.reset_hard(dir, &before).await?;
                Ok(Vec::new())
            }
            MergeOutcome::Conflicted(files) => {
                self.abort_merge(dir).await?;
                Ok(files)
            }
        }
    }

    /// Abort a mid-merge state in `dir`.
    pub async fn abort_merge(&self, dir: &Path) -> Result<(), GitError> {
        self.exec(dir, &["merge", "--abort"]).await?;
        Ok(())
    }

    /// Hard-reset `dir` to `reference`.
    pub async fn reset_hard(&self, dir: &Path, reference: &str) -> Result<(), GitError> {
        self.exec(dir, &["reset", "--hard", reference]).await?;
        Ok(())
    }

    // -- index --------------------------------------------------------------

    /// Stage one file in `dir`.
    pub async fn stage(&self, dir: &Path, file: &Path) -> Result<(), GitError> {
        let file_str = file.to_string_lossy();
        self.exec(dir, &["add", "--", &file_str]).await?;
        Ok(())
    }

    /// Commit staged changes in `dir`.
    pub async fn commit(
        &self,
        dir: &Path,
        message: &str,
        allow_empty: bool,
    ) -> Result<(), GitError> {
        let mut args = vec!["commit", "-m", message];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.exec(dir, &args).await?;
        Ok(())
    }

    /// Whether `file` is tracked by the index in `dir`.
    pub async fn is_tracked(&self, dir: &Path, file: &Path) -> Result<bool, GitError> {
        let file_str = file.to_string_lossy();
        self.probe(dir, &["ls-files", "--error-unmatch", "--", &file_str])
            .await
    }

    /// Remove `file` from the index in `dir`, keeping the file on disk.
    pub async fn remove_from_index(&self, dir: &Path, file: &Path) -> Result<(), GitError> {
        let file_str = file.to_string_lossy();
        self.exec(dir, &["rm", "--cached", "-q", "--", &file_str])
            .await?;
        Ok(())
    }

    // -- branches -----------------------------------------------------------

    /// Whether a local branch named `name` exists.
    pub async fn branch_exists(&self, name: &BranchName) -> Result<bool, GitError> {
        let refname = format!("refs/heads/{}", name.as_str());
        self.probe(&self.root, &["show-ref", "--verify", "--quiet", &refname])
            .await
    }

    /// Delete a local branch.
    pub async fn delete_branch(&self, name: &BranchName, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.exec(&self.root, &["branch", flag, name.as_str()])
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
