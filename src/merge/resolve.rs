//! Automated three-way conflict resolution for trivial cases.
//!
//! Strictly opt-in: the default merge path is attempt → stop on first
//! conflict → report. When the caller asks, each conflicted file is
//! classified by inspecting its three index stages (common ancestor, ours,
//! theirs):
//!
//! 1. **Trivial** — ours and theirs differ only in whitespace: keep theirs.
//! 2. **Dependent** — ancestor known and the two sides edited disjoint
//!    regions: combine via `git merge-file -p` (deterministic line merge).
//! 3. Anything else — overlapping edits, add/add without an ancestor,
//!    delete-vs-modify — is refused and left for a human.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::MergeError;
use crate::git::GitRepo;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Why a conflicted file was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefusalReason {
    /// No common ancestor (add/add with different content).
    NoAncestor,
    /// The sides edited overlapping regions.
    Overlapping,
    /// One side deleted the file while the other modified it.
    DeleteConflict,
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAncestor => write!(f, "add/add with different content and no ancestor"),
            Self::Overlapping => write!(f, "overlapping edits"),
            Self::DeleteConflict => write!(f, "deleted on one side, modified on the other"),
        }
    }
}

/// Outcome of classifying one conflicted file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Whitespace-only divergence; `merged` is theirs verbatim.
    Trivial { merged: String },
    /// Disjoint edits combined against the ancestor, order preserved.
    Dependent { merged: String },
    /// Requires human intervention.
    Unresolvable { reason: RefusalReason },
}

/// Classify a conflict from its three regions.
///
/// `base` is the common ancestor content when one exists. Runs
/// `git merge-file` for the dependent case, so the classification is
/// deterministic line-level three-way merging — the same engine the
/// repository tool itself uses.
pub fn classify_conflict(
    base: Option<&str>,
    ours: &str,
    theirs: &str,
) -> Result<Classification, MergeError> {
    if strip_whitespace(ours) == strip_whitespace(theirs) {
        return Ok(Classification::Trivial {
            merged: theirs.to_owned(),
        });
    }

    let Some(base) = base else {
        return Ok(Classification::Unresolvable {
            reason: RefusalReason::NoAncestor,
        });
    };

    match merge_file(base, ours, theirs)? {
        Some(merged) => Ok(Classification::Dependent { merged }),
        None => Ok(Classification::Unresolvable {
            reason: RefusalReason::Overlapping,
        }),
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Run `git merge-file -p ours base theirs`. `Some(merged)` on a clean
/// combine, `None` when the sides overlap (positive exit code = number of
/// conflicts).
fn merge_file(base: &str, ours: &str, theirs: &str) -> Result<Option<String>, MergeError> {
    let tmp = tempfile::tempdir().map_err(|e| MergeError::ResolutionFailed {
        detail: format!("create temp dir: {e}"),
    })?;

    let write = |name: &str, contents: &str| -> Result<PathBuf, MergeError> {
        let path = tmp.path().join(name);
        let mut file =
            std::fs::File::create(&path).map_err(|e| MergeError::ResolutionFailed {
                detail: format!("create {name}: {e}"),
            })?;
        file.write_all(contents.as_bytes())
            .map_err(|e| MergeError::ResolutionFailed {
                detail: format!("write {name}: {e}"),
            })?;
        Ok(path)
    };

    let ours_path = write("ours", ours)?;
    let base_path = write("base", base)?;
    let theirs_path = write("theirs", theirs)?;

    let output = Command::new("git")
        .arg("merge-file")
        .arg("-p")
        .arg(&ours_path)
        .arg(&base_path)
        .arg(&theirs_path)
        .output()
        .map_err(|e| MergeError::ResolutionFailed {
            detail: format!("run git merge-file: {e}"),
        })?;

    // Exit status is the number of conflicts (capped at 127); anything
    // above that is an error, reported by git as a negative status.
    match output.status.code() {
        Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
        Some(code) if (1..=127).contains(&code) => Ok(None),
        _ => Err(MergeError::ResolutionFailed {
            detail: format!(
                "git merge-file failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
    }
}

// ---------------------------------------------------------------------------
// Working-copy resolution
// ---------------------------------------------------------------------------

/// A file resolved automatically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    /// True for the whitespace-trivial case, false for a three-way combine.
    pub trivial: bool,
}

/// A file left for a human.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefusedFile {
    pub path: PathBuf,
    pub reason: RefusalReason,
}

/// What the resolution pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: Vec<ResolvedFile>,
    pub refused: Vec<RefusedFile>,
}

impl ResolveReport {
    /// True when every conflicted file was resolved.
    #[must_use]
    pub fn fully_resolved(&self) -> bool {
        self.refused.is_empty() && !self.resolved.is_empty()
    }
}

/// Attempt automated resolution of every conflicted file in `dir` (which
/// must be mid-merge). Resolved files are rewritten and staged; refused
/// files are left untouched with their conflict markers. The caller decides
/// whether to commit (all resolved) or abort.
pub async fn resolve_working_copy(
    repo: &GitRepo,
    dir: &Path,
) -> Result<ResolveReport, MergeError> {
    let mut report = ResolveReport::default();

    for path in repo.list_conflicted_files(dir).await? {
        let base = repo.show_stage(dir, 1, &path).await?;
        let ours = repo.show_stage(dir, 2, &path).await?;
        let theirs = repo.show_stage(dir, 3, &path).await?;

        let (Some(ours), Some(theirs)) = (ours, theirs) else {
            debug!(path = %path.display(), "delete conflict; refusing");
            report.refused.push(RefusedFile {
                path,
                reason: RefusalReason::DeleteConflict,
            });
            continue;
        };

        match classify_conflict(base.as_deref(), &ours, &theirs)? {
            Classification::Trivial { merged } => {
                apply_resolution(repo, dir, &path, &merged).await?;
                info!(path = %path.display(), "resolved (whitespace-only, kept theirs)");
                report.resolved.push(ResolvedFile {
                    path,
                    trivial: true,
                });
            }
            Classification::Dependent { merged } => {
                apply_resolution(repo, dir, &path, &merged).await?;
                info!(path = %path.display(), "resolved (disjoint three-way combine)");
                report.resolved.push(ResolvedFile {
                    path,
                    trivial: false,
                });
            }
            Classification::Unresolvable { reason } => {
                debug!(path = %path.display(), %reason, "refusing");
                report.refused.push(RefusedFile { path, reason });
            }
        }
    }

    Ok(report)
}

async fn apply_resolution(
    repo: &GitRepo,
    dir: &Path,
    path: &Path,
    merged: &str,
) -> Result<(), MergeError> {
    std::fs::write(dir.join(path), merged).map_err(|e| MergeError::ResolutionFailed {
        detail: format!("write resolved '{}': {e}", path.display()),
    })?;
    repo.stage(dir, path).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_difference_keeps_theirs() {
        let ours = "fn main() {\n    run();\n}\n";
        let theirs = "fn main() {\n\trun();\n}\n";
        match classify_conflict(Some("fn main() {\nrun();\n}\n"), ours, theirs).unwrap() {
            Classification::Trivial { merged } => assert_eq!(merged, theirs),
            other => panic!("expected Trivial, got {other:?}"),
        }
    }

    #[test]
    fn identical_sides_are_trivial() {
        let side = "same\n";
        assert!(matches!(
            classify_conflict(None, side, side).unwrap(),
            Classification::Trivial { .. }
        ));
    }

    #[test]
    fn disjoint_edits_combine_preserving_order() {
        let base = "alpha\nbeta\ngamma\ndelta\nepsilon\n";
        let ours = "alpha CHANGED\nbeta\ngamma\ndelta\nepsilon\n";
        let theirs = "alpha\nbeta\ngamma\ndelta\nepsilon CHANGED\n";
        match classify_conflict(Some(base), ours, theirs).unwrap() {
            Classification::Dependent { merged } => {
                assert_eq!(
                    merged,
                    "alpha CHANGED\nbeta\ngamma\ndelta\nepsilon CHANGED\n"
                );
            }
            other => panic!("expected Dependent, got {other:?}"),
        }
    }

    #[test]
    fn overlapping_edits_are_refused() {
        let base = "line\n";
        let ours = "ours version\n";
        let theirs = "theirs version\n";
        assert_eq!(
            classify_conflict(Some(base), ours, theirs).unwrap(),
            Classification::Unresolvable {
                reason: RefusalReason::Overlapping
            }
        );
    }

    #[test]
    fn add_add_without_ancestor_is_refused() {
        assert_eq!(
            classify_conflict(None, "ours\n", "theirs\n").unwrap(),
            Classification::Unresolvable {
                reason: RefusalReason::NoAncestor
            }
        );
    }

    #[test]
    fn report_fully_resolved_requires_work_and_no_refusals() {
        let empty = ResolveReport::default();
        assert!(!empty.fully_resolved());

        let good = ResolveReport {
            resolved: vec![ResolvedFile {
                path: PathBuf::from("a.rs"),
                trivial: true,
            }],
            refused: vec![],
        };
        assert!(good.fully_resolved());

        let mixed = ResolveReport {
            resolved: good.resolved.clone(),
            refused: vec![RefusedFile {
                path: PathBuf::from("b.rs"),
                reason: RefusalReason::Overlapping,
            }],
        };
        assert!(!mixed.fully_resolved());
    }
}
