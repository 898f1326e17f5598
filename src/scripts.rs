//! Loop-script resolution.
//!
//! Each agent kind is driven by an executable `<kind>-loop.sh` resolved from
//! a well-known search path: the `CROSSROADS_SCRIPTS_DIR` override, then the
//! repository's `.crossroads/scripts/`, then a `scripts/` directory next to
//! the `crossroads` executable. The script receives two positional integer
//! arguments (`maxIterations`, `sleepSeconds`) and exits 0 once all of the
//! slot's stories are complete.

use std::path::{Path, PathBuf};

use crate::model::AgentKind;

/// Environment variable overriding the script search path.
pub const SCRIPTS_DIR_ENV: &str = "CROSSROADS_SCRIPTS_DIR";

/// The script file name for an agent kind.
#[must_use]
pub fn script_file_name(agent: &AgentKind) -> String {
    format!("{agent}-loop.sh")
}

/// Candidate directories, most specific first.
#[must_use]
pub fn search_path(repo_root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = std::env::var_os(SCRIPTS_DIR_ENV) {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(repo_root.join(".crossroads").join("scripts"));
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            dirs.push(dir.join("scripts"));
        }
    }
    dirs
}

/// Resolve the loop script for `agent`, returning the first existing
/// executable candidate. `None` when no candidate exists — the caller
/// reports this as an executable-not-found launch failure.
#[must_use]
pub fn resolve_loop_script(agent: &AgentKind, repo_root: &Path) -> Option<PathBuf> {
    let file_name = script_file_name(agent);
    search_path(repo_root)
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(s: &str) -> AgentKind {
        AgentKind::new(s).unwrap()
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt as _;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }

    #[test]
    fn script_file_name_uses_kind() {
        assert_eq!(script_file_name(&agent("claude")), "claude-loop.sh");
    }

    #[test]
    fn repo_scripts_dir_is_searched() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crossroads").join("scripts");
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("claude-loop.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        make_executable(&script);

        let found = resolve_loop_script(&agent("claude"), tmp.path());
        assert_eq!(found, Some(script));
    }

    #[test]
    fn missing_script_resolves_to_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(resolve_loop_script(&agent("nonexistent"), tmp.path()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_candidate_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crossroads").join("scripts");
        std::fs::create_dir_all(&dir).unwrap();
        // Written without the execute bit.
        std::fs::write(dir.join("codex-loop.sh"), "#!/bin/sh\nexit 0\n").unwrap();
        assert!(resolve_loop_script(&agent("codex"), tmp.path()).is_none());
    }
}
