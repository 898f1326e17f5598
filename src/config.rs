//! Crossroads repository configuration (`.crossroads/config.toml`).
//!
//! Typed configuration for a dispatch run: base branch, scheduler timing,
//! git command deadline, and merge behaviour. Missing fields use defaults;
//! a missing file means all defaults (no error).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file could not be loaded or parsed.
#[derive(Clone, Debug)]
pub struct ConfigError {
    /// Path to the offending file, when known.
    pub path: Option<PathBuf>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "configuration error in '{}': {}",
                path.display(),
                self.message
            ),
            None => write!(f, "configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level crossroads configuration.
///
/// Parsed from `<repo>/.crossroads/config.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CrossroadsConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Scheduler and watcher timing.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Git shim settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Merge coordinator settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

impl CrossroadsConfig {
    /// Load from `<repo>/.crossroads/config.toml`. A missing file yields all
    /// defaults.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let path = repo_root.join(".crossroads").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError {
            path: Some(path.clone()),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError {
            path: Some(path),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The base branch merged into at the end of a run (default: `"main"`).
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Directory (relative to the repo root) holding slot working copies
    /// (default: `".crossroads/worktrees"`).
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from(".crossroads/worktrees")
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

/// Scheduler and watcher timing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Status watcher poll interval, seconds (default: 5).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Milliseconds to wait for a launched agent's first output before the
    /// first input is sent (default: 800).
    #[serde(default = "default_ready_wait_ms")]
    pub ready_wait_ms: u64,

    /// Grace period between SIGTERM and the hard kill, seconds (default: 2).
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// `maxIterations` passed to each loop script (default: 50).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// `sleepSeconds` passed to each loop script (default: 10).
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds: u32,
}

impl DispatchConfig {
    /// Watcher poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Readiness wait as a [`Duration`].
    #[must_use]
    pub const fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    /// Kill grace as a [`Duration`].
    #[must_use]
    pub const fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            ready_wait_ms: default_ready_wait_ms(),
            kill_grace_secs: default_kill_grace_secs(),
            max_iterations: default_max_iterations(),
            sleep_seconds: default_sleep_seconds(),
        }
    }
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_ready_wait_ms() -> u64 {
    800
}

const fn default_kill_grace_secs() -> u64 {
    2
}

const fn default_max_iterations() -> u32 {
    50
}

const fn default_sleep_seconds() -> u32 {
    10
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

/// Git shim settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    /// Per-command deadline, seconds (default: 60).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl GitConfig {
    /// The deadline as a [`Duration`].
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

const fn default_command_timeout_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge coordinator settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Attempt automated three-way resolution of trivial conflicts instead
    /// of stopping at the first one (default: false — attempt, stop, report).
    #[serde(default)]
    pub auto_resolve: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_resolve: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CrossroadsConfig::load(tmp.path()).unwrap();
        assert_eq!(config, CrossroadsConfig::default());
        assert_eq!(config.repo.branch, "main");
        assert_eq!(config.dispatch.poll_interval_secs, 5);
        assert_eq!(config.git.command_timeout_secs, 60);
        assert!(!config.merge.auto_resolve);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crossroads");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[repo]\nbranch = \"trunk\"\n\n[dispatch]\npoll_interval_secs = 2\n",
        )
        .unwrap();

        let config = CrossroadsConfig::load(tmp.path()).unwrap();
        assert_eq!(config.repo.branch, "trunk");
        assert_eq!(config.dispatch.poll_interval_secs, 2);
        // Untouched sections keep defaults.
        assert_eq!(config.dispatch.ready_wait_ms, 800);
        assert_eq!(config.git.command_timeout_secs, 60);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".crossroads");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), "[repo]\nbranchh = \"oops\"\n").unwrap();

        let err = CrossroadsConfig::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn durations_convert() {
        let config = CrossroadsConfig::default();
        assert_eq!(config.dispatch.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.dispatch.ready_wait(), Duration::from_millis(800));
        assert_eq!(config.dispatch.kill_grace(), Duration::from_secs(2));
        assert_eq!(config.git.command_timeout(), Duration::from_secs(60));
    }
}
