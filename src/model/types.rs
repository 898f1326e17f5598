//! Core dispatch types for crossroads.
//!
//! Foundation types used throughout the orchestrator: story identifiers,
//! slot numbers, agent and action kinds, branch names, session identifiers,
//! and the slot assignment record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which kind of identifier failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    StoryId,
    SlotNumber,
    AgentKind,
    ActionKind,
    BranchName,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoryId => write!(f, "story id"),
            Self::SlotNumber => write!(f, "slot number"),
            Self::AgentKind => write!(f, "agent kind"),
            Self::ActionKind => write!(f, "action kind"),
            Self::BranchName => write!(f, "branch name"),
        }
    }
}

/// An identifier failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Which identifier kind was being validated.
    pub kind: ErrorKind,
    /// The offending input.
    pub value: String,
    /// Why the input is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}': {}",
            self.kind, self.value, self.reason
        )
    }
}

impl std::error::Error for ValidationError {}

/// Shared identifier validation: lowercase-insensitive ASCII alphanumerics
/// plus `-` and `_`, non-empty, bounded length, no leading hyphen (would be
/// read as a flag by subprocess tools).
fn validate_ident(kind: ErrorKind, s: &str, max_len: usize) -> Result<(), ValidationError> {
    let err = |reason: String| ValidationError {
        kind,
        value: s.to_owned(),
        reason,
    };

    if s.is_empty() {
        return Err(err("must not be empty".to_owned()));
    }
    if s.len() > max_len {
        return Err(err(format!("must be at most {max_len} characters")));
    }
    if s.starts_with('-') {
        return Err(err(
            "must not start with '-' (would be interpreted as a flag)".to_owned(),
        ));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(err(
            "must contain only letters, digits, hyphens, and underscores".to_owned(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StoryId
// ---------------------------------------------------------------------------

/// A stable short story identifier (e.g. `US-001`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoryId(String);

impl StoryId {
    /// Create a new `StoryId` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is empty, overlong, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        validate_ident(ErrorKind::StoryId, s, 64)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased copy, used when deriving directory names.
    #[must_use]
    pub fn to_lowercase(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoryId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StoryId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_ident(ErrorKind::StoryId, &s, 64)?;
        Ok(Self(s))
    }
}

impl From<StoryId> for String {
    fn from(id: StoryId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// SlotNumber
// ---------------------------------------------------------------------------

/// A worker slot number — a small positive integer (typically 1–6).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotNumber(u8);

/// Upper bound on slot numbers. Far above any realistic pool size.
const MAX_SLOT: u8 = 32;

impl SlotNumber {
    /// The first slot. Single-agent modes run in this lane by convention.
    pub const FIRST: Self = Self(1);

    /// Create a new `SlotNumber`.
    ///
    /// # Errors
    /// Returns an error unless `1 <= n <= 32`.
    pub fn new(n: u8) -> Result<Self, ValidationError> {
        if n == 0 || n > MAX_SLOT {
            return Err(ValidationError {
                kind: ErrorKind::SlotNumber,
                value: n.to_string(),
                reason: format!("must be between 1 and {MAX_SLOT}"),
            });
        }
        Ok(Self(n))
    }

    /// Return the numeric value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SlotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for SlotNumber {
    type Error = ValidationError;
    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<SlotNumber> for u8 {
    fn from(s: SlotNumber) -> Self {
        s.0
    }
}

// ---------------------------------------------------------------------------
// AgentKind
// ---------------------------------------------------------------------------

/// The kind of coding-assistant CLI driving a slot (e.g. `claude`, `codex`).
///
/// Open set: the orchestrator only needs the kind to resolve a loop script
/// and to export `CROSSROADS_AGENT_TYPE`; the adapter scripts own the exact
/// CLI invocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentKind(String);

impl AgentKind {
    /// Create a new `AgentKind`, validating and lowercasing.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let lowered = s.to_lowercase();
        validate_ident(ErrorKind::AgentKind, &lowered, 32)?;
        Ok(Self(lowered))
    }

    /// Return the kind string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentKind {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AgentKind {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<AgentKind> for String {
    fn from(a: AgentKind) -> Self {
        a.0
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The role a slot's agent plays (e.g. `implement`, `review`, `test`).
///
/// Like [`AgentKind`] this is an open set — it selects skill prompts for the
/// brief and is exported as `CROSSROADS_ACTION_TYPE`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionKind(String);

impl ActionKind {
    /// Create a new `ActionKind`, validating and lowercasing.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let lowered = s.to_lowercase();
        validate_ident(ErrorKind::ActionKind, &lowered, 32)?;
        Ok(Self(lowered))
    }

    /// Return the kind string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ActionKind {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<ActionKind> for String {
    fn from(a: ActionKind) -> Self {
        a.0
    }
}

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// A validated branch name for a slot's working copy.
///
/// Slot branches always take the form `xroads/<worktree-dir-name>`, so the
/// validation accepts exactly one `/` separator with identifier-safe
/// segments on either side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new `BranchName` from a string, validating format.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let err = |reason: &str| ValidationError {
            kind: ErrorKind::BranchName,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };

        if s.is_empty() {
            return Err(err("must not be empty"));
        }
        if s.len() > 160 {
            return Err(err("must be at most 160 characters"));
        }
        if s.starts_with('-') || s.starts_with('/') || s.ends_with('/') {
            return Err(err("must not begin with '-' or begin/end with '/'"));
        }
        if s.contains("..") || s.contains("//") {
            return Err(err("must not contain '..' or '//'"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/')
        {
            return Err(err(
                "must contain only letters, digits, hyphens, underscores, and '/'",
            ));
        }
        Ok(Self(s.to_owned()))
    }

    /// Return the branch name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<BranchName> for String {
    fn from(b: BranchName) -> Self {
        b.0
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identity of one orchestration run. Fresh UUID per `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (used when resuming from a status document).
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SlotLifecycle
// ---------------------------------------------------------------------------

/// The lifecycle of one worker slot. Owned exclusively by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotLifecycle {
    /// Assignment accepted, working copy not yet provisioned.
    Pending,
    /// Working copy provisioned and validated.
    WorkingCopyReady,
    /// Launch in flight.
    Launching,
    /// Agent process alive.
    Running,
    /// Loop script exited with code 0.
    Completed,
    /// Provisioning, launch, or the loop script failed.
    Failed,
}

impl SlotLifecycle {
    /// True for the states in which the slot holds a live process handle.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Launching | Self::Running)
    }

    /// True once the slot can never launch again this session.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SlotLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::WorkingCopyReady => write!(f, "working-copy-ready"),
            Self::Launching => write!(f, "launching"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// SlotAssignment
// ---------------------------------------------------------------------------

/// One slot's work order: which agent kind, which role, which stories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    /// The slot number.
    pub slot: SlotNumber,
    /// The coding-assistant CLI kind to launch.
    pub agent: AgentKind,
    /// The role the agent plays for these stories.
    pub action: ActionKind,
    /// Story ids owned by this slot, in PRD order.
    pub stories: Vec<StoryId>,
}

impl SlotAssignment {
    /// The deterministic worktree directory name for this assignment:
    /// `slot-<n>-<agent>-<firstTwoStoryIdsLowercased>`.
    ///
    /// Repeated runs with the same assignment map to the same directory so
    /// prior artefacts can be reused.
    #[must_use]
    pub fn worktree_dir_name(&self) -> String {
        let mut name = format!("slot-{}-{}", self.slot, self.agent);
        for id in self.stories.iter().take(2) {
            name.push('-');
            name.push_str(&id.to_lowercase());
        }
        name
    }

    /// The branch name for this assignment: `xroads/<worktree-dir-name>`.
    #[must_use]
    pub fn branch_name(&self) -> BranchName {
        // Directory names are built from validated identifiers, so the
        // composed branch name is always valid.
        BranchName(format!("xroads/{}", self.worktree_dir_name()))
    }

    /// Comma-separated story list for `CROSSROADS_ASSIGNED_STORIES`.
    #[must_use]
    pub fn stories_csv(&self) -> String {
        self.stories
            .iter()
            .map(StoryId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- StoryId --

    #[test]
    fn story_id_accepts_typical_ids() {
        for ok in ["US-001", "us_1", "STORY-42", "a"] {
            assert!(StoryId::new(ok).is_ok(), "{ok} should be valid");
        }
    }

    #[test]
    fn story_id_rejects_bad_input() {
        for bad in ["", "-leading", "has space", "a/b", "a.b"] {
            assert!(StoryId::new(bad).is_err(), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn story_id_serde_round_trip() {
        let id = StoryId::new("US-007").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"US-007\"");
        let back: StoryId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn story_id_serde_rejects_invalid() {
        let result: Result<StoryId, _> = serde_json::from_str("\"bad id\"");
        assert!(result.is_err());
    }

    // -- SlotNumber --

    #[test]
    fn slot_number_bounds() {
        assert!(SlotNumber::new(0).is_err());
        assert!(SlotNumber::new(1).is_ok());
        assert!(SlotNumber::new(32).is_ok());
        assert!(SlotNumber::new(33).is_err());
    }

    // -- AgentKind / ActionKind --

    #[test]
    fn agent_kind_lowercases() {
        let kind = AgentKind::new("Claude").unwrap();
        assert_eq!(kind.as_str(), "claude");
    }

    #[test]
    fn action_kind_rejects_path_chars() {
        assert!(ActionKind::new("review/../etc").is_err());
    }

    // -- BranchName --

    #[test]
    fn branch_name_accepts_slot_branches() {
        let b = BranchName::new("xroads/slot-1-claude-us-001-us-002").unwrap();
        assert_eq!(b.as_str(), "xroads/slot-1-claude-us-001-us-002");
    }

    #[test]
    fn branch_name_rejects_traversal() {
        assert!(BranchName::new("xroads/../main").is_err());
        assert!(BranchName::new("/leading").is_err());
        assert!(BranchName::new("trailing/").is_err());
        assert!(BranchName::new("a//b").is_err());
    }

    // -- SlotLifecycle --

    #[test]
    fn lifecycle_liveness() {
        assert!(SlotLifecycle::Launching.is_live());
        assert!(SlotLifecycle::Running.is_live());
        assert!(!SlotLifecycle::Pending.is_live());
        assert!(!SlotLifecycle::Completed.is_live());
        assert!(SlotLifecycle::Failed.is_terminal());
    }

    #[test]
    fn lifecycle_display_matches_wire_form() {
        assert_eq!(
            format!("{}", SlotLifecycle::WorkingCopyReady),
            "working-copy-ready"
        );
    }

    // -- SlotAssignment --

    fn sample_assignment() -> SlotAssignment {
        SlotAssignment {
            slot: SlotNumber::new(1).unwrap(),
            agent: AgentKind::new("claude").unwrap(),
            action: ActionKind::new("implement").unwrap(),
            stories: vec![
                StoryId::new("US-001").unwrap(),
                StoryId::new("US-002").unwrap(),
                StoryId::new("US-003").unwrap(),
            ],
        }
    }

    #[test]
    fn worktree_dir_name_uses_first_two_stories() {
        let a = sample_assignment();
        assert_eq!(a.worktree_dir_name(), "slot-1-claude-us-001-us-002");
    }

    #[test]
    fn branch_name_prefixes_xroads() {
        let a = sample_assignment();
        assert_eq!(a.branch_name().as_str(), "xroads/slot-1-claude-us-001-us-002");
    }

    #[test]
    fn worktree_dir_name_with_single_story() {
        let mut a = sample_assignment();
        a.stories.truncate(1);
        assert_eq!(a.worktree_dir_name(), "slot-1-claude-us-001");
    }

    #[test]
    fn stories_csv_joins_in_order() {
        let a = sample_assignment();
        assert_eq!(a.stories_csv(), "US-001,US-002,US-003");
    }
}
