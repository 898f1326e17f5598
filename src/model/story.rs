//! User stories and the product requirements document.
//!
//! A [`Prd`] is the input artefact for a dispatch run: a named feature with
//! an ordered, non-empty list of [`Story`] items whose `depends_on` edges
//! form a DAG over story ids. The PRD is validated once at load and treated
//! as immutable for the rest of the session.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::StoryId;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Business priority of a story.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

// ---------------------------------------------------------------------------
// StoryStatus
// ---------------------------------------------------------------------------

/// Persisted lifecycle state of a story.
///
/// Wire form (status document and `prd.json`) is kebab-case:
/// `pending | blocked | ready | in-progress | complete | failed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    /// Known but not yet scheduled.
    #[default]
    Pending,
    /// At least one prerequisite is not complete.
    Blocked,
    /// All prerequisites complete; an agent may pick this up.
    Ready,
    /// An agent is working on it.
    InProgress,
    /// Done.
    Complete,
    /// The agent gave up on it.
    Failed,
}

impl StoryStatus {
    /// True once the story will never be worked on again this session.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Blocked => write!(f, "blocked"),
            Self::Ready => write!(f, "ready"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// Atomic unit of work: a stable id, prerequisites, and a lifecycle state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Stable short identifier (e.g. `US-001`).
    pub id: StoryId,
    /// One-line title.
    pub title: String,
    /// Longer description of the work.
    #[serde(default)]
    pub description: String,
    /// Business priority.
    #[serde(default = "default_priority")]
    pub priority: Priority,
    /// Complexity estimate, 1 (trivial) to 5 (hard).
    #[serde(default = "default_complexity")]
    pub complexity: u8,
    /// Acceptance criteria the agent must satisfy.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Ids of stories that must be complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<StoryId>,
    /// Persisted lifecycle state.
    #[serde(default)]
    pub status: StoryStatus,
}

const fn default_priority() -> Priority {
    Priority::Medium
}

const fn default_complexity() -> u8 {
    3
}

impl Story {
    /// True when the story has no prerequisites.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PrdError
// ---------------------------------------------------------------------------

/// A PRD failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrdError {
    /// The story list is empty.
    NoStories,
    /// Two stories share an id.
    DuplicateStoryId { id: StoryId },
    /// A prerequisite points at a story that does not exist.
    UnknownPrerequisite { story: StoryId, prerequisite: StoryId },
    /// A story depends on itself.
    SelfPrerequisite { story: StoryId },
    /// A complexity value is outside 1–5.
    InvalidComplexity { story: StoryId, complexity: u8 },
}

impl fmt::Display for PrdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStories => {
                write!(f, "PRD has no stories; at least one is required")
            }
            Self::DuplicateStoryId { id } => {
                write!(f, "duplicate story id '{id}'; story ids must be unique")
            }
            Self::UnknownPrerequisite {
                story,
                prerequisite,
            } => {
                write!(
                    f,
                    "story '{story}' depends on '{prerequisite}', which is not in the PRD"
                )
            }
            Self::SelfPrerequisite { story } => {
                write!(f, "story '{story}' depends on itself")
            }
            Self::InvalidComplexity { story, complexity } => {
                write!(
                    f,
                    "story '{story}' has complexity {complexity}; expected 1 to 5"
                )
            }
        }
    }
}

impl std::error::Error for PrdError {}

// ---------------------------------------------------------------------------
// Prd
// ---------------------------------------------------------------------------

/// A product requirements document: a named feature plus its stories.
///
/// Immutable once dispatch starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prd {
    /// Feature name; also the `prdName` recorded in the status document.
    pub name: String,
    /// Feature description.
    #[serde(default)]
    pub description: String,
    /// Who wrote the PRD.
    #[serde(default)]
    pub author: String,
    /// Authoring template tag.
    #[serde(default)]
    pub template: String,
    /// Stories in authoring order.
    pub stories: Vec<Story>,
}

impl Prd {
    /// Validate referential integrity: non-empty, unique ids, prerequisites
    /// resolve, complexity in range. Cycle detection happens at layering.
    pub fn validate(&self) -> Result<(), PrdError> {
        if self.stories.is_empty() {
            return Err(PrdError::NoStories);
        }

        let mut seen = BTreeSet::new();
        for story in &self.stories {
            if !seen.insert(story.id.clone()) {
                return Err(PrdError::DuplicateStoryId {
                    id: story.id.clone(),
                });
            }
            if !(1..=5).contains(&story.complexity) {
                return Err(PrdError::InvalidComplexity {
                    story: story.id.clone(),
                    complexity: story.complexity,
                });
            }
        }

        for story in &self.stories {
            for dep in &story.depends_on {
                if *dep == story.id {
                    return Err(PrdError::SelfPrerequisite {
                        story: story.id.clone(),
                    });
                }
                if !seen.contains(dep) {
                    return Err(PrdError::UnknownPrerequisite {
                        story: story.id.clone(),
                        prerequisite: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Look up a story by id.
    #[must_use]
    pub fn story(&self, id: &StoryId) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == *id)
    }

    /// All story ids, in authoring order.
    #[must_use]
    pub fn story_ids(&self) -> Vec<StoryId> {
        self.stories.iter().map(|s| s.id.clone()).collect()
    }

    /// A copy of this PRD filtered to `keep`, preserving authoring order and
    /// every story's original dependency edges (including edges that point
    /// outside `keep` — agents need to see cross-slot prerequisites).
    #[must_use]
    pub fn filtered(&self, keep: &[StoryId]) -> Self {
        let keep: BTreeSet<&StoryId> = keep.iter().collect();
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            template: self.template.clone(),
            stories: self
                .stories
                .iter()
                .filter(|s| keep.contains(&s.id))
                .cloned()
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
