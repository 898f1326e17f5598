//! The shared status document.
//!
//! The on-disk coordination surface between the orchestrator and the agent
//! processes: `<repo>/.crossroads/status.json`. Serialised as pretty-printed
//! JSON with LF line endings, stable key order (stories live in a `BTreeMap`)
//! and ISO-8601 UTC timestamps, so agent-side rewrites produce small diffs.
//!
//! This module is the pure data model; all I/O and the two-writer rename
//! protocol live in [`super::store`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Prd, SessionId, SlotNumber, StoryId, StoryStatus};

// ---------------------------------------------------------------------------
// StoryTracking
// ---------------------------------------------------------------------------

/// Per-story tracking record inside the status document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryTracking {
    /// The story id (repeated inside the record for agent convenience).
    pub id: StoryId,
    /// Current lifecycle state.
    pub status: StoryStatus,
    /// The slot working on this story, once assigned.
    pub assigned_to_slot: Option<u8>,
    /// Prerequisite story ids.
    pub depends_on: Vec<StoryId>,
    /// First moment the story entered `in-progress`.
    pub started_at: Option<DateTime<Utc>>,
    /// Moment the story entered `complete`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error reported for the story, if any.
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// StatusDocument
// ---------------------------------------------------------------------------

/// Root of the status document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    /// The orchestration session this document belongs to.
    pub session_id: SessionId,
    /// Feature name from the PRD.
    pub prd_name: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the document was last rewritten (by either writer).
    pub updated_at: DateTime<Utc>,
    /// Index of the layer currently being worked.
    pub current_layer: usize,
    /// Story ids grouped by topological depth.
    pub layers: Vec<Vec<StoryId>>,
    /// Tracking record per story, keyed by id (sorted on disk).
    pub stories: BTreeMap<StoryId, StoryTracking>,
}

impl StatusDocument {
    /// Build the initial document for a PRD: stories with no prerequisites
    /// start `ready`, everything else starts `blocked`.
    #[must_use]
    pub fn initial(
        session_id: SessionId,
        prd: &Prd,
        layers: Vec<Vec<StoryId>>,
        now: DateTime<Utc>,
    ) -> Self {
        let stories = prd
            .stories
            .iter()
            .map(|story| {
                let status = if story.is_root() {
                    StoryStatus::Ready
                } else {
                    StoryStatus::Blocked
                };
                (
                    story.id.clone(),
                    StoryTracking {
                        id: story.id.clone(),
                        status,
                        assigned_to_slot: None,
                        depends_on: story.depends_on.clone(),
                        started_at: None,
                        completed_at: None,
                        last_error: None,
                    },
                )
            })
            .collect();

        Self {
            session_id,
            prd_name: prd.name.clone(),
            started_at: now,
            updated_at: now,
            current_layer: 0,
            layers,
            stories,
        }
    }

    /// Serialise to the canonical on-disk form: pretty JSON, trailing LF.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    // -- queries ------------------------------------------------------------

    /// Whether every prerequisite of `id` is complete. Unknown ids are not
    /// satisfied.
    #[must_use]
    pub fn prerequisites_satisfied(&self, id: &StoryId) -> bool {
        self.stories.get(id).is_some_and(|tracking| {
            tracking.depends_on.iter().all(|dep| {
                self.stories
                    .get(dep)
                    .is_some_and(|d| d.status == StoryStatus::Complete)
            })
        })
    }

    /// Ids currently in `ready`, sorted.
    #[must_use]
    pub fn ready_stories(&self) -> Vec<StoryId> {
        self.with_status(StoryStatus::Ready)
    }

    /// Ids currently in `blocked`, sorted.
    #[must_use]
    pub fn blocked_stories(&self) -> Vec<StoryId> {
        self.with_status(StoryStatus::Blocked)
    }

    /// Ids currently in `complete`, sorted.
    #[must_use]
    pub fn complete_stories(&self) -> Vec<StoryId> {
        self.with_status(StoryStatus::Complete)
    }

    fn with_status(&self, status: StoryStatus) -> Vec<StoryId> {
        self.stories
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Completed fraction, 0.0 to 1.0.
    #[must_use]
    pub fn progress_ratio(&self) -> f64 {
        if self.stories.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self
            .stories
            .values()
            .filter(|t| t.status == StoryStatus::Complete)
            .count() as f64
            / self.stories.len() as f64;
        ratio
    }

    /// Whether every story is complete.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.stories
            .values()
            .all(|t| t.status == StoryStatus::Complete)
    }

    /// Whether every story in `layer` is complete.
    #[must_use]
    pub fn layer_complete(&self, layer: usize) -> bool {
        self.layers.get(layer).is_some_and(|ids| {
            ids.iter().all(|id| {
                self.stories
                    .get(id)
                    .is_some_and(|t| t.status == StoryStatus::Complete)
            })
        })
    }

    // -- mutations (pure; the store wraps them in read-modify-write) --------

    /// Flip every `blocked` story whose prerequisites are all complete to
    /// `ready`. Idempotent. Returns the ids that changed, sorted.
    pub fn unblock(&mut self) -> Vec<StoryId> {
        let candidates: Vec<StoryId> = self
            .stories
            .values()
            .filter(|t| t.status == StoryStatus::Blocked)
            .filter(|t| {
                t.depends_on.iter().all(|dep| {
                    self.stories
                        .get(dep)
                        .is_some_and(|d| d.status == StoryStatus::Complete)
                })
            })
            .map(|t| t.id.clone())
            .collect();

        for id in &candidates {
            if let Some(tracking) = self.stories.get_mut(id) {
                tracking.status = StoryStatus::Ready;
            }
        }
        candidates
    }

    /// Transition one story, stamping `started_at` on the first entry into
    /// `in-progress` and `completed_at` on `complete`. Unknown ids are a
    /// silent no-op (the store layer reports them).
    pub fn transition(
        &mut self,
        id: &StoryId,
        status: StoryStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(tracking) = self.stories.get_mut(id) else {
            return false;
        };
        tracking.status = status;
        match status {
            StoryStatus::InProgress => {
                if tracking.started_at.is_none() {
                    tracking.started_at = Some(now);
                }
            }
            StoryStatus::Complete => {
                tracking.completed_at = Some(now);
            }
            _ => {}
        }
        if let Some(message) = error {
            tracking.last_error = Some(message);
        }
        true
    }

    /// Record the slot assignment for a story.
    pub fn assign_slot(&mut self, id: &StoryId, slot: SlotNumber) -> bool {
        let Some(tracking) = self.stories.get_mut(id) else {
            return false;
        };
        tracking.assigned_to_slot = Some(slot.get());
        true
    }

    /// Advance `updated_at`, never letting it regress.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
