//! Caller-facing events.
//!
//! The facade streams these over a broadcast channel: phase changes,
//! structured progress, per-slot updates and output, termination notices,
//! the merge outcome, and surfaced errors. Consumers (CLI, desktop shells)
//! subscribe and render; the orchestrator never blocks on a slow consumer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::merge::MergeResult;
use crate::model::{ActionKind, AgentKind, BranchName, SlotLifecycle, SlotNumber, StoryId};

// ---------------------------------------------------------------------------
// SchedulerPhase
// ---------------------------------------------------------------------------

/// The scheduler's phase state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerPhase {
    Idle,
    Provisioning,
    Validating,
    Launching,
    Monitoring,
    Completed,
    Failed,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Validating => write!(f, "validating"),
            Self::Launching => write!(f, "launching"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// SlotInfo / ProgressSnapshot
// ---------------------------------------------------------------------------

/// Snapshot of one slot's state, emitted on every lifecycle change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    pub slot: SlotNumber,
    pub agent: AgentKind,
    pub action: ActionKind,
    pub stories: Vec<StoryId>,
    pub path: Option<PathBuf>,
    pub branch: BranchName,
    pub lifecycle: SlotLifecycle,
}

/// Structured progress counters plus a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub current_layer: usize,
    pub total_layers: usize,
    pub slots_launched: usize,
    pub total_slots: usize,
    pub stories_complete: usize,
    pub total_stories: usize,
    pub message: String,
}

// ---------------------------------------------------------------------------
// OrchestratorEvent
// ---------------------------------------------------------------------------

/// Everything the facade can tell a subscriber.
#[derive(Clone, Debug)]
pub enum OrchestratorEvent {
    /// The scheduler moved to a new phase.
    PhaseChanged(SchedulerPhase),
    /// Progress counters advanced.
    Progress(ProgressSnapshot),
    /// A slot's lifecycle changed.
    SlotUpdated(SlotInfo),
    /// A chunk of agent output, tagged with its slot.
    SlotOutput { slot: SlotNumber, chunk: String },
    /// A slot's loop script terminated. `stories_complete`/`stories_total`
    /// are read from the status document at termination time so a slot that
    /// exits 0 with incomplete stories is visible to the caller.
    SlotTerminated {
        slot: SlotNumber,
        exit_code: i32,
        stories_complete: usize,
        stories_total: usize,
    },
    /// The merge coordinator finished.
    MergeFinished(MergeResult),
    /// Every story is complete and the session is done.
    Completed,
    /// A surfaced failure, with a machine-readable kind tag.
    Error { kind: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
