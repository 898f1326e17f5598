//! Domain model: stories, PRDs, topological layers, and dispatch identifiers.

pub mod layers;
pub mod story;
pub mod types;

pub use layers::{compute_layers, first_incomplete_layer, LayerError};
pub use story::{Prd, PrdError, Priority, Story, StoryStatus};
pub use types::{
    ActionKind, AgentKind, BranchName, SessionId, SlotAssignment, SlotLifecycle, SlotNumber,
    StoryId, ValidationError,
};
