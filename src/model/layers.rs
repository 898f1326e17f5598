//! Topological layering of the story graph.
//!
//! A layer is the set of stories with identical topological depth: depth 0
//! has no prerequisites, depth *n* is `max(depth of prerequisites) + 1`.
//! Layers are the scheduler's launch unit — every story in layer *L* has all
//! of its prerequisites in layers strictly before *L*.
//!
//! Cyclic graphs are rejected outright with [`LayerError::CyclicPrerequisites`];
//! stories are never silently dropped or demoted to a fallback layer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::story::Prd;
use super::types::StoryId;

// ---------------------------------------------------------------------------
// LayerError
// ---------------------------------------------------------------------------

/// Layer computation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerError {
    /// The prerequisite graph contains at least one cycle. `remaining` holds
    /// every story that could not be placed (the cycle members plus anything
    /// downstream of them), in PRD authoring order.
    CyclicPrerequisites { remaining: Vec<StoryId> },
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicPrerequisites { remaining } => {
                write!(
                    f,
                    "cyclic prerequisites: {} stories cannot be scheduled (",
                    remaining.len()
                )?;
                for (i, id) in remaining.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, "); break the cycle in the PRD and retry")
            }
        }
    }
}

impl std::error::Error for LayerError {}

// ---------------------------------------------------------------------------
// Layer computation
// ---------------------------------------------------------------------------

/// Compute topological layers over a PRD's stories.
///
/// Iteratively places every story whose prerequisites are all already placed.
/// Within a layer, stories keep PRD authoring order. The returned layers
/// partition the story set.
///
/// # Errors
/// [`LayerError::CyclicPrerequisites`] if an iteration places nothing while
/// stories remain.
pub fn compute_layers(prd: &Prd) -> Result<Vec<Vec<StoryId>>, LayerError> {
    let deps: BTreeMap<StoryId, Vec<StoryId>> = prd
        .stories
        .iter()
        .map(|s| (s.id.clone(), s.depends_on.clone()))
        .collect();

    let order: Vec<StoryId> = prd.stories.iter().map(|s| s.id.clone()).collect();

    let mut placed: BTreeSet<StoryId> = BTreeSet::new();
    let mut layers: Vec<Vec<StoryId>> = Vec::new();

    while placed.len() < order.len() {
        let layer: Vec<StoryId> = order
            .iter()
            .filter(|id| !placed.contains(*id))
            .filter(|id| {
                deps.get(*id)
                    .is_some_and(|d| d.iter().all(|p| placed.contains(p)))
            })
            .cloned()
            .collect();

        if layer.is_empty() {
            let remaining: Vec<StoryId> = order
                .iter()
                .filter(|id| !placed.contains(*id))
                .cloned()
                .collect();
            return Err(LayerError::CyclicPrerequisites { remaining });
        }

        placed.extend(layer.iter().cloned());
        layers.push(layer);
    }

    Ok(layers)
}

/// The first layer index containing a story for which `is_done` is false,
/// or `layers.len()` when everything is done. Used to resume a session from
/// the first incomplete layer.
pub fn first_incomplete_layer<F>(layers: &[Vec<StoryId>], mut is_done: F) -> usize
where
    F: FnMut(&StoryId) -> bool,
{
    for (i, layer) in layers.iter().enumerate() {
        if layer.iter().any(|id| !is_done(id)) {
            return i;
        }
    }
    layers.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
