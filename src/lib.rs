//! crossroads library crate — the multi-agent dispatch core.
//!
//! The primary interface is the `crossroads` CLI binary; embedders use
//! [`orchestrator::Orchestrator`] directly. Modules are layered leaves-first:
//! `model` (stories, PRDs, layers) → `git` / `pty` / `status` (the three
//! capability surfaces) → `provision` / `merge` → `scheduler` →
//! `orchestrator` (the facade).

pub mod brief;
pub mod config;
pub mod error;
pub mod events;
pub mod git;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod provision;
pub mod pty;
pub mod scheduler;
pub mod scripts;
pub mod status;
pub mod telemetry;
