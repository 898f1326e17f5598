//! CLI input parsing: PRD files and slot-assignment specs.
//!
//! A PRD is a JSON file matching the library's `Prd` shape. A slot spec is
//! the compact form `<slot>:<agent>:<action>:<story,story,...>`, e.g.
//! `1:claude:implement:US-001,US-002`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crossroads::model::{
    ActionKind, AgentKind, Prd, SlotAssignment, SlotNumber, StoryId,
};

/// Load and validate a PRD from a JSON file.
pub fn load_prd(path: &Path) -> Result<Prd> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read PRD file '{}'", path.display()))?;
    let prd: Prd = serde_json::from_str(&text)
        .with_context(|| format!("'{}' is not a valid PRD document", path.display()))?;
    prd.validate()
        .with_context(|| format!("PRD '{}' failed validation", prd.name))?;
    Ok(prd)
}

/// Parse one `--slot` spec.
pub fn parse_slot_spec(spec: &str) -> Result<SlotAssignment> {
    let parts: Vec<&str> = spec.splitn(4, ':').collect();
    if parts.len() != 4 {
        bail!(
            "invalid slot spec '{spec}'.\n  \
             Expected: <slot>:<agent>:<action>:<story,story,...>\n  \
             Example:  1:claude:implement:US-001,US-002"
        );
    }

    let slot_num: u8 = parts[0]
        .parse()
        .with_context(|| format!("slot number '{}' is not an integer", parts[0]))?;
    let slot = SlotNumber::new(slot_num)?;
    let agent = AgentKind::new(parts[1])?;
    let action = ActionKind::new(parts[2])?;

    let stories: Vec<StoryId> = parts[3]
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| StoryId::new(s.trim()).map_err(Into::into))
        .collect::<Result<_>>()?;
    if stories.is_empty() {
        bail!("slot spec '{spec}' assigns no stories");
    }

    Ok(SlotAssignment {
        slot,
        agent,
        action,
        stories,
    })
}

/// Parse one `--step` spec for the merge commands: `<slot>:<branch>`.
pub fn parse_step_spec(spec: &str) -> Result<(SlotNumber, crossroads::model::BranchName)> {
    let Some((slot_part, branch_part)) = spec.split_once(':') else {
        bail!(
            "invalid step spec '{spec}'.\n  \
             Expected: <slot>:<branch>\n  \
             Example:  1:xroads/slot-1-claude-us-001-us-002"
        );
    };
    let slot_num: u8 = slot_part
        .parse()
        .with_context(|| format!("slot number '{slot_part}' is not an integer"))?;
    let slot = SlotNumber::new(slot_num)?;
    let branch = crossroads::model::BranchName::new(branch_part)?;
    Ok((slot, branch))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
