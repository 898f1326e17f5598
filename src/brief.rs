//! Agent brief generation.
//!
//! Each slot's working copy gets three orchestrator-written files:
//! `AGENT.md` (the instruction brief), `prd.json` (the PRD filtered to the
//! slot's stories, original dependency edges preserved), and `progress.txt`
//! (an append-only scratch log the agent owns). The brief walks the agent
//! through the status-document protocol and carries the role's skill
//! prompts.

use std::fmt::Write as _;
use std::path::Path;

use crate::model::{ActionKind, Prd, SessionId, SlotAssignment, Story};

/// Scratch files the orchestrator writes into a working copy. These are
/// ignored and untracked so they never surface in merges.
pub const SCRATCH_FILES: [&str; 3] = ["AGENT.md", "prd.json", "progress.txt"];

/// Scratch directories agents may create; ignored alongside the files.
pub const SCRATCH_DIRS: [&str; 2] = [".crossroads-backup/", ".crossroads-logs/"];

// ---------------------------------------------------------------------------
// Skill prompts
// ---------------------------------------------------------------------------

/// The skill names loaded for a role, exported as `CROSSROADS_LOADED_SKILLS`.
#[must_use]
pub fn skills_for_action(action: &ActionKind) -> Vec<&'static str> {
    match action.as_str() {
        "implement" => vec!["story-protocol", "tdd-loop"],
        "review" => vec!["story-protocol", "review-checklist"],
        "test" => vec!["story-protocol", "test-coverage"],
        _ => vec!["story-protocol"],
    }
}

/// The role-specific instruction paragraph embedded in the brief.
fn skill_prompt(action: &ActionKind) -> &'static str {
    match action.as_str() {
        "implement" => {
            "Implement each story to satisfy its acceptance criteria. Write tests \
             first where practical, keep commits small, and commit after every \
             green test run."
        }
        "review" => {
            "Review the changes for each story against its acceptance criteria. \
             Fix what you can directly; record anything you cannot fix in \
             progress.txt with the file and line."
        }
        "test" => {
            "Extend the test suite until every acceptance criterion of each story \
             is exercised by at least one test. Do not change production code \
             except to fix bugs the new tests expose."
        }
        _ => {
            "Work through each assigned story until its acceptance criteria are \
             satisfied, committing as you go."
        }
    }
}

// ---------------------------------------------------------------------------
// Brief
// ---------------------------------------------------------------------------

/// Inputs for one slot's brief.
pub struct BriefContext<'a> {
    pub session_id: SessionId,
    pub prd: &'a Prd,
    pub assignment: &'a SlotAssignment,
    pub status_file: &'a Path,
}

/// Render the `AGENT.md` brief for a slot.
#[must_use]
pub fn build_brief(ctx: &BriefContext<'_>) -> String {
    let mut out = String::new();
    let assignment = ctx.assignment;

    let _ = writeln!(out, "# Agent Brief — slot {}", assignment.slot);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Session `{}` is dispatching the feature **{}** across several agents \
         working in parallel. You are the `{}` agent for slot {}, acting as \
         `{}`. Your working copy is an isolated git worktree on its own \
         branch; commit freely, never push, and never switch branches.",
        ctx.session_id, ctx.prd.name, assignment.agent, assignment.slot, assignment.action
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Your stories");
    let _ = writeln!(out);
    for id in &assignment.stories {
        if let Some(story) = ctx.prd.story(id) {
            write_story_section(&mut out, story);
        }
    }

    let _ = writeln!(out, "## Status protocol");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "The shared status document lives at `{}`. It is the only coordination \
         channel between agents.",
        ctx.status_file.display()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Before starting a story:");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Read the status document.");
    let _ = writeln!(
        out,
        "2. Only start a story whose `status` is `ready`. A `blocked` story \
         has incomplete prerequisites — skip it and check again later."
    );
    let _ = writeln!(
        out,
        "3. Set its `status` to `in-progress`, update `updatedAt`, and rewrite \
         the document (see below)."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "When a story is done (or abandoned):");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "1. Set its `status` to `complete` (or `failed` with `lastError`)."
    );
    let _ = writeln!(out, "2. Update `updatedAt`.");
    let _ = writeln!(out, "3. Rewrite the document.");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Rewriting the document**: always write the full JSON to a sibling \
         temporary file in the same directory, then rename it onto \
         `status.json`. Never edit the live file in place and never hold it \
         open for writing — other processes rewrite it the same way."
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Ground rules");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Never run a command that does not terminate on its own (watch \
         modes, dev servers, `tail -f`, interactive REPLs). The loop that \
         drives you cannot interrupt them."
    );
    let _ = writeln!(
        out,
        "- Stay inside this working copy. Do not touch the main checkout or \
         other agents' directories."
    );
    let _ = writeln!(
        out,
        "- `prd.json` here holds only your stories; prerequisites may point \
         at stories owned by other slots. The status document is the source \
         of truth for their completion."
    );
    let _ = writeln!(
        out,
        "- Append one line to `progress.txt` after each work session: what \
         you did, what is next."
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Role");
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", skill_prompt(&assignment.action));

    out
}

fn write_story_section(out: &mut String, story: &Story) {
    let _ = writeln!(out, "### {} — {}", story.id, story.title);
    let _ = writeln!(out);
    if !story.description.is_empty() {
        let _ = writeln!(out, "{}", story.description);
        let _ = writeln!(out);
    }
    let _ = writeln!(
        out,
        "Priority: {} · Complexity: {}/5",
        story.priority, story.complexity
    );
    if story.depends_on.is_empty() {
        let _ = writeln!(out, "Prerequisites: none");
    } else {
        let deps: Vec<&str> = story.depends_on.iter().map(|d| d.as_str()).collect();
        let _ = writeln!(out, "Prerequisites: {}", deps.join(", "));
    }
    if !story.acceptance_criteria.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Acceptance criteria:");
        for criterion in &story.acceptance_criteria {
            let _ = writeln!(out, "- {criterion}");
        }
    }
    let _ = writeln!(out);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::story::{Priority, StoryStatus};
    use crate::model::{AgentKind, SlotNumber, StoryId};
    use std::path::PathBuf;

    fn sid(s: &str) -> StoryId {
        StoryId::new(s).unwrap()
    }

    fn sample() -> (Prd, SlotAssignment) {
        let prd = Prd {
            name: "checkout-flow".to_owned(),
            description: String::new(),
            author: String::new(),
            template: String::new(),
            stories: vec![
                Story {
                    id: sid("US-001"),
                    title: "Add cart totals".to_owned(),
                    description: "Show a running total in the cart.".to_owned(),
                    priority: Priority::High,
                    complexity: 2,
                    acceptance_criteria: vec!["Total updates on quantity change".to_owned()],
                    depends_on: vec![],
                    status: StoryStatus::Pending,
                },
                Story {
                    id: sid("US-002"),
                    title: "Checkout button".to_owned(),
                    description: String::new(),
                    priority: Priority::Medium,
                    complexity: 1,
                    acceptance_criteria: vec![],
                    depends_on: vec![sid("US-001")],
                    status: StoryStatus::Pending,
                },
            ],
        };
        let assignment = SlotAssignment {
            slot: SlotNumber::new(1).unwrap(),
            agent: AgentKind::new("claude").unwrap(),
            action: ActionKind::new("implement").unwrap(),
            stories: vec![sid("US-001"), sid("US-002")],
        };
        (prd, assignment)
    }

    #[test]
    fn brief_contains_required_sections() {
        let (prd, assignment) = sample();
        let status_file = PathBuf::from("/repo/.crossroads/status.json");
        let brief = build_brief(&BriefContext {
            session_id: SessionId::generate(),
            prd: &prd,
            assignment: &assignment,
            status_file: &status_file,
        });

        assert!(brief.contains("# Agent Brief — slot 1"));
        assert!(brief.contains("US-001 — Add cart totals"));
        assert!(brief.contains("Prerequisites: none"));
        assert!(brief.contains("Prerequisites: US-001"));
        assert!(brief.contains("/repo/.crossroads/status.json"));
        assert!(brief.contains("rename it onto"));
        assert!(brief.contains("does not terminate on its own"));
        assert!(brief.contains("Acceptance criteria:"));
    }

    #[test]
    fn skills_cover_known_roles() {
        assert!(skills_for_action(&ActionKind::new("implement").unwrap())
            .contains(&"tdd-loop"));
        assert!(skills_for_action(&ActionKind::new("review").unwrap())
            .contains(&"review-checklist"));
        // Unknown roles still get the protocol skill.
        assert_eq!(
            skills_for_action(&ActionKind::new("docs").unwrap()),
            vec!["story-protocol"]
        );
    }

    #[test]
    fn brief_mentions_every_assigned_story() {
        let (prd, assignment) = sample();
        let brief = build_brief(&BriefContext {
            session_id: SessionId::generate(),
            prd: &prd,
            assignment: &assignment,
            status_file: Path::new("status.json"),
        });
        for id in &assignment.stories {
            assert!(brief.contains(id.as_str()), "missing {id}");
        }
    }
}
