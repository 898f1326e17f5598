//! `crossroads init`: seed configuration and agent-facing instructions.
//!
//! Writes a starter `.crossroads/config.toml` (if absent) and maintains a
//! marker-delimited CROSSROADS section in `AGENTS.md` describing the status
//! protocol for any agent that opens the repository directly.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

const SECTION_START: &str = "<!-- crossroads-agent-instructions-v1 -->";
const SECTION_END: &str = "<!-- end-crossroads-agent-instructions -->";

const STARTER_CONFIG: &str = r#"# Crossroads dispatch configuration.
# All values shown are the defaults; uncomment to change.

[repo]
# branch = "main"
# worktree_dir = ".crossroads/worktrees"

[dispatch]
# poll_interval_secs = 5
# ready_wait_ms = 800
# kill_grace_secs = 2
# max_iterations = 50
# sleep_seconds = 10

[git]
# command_timeout_secs = 60

[merge]
# auto_resolve = false
"#;

fn instructions() -> String {
    format!(
        r#"{SECTION_START}

## Multi-Agent Dispatch with Crossroads

This repository is driven by crossroads: several coding agents work in
parallel, each in its own git worktree under `.crossroads/worktrees/`, and
coordinate through `.crossroads/status.json`.

### Quick Reference

| Task | How |
|------|-----|
| See your assignment | read `AGENT.md` in your worktree |
| See your stories | read `prd.json` in your worktree |
| Check what is unblocked | read `.crossroads/status.json`, look for `"status": "ready"` |
| Claim a story | set its status to `in-progress`, rewrite the file |
| Finish a story | set its status to `complete`, rewrite the file |

### Updating the status document

1. Read the whole file.
2. Change your story's `status` and the top-level `updatedAt`.
3. Write the whole document to a temporary file **in the same directory**.
4. Rename the temporary file onto `status.json`.

Never edit the file in place, never truncate it, and never hold it open —
the orchestrator and the other agents rewrite it the same way, and the
rename is what keeps everyone's reads consistent.

### Ground rules

- Stay inside your own worktree; never touch other agents' directories.
- Never run commands that do not terminate on their own.
- Commit your work to your worktree's branch; merging is the
  orchestrator's job.

{SECTION_END}
"#
    )
}

/// Seed `.crossroads/config.toml` and the `AGENTS.md` section.
pub fn run(repo: &Path, force: bool) -> Result<()> {
    let state_dir = repo.join(".crossroads");
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;

    let config_path = state_dir.join("config.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        fs::write(&config_path, STARTER_CONFIG)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("Wrote starter config to {}", config_path.display());
    }

    update_agents_md(repo, force)?;
    Ok(())
}

/// Print the AGENTS.md section without writing anything.
#[allow(clippy::unnecessary_wraps)]
pub fn show() -> Result<()> {
    print!("{}", instructions());
    Ok(())
}

fn update_agents_md(repo: &Path, force: bool) -> Result<()> {
    let agents_path = repo.join("AGENTS.md");
    let section = instructions();

    if agents_path.exists() {
        let content = fs::read_to_string(&agents_path).context("failed to read AGENTS.md")?;

        if content.contains(SECTION_START) {
            if force {
                let start_idx = content.find(SECTION_START).unwrap_or(0);
                let end_idx = content
                    .find(SECTION_END)
                    .map_or(content.len(), |i| i + SECTION_END.len());
                let new_content = format!(
                    "{}{}{}",
                    &content[..start_idx],
                    section.trim(),
                    &content[end_idx..]
                );
                fs::write(&agents_path, new_content).context("failed to write AGENTS.md")?;
                println!("Updated crossroads section in AGENTS.md");
            } else {
                println!("Crossroads section already exists in AGENTS.md");
                println!("Use --force to overwrite");
            }
        } else {
            let new_content = format!("{content}\n{section}");
            fs::write(&agents_path, new_content).context("failed to write AGENTS.md")?;
            println!("Added crossroads section to AGENTS.md");
        }
    } else {
        let content = format!("# Agent Guide\n\n{section}");
        fs::write(&agents_path, content).context("failed to create AGENTS.md")?;
        println!("Created AGENTS.md with crossroads instructions");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_seeds_config_and_agents_md() {
        let tmp = tempfile::tempdir().unwrap();
        run(tmp.path(), false).unwrap();
        assert!(tmp.path().join(".crossroads/config.toml").exists());
        let agents = fs::read_to_string(tmp.path().join("AGENTS.md")).unwrap();
        assert!(agents.contains(SECTION_START));
        assert!(agents.contains("status.json"));
    }

    #[test]
    fn init_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        run(tmp.path(), false).unwrap();
        let first = fs::read_to_string(tmp.path().join("AGENTS.md")).unwrap();
        run(tmp.path(), false).unwrap();
        let second = fs::read_to_string(tmp.path().join("AGENTS.md")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn init_appends_to_existing_agents_md() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("AGENTS.md"), "# Existing\n\nkeep me\n").unwrap();
        run(tmp.path(), false).unwrap();
        let agents = fs::read_to_string(tmp.path().join("AGENTS.md")).unwrap();
        assert!(agents.contains("keep me"));
        assert!(agents.contains(SECTION_START));
    }
}
