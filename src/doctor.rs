//! `crossroads doctor`: check system requirements and configuration.

use std::path::Path;
use std::process::Command;

use anyhow::Result;

use crossroads::model::AgentKind;
use crossroads::scripts;

/// Check system requirements and configuration.
#[allow(clippy::unnecessary_wraps)]
pub fn run(repo: &Path, agents: &[String]) -> Result<()> {
    println!("crossroads doctor");
    println!("=================");
    println!();

    let mut all_ok = true;

    all_ok &= check_tool("git", &["--version"], true);
    all_ok &= check_repo(repo);
    all_ok &= check_state_dir(repo);

    for agent in agents {
        check_loop_script(repo, agent);
    }

    println!();
    if all_ok {
        println!("All required checks passed!");
    } else {
        println!("Some required checks failed. See above for details.");
    }

    Ok(())
}

fn check_tool(name: &str, args: &[&str], required: bool) -> bool {
    let label = if required { "required" } else { "optional" };

    match Command::new(name).args(args).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            let version = version.lines().next().unwrap_or("unknown").trim();
            println!("[OK] {name} ({label}): {version}");
            true
        }
        Ok(_) => {
            println!("[FAIL] {name} ({label}): found but returned error");
            !required
        }
        Err(_) => {
            println!("[FAIL] {name} ({label}): not found");
            !required
        }
    }
}

fn check_repo(repo: &Path) -> bool {
    let probe = Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(repo)
        .output();
    match probe {
        Ok(output) if output.status.success() => {
            println!("[OK] repository: {}", repo.display());
            true
        }
        _ => {
            println!("[FAIL] repository: '{}' is not a git checkout", repo.display());
            println!("       Run crossroads from a repository root, or pass --repo");
            false
        }
    }
}

fn check_state_dir(repo: &Path) -> bool {
    let dir = repo.join(".crossroads");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        println!("[FAIL] state dir: cannot create '{}': {e}", dir.display());
        return false;
    }
    let probe = dir.join(".doctor-write-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            println!("[OK] state dir: {} is writable", dir.display());
            true
        }
        Err(e) => {
            println!("[FAIL] state dir: '{}' is not writable: {e}", dir.display());
            false
        }
    }
}

fn check_loop_script(repo: &Path, agent: &str) {
    let Ok(kind) = AgentKind::new(agent) else {
        println!("[FAIL] agent '{agent}': not a valid agent kind");
        return;
    };
    match scripts::resolve_loop_script(&kind, repo) {
        Some(path) => {
            println!("[OK] loop script for '{kind}': {}", path.display());
        }
        None => {
            println!(
                "[SKIP] loop script for '{kind}': {} not found on the search path",
                scripts::script_file_name(&kind)
            );
            for dir in scripts::search_path(repo) {
                println!("       searched: {}", dir.display());
            }
        }
    }
}
