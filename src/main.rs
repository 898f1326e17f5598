use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use crossroads::config::CrossroadsConfig;
use crossroads::events::{OrchestratorEvent, SchedulerPhase};
use crossroads::git::GitRepo;
use crossroads::merge::{execute_merges, execute_merges_resolving, plan_merges, MergeCandidate};
use crossroads::model::AgentKind;
use crossroads::orchestrator::{DispatchMode, DispatchRequest, Orchestrator};
use crossroads::status::StatusStore;
use crossroads::telemetry;

mod doctor;
mod setup;
mod specs;

/// Multi-agent dispatch coordinator
///
/// crossroads drives several interactive coding-assistant CLIs in parallel
/// against one repository. A PRD (a JSON list of user stories with
/// prerequisites) is split across worker slots; each slot gets an isolated
/// git worktree on its own branch and an agent driven by a loop script.
/// Agents coordinate through `.crossroads/status.json`, the scheduler
/// unblocks dependent stories as prerequisites complete, and finished
/// branches are merged back into the base branch.
///
/// QUICK START:
///
///   crossroads init
///   crossroads doctor --agent claude
///   crossroads run --prd feature.json \
///       --slot 1:claude:implement:US-001,US-002 \
///       --slot 2:claude:implement:US-003
///
/// While a run is active, `crossroads status` shows per-story progress.
#[derive(Parser)]
#[command(name = "crossroads")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'crossroads <command> --help' for details on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a PRD across worker slots
    Run(RunArgs),

    /// Launch one agent with one instruction (no scheduler)
    Single(SingleArgs),

    /// Show the status document for the current session
    Status(StatusArgs),

    /// Predict merge conflicts for slot branches (dry run, no residue)
    Plan(MergeArgs),

    /// Merge slot branches into the base branch
    ///
    /// Attempts each branch in order and stops at the first conflict,
    /// aborting the conflicted merge. With --resolve, whitespace-only and
    /// non-overlapping conflicts are resolved automatically first.
    Merge(MergeArgs),

    /// Check system requirements and configuration
    Doctor(DoctorArgs),

    /// Initialize crossroads in the current repository
    ///
    /// Writes a starter .crossroads/config.toml and adds the agent
    /// instruction section to AGENTS.md. Safe to run multiple times.
    Init(InitArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the PRD JSON file
    #[arg(long)]
    prd: PathBuf,

    /// Slot assignment, repeatable: <slot>:<agent>:<action>:<stories>
    ///
    /// Example: 1:claude:implement:US-001,US-002
    #[arg(long = "slot", required = true)]
    slots: Vec<String>,

    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Resume from an existing status document instead of starting fresh
    #[arg(long)]
    resume: bool,
}

#[derive(Args)]
struct SingleArgs {
    /// Agent CLI to launch (e.g. claude, codex)
    #[arg(long)]
    agent: String,

    /// Working directory for the agent
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// The instruction to send once the agent is ready
    instruction: String,
}

#[derive(Args)]
struct StatusArgs {
    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

#[derive(Args)]
struct MergeArgs {
    /// Merge step, repeatable: <slot>:<branch>
    ///
    /// Example: 1:xroads/slot-1-claude-us-001-us-002
    #[arg(long = "step", required = true)]
    steps: Vec<String>,

    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Base branch to merge into (default: from config)
    #[arg(long)]
    base: Option<String>,

    /// Attempt automated resolution of trivial conflicts (merge only)
    #[arg(long)]
    resolve: bool,
}

#[derive(Args)]
struct DoctorArgs {
    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Agent kinds whose loop scripts should be checked, repeatable
    #[arg(long = "agent")]
    agents: Vec<String>,
}

#[derive(Args)]
struct InitArgs {
    /// Repository root
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Overwrite an existing crossroads section in AGENTS.md
    #[arg(short, long)]
    force: bool,

    /// Print the AGENTS.md section instead of writing anything
    #[arg(long)]
    show: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_prd(args).await,
        Commands::Single(args) => run_single(args).await,
        Commands::Status(args) => show_status(&args).await,
        Commands::Plan(args) => run_plan(args, false).await,
        Commands::Merge(args) => run_merge_cmd(args).await,
        Commands::Doctor(args) => doctor::run(&args.repo, &args.agents),
        Commands::Init(args) => {
            if args.show {
                setup::show()
            } else {
                setup::run(&args.repo, args.force)
            }
        }
    }
}

async fn run_prd(args: RunArgs) -> Result<()> {
    let prd = specs::load_prd(&args.prd)?;
    let assignments = args
        .slots
        .iter()
        .map(|s| specs::parse_slot_spec(s))
        .collect::<Result<Vec<_>>>()?;

    let orchestrator = Orchestrator::new();
    let events = orchestrator.subscribe();
    let printer = tokio::spawn(print_events(events));

    let result = orchestrator
        .dispatch(DispatchRequest {
            mode: DispatchMode::Prd,
            repo_path: args.repo.clone(),
            prd: Some(prd),
            assignments,
            resume: args.resume,
            agent: None,
            instruction: None,
            env: vec![],
        })
        .await?;

    let outcome = orchestrator.wait(result.request_id).await?;

    // Let the printer drain what the driver emitted at the end.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    printer.abort();

    println!();
    println!("Session finished: {}", outcome.phase);
    if let Some(merge) = &outcome.merge {
        println!(
            "Merge: {} branch(es) merged, {} conflict(s){}",
            merge.merged_branches.len(),
            merge.conflicts.len(),
            if merge.rolled_back {
                ", rolled back"
            } else {
                ""
            }
        );
        for conflict in &merge.conflicts {
            println!("  ! {}:", conflict.branch);
            for file in &conflict.files {
                println!("      {}", file.display());
            }
        }
    }

    if outcome.phase != SchedulerPhase::Completed {
        bail!("dispatch did not complete (phase: {})", outcome.phase);
    }
    Ok(())
}

async fn run_single(args: SingleArgs) -> Result<()> {
    let agent = AgentKind::new(&args.agent)?;
    let orchestrator = Orchestrator::new();
    let events = orchestrator.subscribe();
    let printer = tokio::spawn(print_events(events));

    let result = orchestrator
        .dispatch(DispatchRequest {
            mode: DispatchMode::Single,
            repo_path: args.path,
            prd: None,
            assignments: vec![],
            resume: false,
            agent: Some(agent),
            instruction: Some(args.instruction),
            env: vec![],
        })
        .await?;

    let outcome = orchestrator.wait(result.request_id).await?;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    printer.abort();

    if outcome.phase != SchedulerPhase::Completed {
        bail!("agent did not complete (phase: {})", outcome.phase);
    }
    Ok(())
}

async fn show_status(args: &StatusArgs) -> Result<()> {
    let path = args.repo.join(".crossroads").join("status.json");
    if !path.exists() {
        bail!(
            "no status document at {}\n  Start a session first: crossroads run --prd <file> --slot ...",
            path.display()
        );
    }
    let store = StatusStore::new(&path);
    let doc = store.read().await?;

    println!("Session:  {}", doc.session_id);
    println!("Feature:  {}", doc.prd_name);
    println!("Started:  {}", doc.started_at.to_rfc3339());
    println!("Updated:  {}", doc.updated_at.to_rfc3339());
    println!(
        "Progress: {:.0}% ({} of {} stories complete)",
        doc.progress_ratio() * 100.0,
        doc.complete_stories().len(),
        doc.stories.len()
    );
    println!();

    for (index, layer) in doc.layers.iter().enumerate() {
        let marker = if index == doc.current_layer { ">" } else { " " };
        println!("{marker} layer {index}:");
        for id in layer {
            if let Some(tracking) = doc.stories.get(id) {
                let slot = tracking
                    .assigned_to_slot
                    .map_or_else(String::new, |s| format!(" (slot {s})"));
                println!("    {id}: {}{slot}", tracking.status);
                if let Some(error) = &tracking.last_error {
                    println!("      last error: {error}");
                }
            }
        }
    }
    Ok(())
}

async fn run_plan(args: MergeArgs, execute: bool) -> Result<()> {
    let steps = args
        .steps
        .iter()
        .map(|s| specs::parse_step_spec(s))
        .collect::<Result<Vec<_>>>()?;
    let config = CrossroadsConfig::load(&args.repo)?;
    let base = args.base.unwrap_or(config.repo.branch);

    let repo = GitRepo::open(&args.repo, config.git.command_timeout()).await?;
    let candidates: Vec<MergeCandidate> = steps
        .into_iter()
        .map(|(slot, branch)| MergeCandidate { slot, branch })
        .collect();

    let plan = plan_merges(&repo, &base, &candidates).await?;
    println!("Merge plan onto '{base}':");
    for step in &plan.steps {
        println!("  [{}] slot {} — {}", step.state, step.slot, step.branch);
        for file in &step.predicted_conflicts {
            println!("        conflict: {}", file.display());
        }
    }
    println!(
        "{} ready, {} blocked",
        plan.ready_steps().len(),
        plan.blocked_steps().len()
    );

    if !execute {
        return Ok(());
    }

    let result = if args.resolve {
        execute_merges_resolving(&repo, &plan).await?
    } else {
        execute_merges(&repo, &plan).await?
    };
    println!();
    if result.success {
        println!("Merged {} branch(es) into '{base}'.", result.merged_branches.len());
    } else {
        println!(
            "Stopped after {} branch(es); conflicts remain{}:",
            result.merged_branches.len(),
            if result.rolled_back {
                " (conflicted merge aborted)"
            } else {
                ""
            }
        );
        for conflict in &result.conflicts {
            println!("  ! {}:", conflict.branch);
            for file in &conflict.files {
                println!("      {}", file.display());
            }
        }
        bail!("merge incomplete");
    }
    Ok(())
}

async fn run_merge_cmd(args: MergeArgs) -> Result<()> {
    run_plan(args, true).await
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<OrchestratorEvent>) {
    loop {
        match events.recv().await {
            Ok(OrchestratorEvent::PhaseChanged(phase)) => {
                println!("--- phase: {phase}");
            }
            Ok(OrchestratorEvent::Progress(progress)) => {
                println!(
                    "    layer {}/{} · slots {}/{} · stories {}/{} · {}",
                    progress.current_layer + 1,
                    progress.total_layers,
                    progress.slots_launched,
                    progress.total_slots,
                    progress.stories_complete,
                    progress.total_stories,
                    progress.message
                );
            }
            Ok(OrchestratorEvent::SlotUpdated(info)) => {
                println!("    slot {}: {}", info.slot, info.lifecycle);
            }
            Ok(OrchestratorEvent::SlotOutput { slot, chunk }) => {
                for line in chunk.lines() {
                    println!("  [slot {slot}] {line}");
                }
            }
            Ok(OrchestratorEvent::SlotTerminated {
                slot,
                exit_code,
                stories_complete,
                stories_total,
            }) => {
                println!(
                    "    slot {slot} exited with code {exit_code} ({stories_complete}/{stories_total} stories complete)"
                );
            }
            Ok(OrchestratorEvent::MergeFinished(result)) => {
                println!(
                    "--- merge finished: {} merged, {} conflict(s)",
                    result.merged_branches.len(),
                    result.conflicts.len()
                );
            }
            Ok(OrchestratorEvent::Completed) => {
                println!("--- all stories complete");
            }
            Ok(OrchestratorEvent::Error { kind, message }) => {
                eprintln!("error [{kind}]: {message}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("(output fell behind; {skipped} events skipped)");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
