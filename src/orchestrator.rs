//! Orchestrator facade.
//!
//! The single public entry point. `dispatch` accepts a request in one of
//! four modes: `prd` wires the full pipeline (status store → provisioner →
//! scheduler → merge coordinator); `single`, `chat`, and `quick` bypass the
//! scheduler entirely and drive exactly one agent against one path. The
//! facade owns the session registry and the event stream; callers subscribe
//! before dispatching and render what arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CrossroadsConfig;
use crate::error::DispatchError;
use crate::events::{OrchestratorEvent, SchedulerPhase};
use crate::git::GitRepo;
use crate::merge::{
    execute_merges, execute_merges_resolving, plan_merges, MergeCandidate, MergeResult,
};
use crate::model::{AgentKind, Prd, SessionId, SlotAssignment, SlotNumber};
use crate::pty::{LaunchSpec, ProcessId, PtySupervisor};
use crate::scheduler::{Scheduler, SchedulerDeps, SchedulerStopper};
use crate::status::StatusStore;

/// Capacity of the caller-facing event channel. Slow subscribers lag and
/// lose old events rather than blocking the orchestrator.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Requests & results
// ---------------------------------------------------------------------------

/// How a dispatch should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// One agent, one path, one instruction.
    Single,
    /// Full dependency-layered dispatch of a PRD across slots.
    Prd,
    /// One agent, interactive — input arrives via [`Orchestrator::send_input`].
    Chat,
    /// Like `single`, tuned for fire-and-forget one-liners.
    Quick,
}

/// A dispatch request. Which fields matter depends on the mode.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub mode: DispatchMode,
    /// Repository root (`prd` mode) or agent working directory (other modes).
    pub repo_path: PathBuf,
    /// The PRD (`prd` mode).
    pub prd: Option<Prd>,
    /// Slot assignments (`prd` mode).
    pub assignments: Vec<SlotAssignment>,
    /// Resume from an existing status document (`prd` mode).
    pub resume: bool,
    /// The agent CLI to launch (`single`/`chat`/`quick`).
    pub agent: Option<AgentKind>,
    /// The instruction sent after launch (`single`/`quick`).
    pub instruction: Option<String>,
    /// Extra environment entries appended after the inherited environment
    /// (later entries win inside the child).
    pub env: Vec<(String, String)>,
}

/// Accepted dispatch.
#[derive(Clone, Debug)]
pub struct DispatchResult {
    /// Identifies the session for `cancel`, `status`, and `wait`.
    pub request_id: Uuid,
}

/// Terminal state of a finished session.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub phase: SchedulerPhase,
    /// Merge coordinator result (`prd` mode sessions that completed).
    pub merge: Option<MergeResult>,
}

/// Point-in-time session status.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub phase: SchedulerPhase,
    pub progress_ratio: f64,
}

// ---------------------------------------------------------------------------
// Session registry
// ---------------------------------------------------------------------------

enum SessionKind {
    Prd {
        stopper: SchedulerStopper,
        phase_rx: tokio::sync::watch::Receiver<SchedulerPhase>,
        store: Arc<StatusStore>,
    },
    Single {
        supervisor: PtySupervisor,
        process: ProcessId,
        done_rx: tokio::sync::watch::Receiver<bool>,
    },
}

struct SessionEntry {
    kind: SessionKind,
    driver: Option<JoinHandle<SessionOutcome>>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The public facade. One instance can run several sessions concurrently.
pub struct Orchestrator {
    events: broadcast::Sender<OrchestratorEvent>,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the event stream. Subscribe before dispatching to see
    /// every event of a new session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Run a dispatch request. Returns as soon as the session is accepted;
    /// progress streams through [`Orchestrator::subscribe`].
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        match request.mode {
            DispatchMode::Prd => self.dispatch_prd(request).await,
            DispatchMode::Single | DispatchMode::Quick | DispatchMode::Chat => {
                self.dispatch_single(request).await
            }
        }
    }

    /// Cancel a running session. Live agents are terminated; completed work
    /// is preserved.
    pub async fn cancel(&self, request_id: Uuid) -> Result<(), DispatchError> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(&request_id)
            .ok_or_else(|| DispatchError::UnknownSession {
                id: request_id.to_string(),
            })?;
        match &entry.kind {
            SessionKind::Prd { stopper, .. } => stopper.stop(),
            SessionKind::Single {
                supervisor,
                process,
                ..
            } => supervisor.terminate(*process),
        }
        Ok(())
    }

    /// Current phase and progress of a session.
    pub async fn status(&self, request_id: Uuid) -> Result<SessionStatus, DispatchError> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(&request_id)
            .ok_or_else(|| DispatchError::UnknownSession {
                id: request_id.to_string(),
            })?;
        match &entry.kind {
            SessionKind::Prd {
                phase_rx, store, ..
            } => {
                let progress_ratio = store.progress_ratio().await.unwrap_or(0.0);
                Ok(SessionStatus {
                    phase: *phase_rx.borrow(),
                    progress_ratio,
                })
            }
            SessionKind::Single { done_rx, .. } => Ok(SessionStatus {
                phase: if *done_rx.borrow() {
                    SchedulerPhase::Completed
                } else {
                    SchedulerPhase::Monitoring
                },
                progress_ratio: if *done_rx.borrow() { 1.0 } else { 0.0 },
            }),
        }
    }

    /// Forward input to a `chat`-mode agent.
    pub async fn send_input(&self, request_id: Uuid, text: &str) -> Result<(), DispatchError> {
        let (supervisor, process) = {
            let sessions = self.sessions.lock().await;
            let entry =
                sessions
                    .get(&request_id)
                    .ok_or_else(|| DispatchError::UnknownSession {
                        id: request_id.to_string(),
                    })?;
            match &entry.kind {
                SessionKind::Single {
                    supervisor,
                    process,
                    ..
                } => (supervisor.clone(), *process),
                SessionKind::Prd { .. } => {
                    return Err(DispatchError::InvalidRequest {
                        message: format!(
                            "session {request_id} is a prd dispatch; it takes no direct input"
                        ),
                    });
                }
            }
        };
        supervisor
            .send_input(process, text)
            .await
            .map_err(DispatchError::Supervisor)
    }

    /// Wait for a session to finish and return its outcome. Consumes the
    /// session's driver; a second wait on the same id fails.
    pub async fn wait(&self, request_id: Uuid) -> Result<SessionOutcome, DispatchError> {
        let driver = {
            let mut sessions = self.sessions.lock().await;
            let entry =
                sessions
                    .get_mut(&request_id)
                    .ok_or_else(|| DispatchError::UnknownSession {
                        id: request_id.to_string(),
                    })?;
            entry
                .driver
                .take()
                .ok_or_else(|| DispatchError::UnknownSession {
                    id: format!("{request_id} already waited on"),
                })?
        };
        Ok(driver.await.unwrap_or(SessionOutcome {
            phase: SchedulerPhase::Failed,
            merge: None,
        }))
    }

    // -- prd mode -----------------------------------------------------------

    async fn dispatch_prd(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        let prd = request.prd.ok_or_else(|| DispatchError::InvalidRequest {
            message: "prd-mode dispatch needs a PRD".to_owned(),
        })?;

        let config = CrossroadsConfig::load(&request.repo_path)?;
        let repo = Arc::new(
            GitRepo::open(&request.repo_path, config.git.command_timeout()).await?,
        );
        let store = Arc::new(StatusStore::new(
            request.repo_path.join(".crossroads").join("status.json"),
        ));
        let supervisor = PtySupervisor::new(config.dispatch.kill_grace());
        let session_id = SessionId::generate();
        let base_branch = config.repo.branch.clone();
        let auto_resolve = config.merge.auto_resolve;

        info!(
            session = %session_id,
            prd = %prd.name,
            slots = request.assignments.len(),
            "dispatching PRD"
        );

        let handle = Scheduler::start(
            SchedulerDeps {
                repo: Arc::clone(&repo),
                store: Arc::clone(&store),
                supervisor,
                config,
                events: self.events.clone(),
            },
            session_id,
            prd,
            request.assignments,
            request.resume,
        )?;

        let stopper = handle.stopper();
        let phase_rx = handle.phase_watch();
        let events = self.events.clone();

        let driver = tokio::spawn(async move {
            let outcome = handle.wait().await;
            if outcome.phase != SchedulerPhase::Completed {
                return SessionOutcome {
                    phase: outcome.phase,
                    merge: None,
                };
            }

            let merge = run_merge(
                &repo,
                &base_branch,
                &outcome.completed_slots,
                auto_resolve,
            )
            .await;
            match merge {
                Ok(result) => {
                    let _ = events.send(OrchestratorEvent::MergeFinished(result.clone()));
                    SessionOutcome {
                        phase: outcome.phase,
                        merge: Some(result),
                    }
                }
                Err(e) => {
                    warn!("merge coordination failed: {e}");
                    let _ = events.send(OrchestratorEvent::Error {
                        kind: "MergeAborted".to_owned(),
                        message: e.to_string(),
                    });
                    SessionOutcome {
                        phase: outcome.phase,
                        merge: None,
                    }
                }
            }
        });

        let request_id = Uuid::new_v4();
        self.sessions.lock().await.insert(
            request_id,
            SessionEntry {
                kind: SessionKind::Prd {
                    stopper,
                    phase_rx,
                    store,
                },
                driver: Some(driver),
            },
        );
        Ok(DispatchResult { request_id })
    }

    // -- single / chat / quick ----------------------------------------------

    async fn dispatch_single(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        let agent = request
            .agent
            .clone()
            .ok_or_else(|| DispatchError::InvalidRequest {
                message: "single-mode dispatch needs an agent kind".to_owned(),
            })?;
        if !request.repo_path.is_dir() {
            return Err(DispatchError::InvalidRequest {
                message: format!(
                    "working directory '{}' does not exist",
                    request.repo_path.display()
                ),
            });
        }

        let config = CrossroadsConfig::load(&request.repo_path)?;
        let supervisor = PtySupervisor::new(config.dispatch.kill_grace());
        let session_id = SessionId::generate();
        // Single mode has exactly one worker lane.
        let slot = SlotNumber::FIRST;

        let mut env: Vec<(String, String)> = std::env::vars().collect();
        env.extend(request.env.iter().cloned());
        env.extend([
            ("CROSSROADS_SESSION_ID".to_owned(), session_id.to_string()),
            ("CROSSROADS_AGENT_TYPE".to_owned(), agent.to_string()),
            ("CROSSROADS_SLOT".to_owned(), slot.to_string()),
            (
                "CROSSROADS_WORKTREE".to_owned(),
                request.repo_path.to_string_lossy().into_owned(),
            ),
            (
                "CROSSROADS_REPO".to_owned(),
                request.repo_path.to_string_lossy().into_owned(),
            ),
        ]);

        let spec = LaunchSpec {
            executable: PathBuf::from(agent.as_str()),
            args: Vec::new(),
            cwd: request.repo_path.clone(),
            env,
        };

        let events = self.events.clone();
        let (first_output_tx, first_output_rx) = oneshot::channel::<()>();
        let mut first_output_tx = Some(first_output_tx);
        let (done_tx, done_rx) = tokio::sync::watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let output_events = events.clone();
        let process = supervisor.launch(
            &spec,
            Box::new(move |chunk| {
                if let Some(tx) = first_output_tx.take() {
                    let _ = tx.send(());
                }
                let _ = output_events.send(OrchestratorEvent::SlotOutput { slot, chunk });
            }),
            Box::new(move |exit_code| {
                let _ = exit_tx.send(exit_code);
            }),
        )?;

        // The agent gets a beat to draw its prompt; the instruction follows
        // whichever comes first, readiness or the deadline.
        if let Some(instruction) = request.instruction.clone() {
            let ready_wait = config.dispatch.ready_wait();
            let supervisor_for_input = supervisor.clone();
            tokio::spawn(async move {
                let _ = tokio::time::timeout(ready_wait, first_output_rx).await;
                if let Err(e) = supervisor_for_input.send_input(process, &instruction).await {
                    warn!("failed to send instruction: {e}");
                }
            });
        }

        let driver_events = events.clone();
        let driver = tokio::spawn(async move {
            let exit_code = exit_rx.await.unwrap_or(-1);
            let _ = done_tx.send(true);
            let _ = driver_events.send(OrchestratorEvent::SlotTerminated {
                slot,
                exit_code,
                stories_complete: 0,
                stories_total: 0,
            });
            let phase = if exit_code == 0 {
                let _ = driver_events.send(OrchestratorEvent::Completed);
                SchedulerPhase::Completed
            } else {
                let _ = driver_events.send(OrchestratorEvent::Error {
                    kind: "LaunchFailed".to_owned(),
                    message: format!("agent exited with code {exit_code}"),
                });
                SchedulerPhase::Failed
            };
            SessionOutcome { phase, merge: None }
        });

        let request_id = Uuid::new_v4();
        self.sessions.lock().await.insert(
            request_id,
            SessionEntry {
                kind: SessionKind::Single {
                    supervisor,
                    process,
                    done_rx,
                },
                driver: Some(driver),
            },
        );
        Ok(DispatchResult { request_id })
    }
}

// ---------------------------------------------------------------------------
// Merge hand-off
// ---------------------------------------------------------------------------

async fn run_merge(
    repo: &GitRepo,
    base_branch: &str,
    completed_slots: &[SlotAssignment],
    auto_resolve: bool,
) -> Result<MergeResult, crate::merge::MergeError> {
    let candidates: Vec<MergeCandidate> = completed_slots
        .iter()
        .map(|assignment| MergeCandidate {
            slot: assignment.slot,
            branch: assignment.branch_name(),
        })
        .collect();

    let plan = plan_merges(repo, base_branch, &candidates).await?;
    if auto_resolve {
        execute_merges_resolving(repo, &plan).await
    } else {
        execute_merges(repo, &plan).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_unknown_session_errors() {
        let orchestrator = Orchestrator::new();
        let err = orchestrator.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownSession { .. }));
    }

    #[tokio::test]
    async fn status_unknown_session_errors() {
        let orchestrator = Orchestrator::new();
        let err = orchestrator.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownSession { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_mode_runs_an_agent_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        // A fake "agent": prints a prompt, reads the instruction, echoes it,
        // exits 0. Installed on PATH under the agent kind's name.
        let bin_dir = tmp.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let agent_path = bin_dir.join("echoagent");
        std::fs::write(
            &agent_path,
            "#!/bin/sh\nprintf 'ready> '\nread line\nprintf 'did:%s' \"$line\"\nexit 0\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mut perms = std::fs::metadata(&agent_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&agent_path, perms).unwrap();
        }
        // Extend PATH for the child (and the supervisor's resolution) via
        // the request's env — later entries win.
        let old_path = std::env::var("PATH").unwrap_or_default();
        let extended_path = format!("{}:{old_path}", bin_dir.display());

        let orchestrator = Orchestrator::new();
        let mut events = orchestrator.subscribe();
        let result = orchestrator
            .dispatch(DispatchRequest {
                mode: DispatchMode::Single,
                repo_path: tmp.path().to_path_buf(),
                prd: None,
                assignments: vec![],
                resume: false,
                agent: Some(AgentKind::new("echoagent").unwrap()),
                instruction: Some("build the thing".to_owned()),
                env: vec![("PATH".to_owned(), extended_path)],
            })
            .await
            .unwrap();

        let outcome = orchestrator.wait(result.request_id).await.unwrap();
        assert_eq!(outcome.phase, SchedulerPhase::Completed);

        // The output stream carried the agent's echo.
        let mut saw_echo = false;
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::SlotOutput { chunk, .. } = event {
                if chunk.contains("did:build the thing") {
                    saw_echo = true;
                }
            }
        }
        assert!(saw_echo, "instruction was not echoed back");
    }

    #[tokio::test]
    async fn prd_mode_requires_a_prd() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new();
        let err = orchestrator
            .dispatch(DispatchRequest {
                mode: DispatchMode::Prd,
                repo_path: tmp.path().to_path_buf(),
                prd: None,
                assignments: vec![],
                resume: false,
                agent: None,
                instruction: None,
                env: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRequest { .. }));
    }
}
