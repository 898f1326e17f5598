//! Dependency-layered dispatch scheduler.
//!
//! The heart of the orchestrator: a single-task cooperative state machine
//! that owns the slot table, the layer index, and the phase enum. All
//! mutations happen inside its event loop; the outside world talks to it
//! through an unbounded inbox (slot terminations, watcher observations,
//! stop requests) and observes it through the facade's event stream.
//!
//! Phases: `idle → provisioning → validating → launching → monitoring →
//! completed | failed`. Layer transitions are driven by a polling watcher
//! over the status document, so completions written by agent processes are
//! picked up without any in-process signal from them.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::brief::{build_brief, skills_for_action, BriefContext};
use crate::config::CrossroadsConfig;
use crate::error::DispatchError;
use crate::events::{OrchestratorEvent, ProgressSnapshot, SchedulerPhase, SlotInfo};
use crate::git::GitRepo;
use crate::model::{
    first_incomplete_layer, BranchName, Prd, SessionId, SlotAssignment, SlotLifecycle,
    SlotNumber, StoryId, StoryStatus,
};
use crate::provision::{SlotFiles, SlotProvisioner};
use crate::pty::{LaunchSpec, ProcessId, PtySupervisor};
use crate::scripts::{resolve_loop_script, script_file_name};
use crate::status::{StatusStore, StoreError};

/// Bound on the watcher's seen-completion set (spec recommendation).
const SEEN_COMPLETIONS_CAP: usize = 1000;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Inbox events processed by the scheduler loop, strictly in arrival order.
#[derive(Debug)]
pub(crate) enum SchedulerEvent {
    /// The watcher saw a story newly enter `complete`.
    StoryCompleted(StoryId),
    /// Every story in `layer` is complete and at least one story remains.
    LayerCompleted { layer: usize, next: Vec<StoryId> },
    /// Every story is complete.
    AllComplete,
    /// A slot's loop script terminated.
    SlotTerminated { slot: SlotNumber, exit_code: i32 },
    /// The watcher hit a persistent status-store failure.
    WatcherFailed(StoreError),
    /// Cancel the session, preserving completed work.
    StopAll,
}

// ---------------------------------------------------------------------------
// Slot table
// ---------------------------------------------------------------------------

struct SlotState {
    assignment: SlotAssignment,
    branch: BranchName,
    path: Option<PathBuf>,
    lifecycle: SlotLifecycle,
    process: Option<ProcessId>,
}

impl SlotState {
    fn info(&self) -> SlotInfo {
        SlotInfo {
            slot: self.assignment.slot,
            agent: self.assignment.agent.clone(),
            action: self.assignment.action.clone(),
            stories: self.assignment.stories.clone(),
            path: self.path.clone(),
            branch: self.branch.clone(),
            lifecycle: self.lifecycle,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// What a finished scheduler leaves behind.
#[derive(Clone, Debug)]
pub struct SchedulerOutcome {
    /// Terminal phase (`completed`, `failed`, or `idle` after cancellation).
    pub phase: SchedulerPhase,
    /// Assignments whose loop script exited 0, in slot order. These are the
    /// merge coordinator's candidates.
    pub completed_slots: Vec<SlotAssignment>,
}

/// Cheap cancellation handle, detachable from [`SchedulerHandle`].
#[derive(Clone)]
pub struct SchedulerStopper(mpsc::UnboundedSender<SchedulerEvent>);

impl SchedulerStopper {
    /// Request cancellation. Live agents are terminated; completed work
    /// stays in the status document.
    pub fn stop(&self) {
        let _ = self.0.send(SchedulerEvent::StopAll);
    }
}

/// Control handle for a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    inbox: mpsc::UnboundedSender<SchedulerEvent>,
    phase_rx: watch::Receiver<SchedulerPhase>,
    join: JoinHandle<SchedulerOutcome>,
}

impl SchedulerHandle {
    /// Request cancellation. Live agents are terminated; completed work
    /// stays in the status document.
    pub fn stop(&self) {
        let _ = self.inbox.send(SchedulerEvent::StopAll);
    }

    /// A cloneable cancellation handle.
    #[must_use]
    pub fn stopper(&self) -> SchedulerStopper {
        SchedulerStopper(self.inbox.clone())
    }

    /// A watch receiver over the phase.
    #[must_use]
    pub fn phase_watch(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase_rx.clone()
    }

    /// The scheduler's current phase.
    #[must_use]
    pub fn phase(&self) -> SchedulerPhase {
        *self.phase_rx.borrow()
    }

    /// Wait for the scheduler to finish.
    pub async fn wait(self) -> SchedulerOutcome {
        self.join.await.unwrap_or(SchedulerOutcome {
            phase: SchedulerPhase::Failed,
            completed_slots: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// External collaborators handed to the scheduler at start.
pub struct SchedulerDeps {
    pub repo: Arc<GitRepo>,
    pub store: Arc<StatusStore>,
    pub supervisor: PtySupervisor,
    pub config: CrossroadsConfig,
    pub events: broadcast::Sender<OrchestratorEvent>,
}

pub struct Scheduler {
    deps: SchedulerDeps,
    session_id: SessionId,
    prd: Prd,
    layers: Vec<Vec<StoryId>>,
    slots: BTreeMap<SlotNumber, SlotState>,
    current_layer: usize,
    phase: SchedulerPhase,
    phase_tx: watch::Sender<SchedulerPhase>,
    inbox_tx: mpsc::UnboundedSender<SchedulerEvent>,
    resume: bool,
    watcher: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Validate the request and start the scheduler actor.
    ///
    /// Pre-launch invariant violations (invalid PRD, cyclic prerequisites,
    /// unowned stories, duplicate slots) refuse the whole session here;
    /// per-slot failures after this point fail only the affected slot.
    pub fn start(
        deps: SchedulerDeps,
        session_id: SessionId,
        prd: Prd,
        assignments: Vec<SlotAssignment>,
        resume: bool,
    ) -> Result<SchedulerHandle, DispatchError> {
        prd.validate()?;
        let layers = crate::model::compute_layers(&prd)?;

        let mut owned: HashSet<&StoryId> = HashSet::new();
        let mut slots: BTreeMap<SlotNumber, SlotState> = BTreeMap::new();
        for assignment in &assignments {
            if slots.contains_key(&assignment.slot) {
                return Err(DispatchError::DuplicateSlot {
                    slot: assignment.slot.get(),
                });
            }
            owned.extend(assignment.stories.iter());
            slots.insert(
                assignment.slot,
                SlotState {
                    branch: assignment.branch_name(),
                    assignment: assignment.clone(),
                    path: None,
                    lifecycle: SlotLifecycle::Pending,
                    process: None,
                },
            );
        }
        for story in &prd.stories {
            if !owned.contains(&story.id) {
                return Err(DispatchError::NoSlotForStory {
                    story: story.id.clone(),
                });
            }
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SchedulerPhase::Idle);

        let scheduler = Self {
            deps,
            session_id,
            prd,
            layers,
            slots,
            current_layer: 0,
            phase: SchedulerPhase::Idle,
            phase_tx,
            inbox_tx: inbox_tx.clone(),
            resume,
            watcher: None,
        };

        let join = tokio::spawn(scheduler.run(inbox_rx));
        Ok(SchedulerHandle {
            inbox: inbox_tx,
            phase_rx,
            join,
        })
    }

    // -- actor body ---------------------------------------------------------

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<SchedulerEvent>,
    ) -> SchedulerOutcome {
        if let Err(e) = self.start_up().await {
            error!("dispatch start-up failed: {e}");
            self.emit_error(&e);
            self.set_phase(SchedulerPhase::Failed);
            self.shut_down();
            return self.outcome();
        }

        self.set_phase(SchedulerPhase::Monitoring);
        while let Some(event) = inbox.recv().await {
            self.handle_event(event).await;
            if matches!(
                self.phase,
                SchedulerPhase::Completed | SchedulerPhase::Failed | SchedulerPhase::Idle
            ) {
                break;
            }
        }
        self.shut_down();
        self.outcome()
    }

    fn outcome(&self) -> SchedulerOutcome {
        SchedulerOutcome {
            phase: self.phase,
            completed_slots: self
                .slots
                .values()
                .filter(|s| s.lifecycle == SlotLifecycle::Completed)
                .map(|s| s.assignment.clone())
                .collect(),
        }
    }

    async fn start_up(&mut self) -> Result<(), DispatchError> {
        self.set_phase(SchedulerPhase::Provisioning);
        self.emit_progress(&format!("computed {} layers", self.layers.len()))
            .await;

        let doc = self
            .deps
            .store
            .initialise(self.session_id, &self.prd, self.resume)
            .await?;

        // On resume the document is authoritative: its layers were computed
        // for the session that wrote it, and completed stories tell us where
        // to pick up.
        self.layers = doc.layers.clone();
        self.current_layer = first_incomplete_layer(&self.layers, |id| {
            doc.stories
                .get(id)
                .is_some_and(|t| t.status == StoryStatus::Complete)
        })
        .min(self.layers.len().saturating_sub(1));
        if doc.current_layer != self.current_layer {
            self.deps
                .store
                .set_current_layer(self.current_layer)
                .await?;
        }

        for slot in self.slots.values() {
            for story in &slot.assignment.stories {
                if self.prd.story(story).is_some() {
                    self.deps
                        .store
                        .assign_slot(story, slot.assignment.slot)
                        .await?;
                }
            }
        }

        self.provision_slots().await;

        self.set_phase(SchedulerPhase::Validating);
        let mut usable = 0usize;
        for slot in self.slots.values_mut() {
            if slot.lifecycle == SlotLifecycle::Failed {
                continue;
            }
            let valid = slot
                .path
                .as_deref()
                .is_some_and(SlotProvisioner::validate);
            if valid {
                usable += 1;
            } else {
                warn!(slot = %slot.assignment.slot, "working copy failed validation");
                slot.lifecycle = SlotLifecycle::Failed;
                let _ = self
                    .deps
                    .events
                    .send(OrchestratorEvent::SlotUpdated(slot.info()));
            }
        }
        if usable == 0 {
            return Err(DispatchError::Provision(
                crate::provision::ProvisionError::WorkingCopyValidationFailed {
                    path: self.worktrees_root(),
                },
            ));
        }

        self.start_watcher().await;

        self.set_phase(SchedulerPhase::Launching);
        self.launch_layer(self.current_layer).await;
        Ok(())
    }

    async fn provision_slots(&mut self) {
        let worktrees_root = self.worktrees_root();
        let status_file = self.deps.store.path().to_path_buf();
        let slot_numbers: Vec<SlotNumber> = self.slots.keys().copied().collect();

        for number in slot_numbers {
            let (assignment, files) = {
                let slot = &self.slots[&number];
                let assignment = slot.assignment.clone();
                let files = self.slot_files(&assignment, &status_file);
                (assignment, files)
            };

            let provisioner = SlotProvisioner::new(&self.deps.repo, worktrees_root.clone());
            let result = provisioner.provision(&assignment, &files).await;

            let Some(slot) = self.slots.get_mut(&number) else {
                continue;
            };
            match result {
                Ok(provisioned) => {
                    info!(
                        slot = %number,
                        path = %provisioned.path.display(),
                        reused = provisioned.reused,
                        "working copy ready"
                    );
                    slot.path = Some(provisioned.path);
                    slot.lifecycle = SlotLifecycle::WorkingCopyReady;
                }
                Err(e) => {
                    error!(slot = %number, "provisioning failed: {e}");
                    slot.lifecycle = SlotLifecycle::Failed;
                    let dispatch_err = DispatchError::Provision(e);
                    let _ = self.deps.events.send(OrchestratorEvent::Error {
                        kind: dispatch_err.kind().to_owned(),
                        message: dispatch_err.to_string(),
                    });
                }
            }
            let _ = self
                .deps
                .events
                .send(OrchestratorEvent::SlotUpdated(self.slots[&number].info()));
        }
    }

    fn slot_files(&self, assignment: &SlotAssignment, status_file: &std::path::Path) -> SlotFiles {
        let brief = build_brief(&BriefContext {
            session_id: self.session_id,
            prd: &self.prd,
            assignment,
            status_file,
        });
        let filtered = self.prd.filtered(&assignment.stories);
        let prd_json = serde_json::to_string_pretty(&filtered)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .unwrap_or_else(|_| "{}\n".to_owned());
        SlotFiles { brief, prd_json }
    }

    fn worktrees_root(&self) -> PathBuf {
        self.deps
            .repo
            .root()
            .join(&self.deps.config.repo.worktree_dir)
    }

    // -- watcher ------------------------------------------------------------

    async fn start_watcher(&mut self) {
        let store = Arc::clone(&self.deps.store);
        let inbox = self.inbox_tx.clone();
        let interval = self.deps.config.dispatch.poll_interval();

        // Stories already complete (resume) must not re-fire completion
        // events.
        let mut seen = BoundedSeen::new(SEEN_COMPLETIONS_CAP);
        if let Ok(doc) = store.read().await {
            for id in doc.complete_stories() {
                seen.insert(id);
            }
        }

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                if let Err(e) = store.refresh_and_unblock().await {
                    if matches!(e, StoreError::Decode { .. }) {
                        let _ = inbox.send(SchedulerEvent::WatcherFailed(e));
                        return;
                    }
                    warn!("status refresh failed: {e}");
                    continue;
                }

                let doc = match store.read().await {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!("status read failed: {e}");
                        continue;
                    }
                };

                for id in doc.complete_stories() {
                    if seen.insert(id.clone()) {
                        let _ = inbox.send(SchedulerEvent::StoryCompleted(id));
                    }
                }

                if doc.all_complete() {
                    let _ = inbox.send(SchedulerEvent::AllComplete);
                    return;
                }

                let layer = doc.current_layer;
                if doc.layer_complete(layer) && layer + 1 < doc.layers.len() {
                    let _ = inbox.send(SchedulerEvent::LayerCompleted {
                        layer,
                        next: doc.layers[layer + 1].clone(),
                    });
                }
            }
        });
        self.watcher = Some(handle);
    }

    // -- event handling -----------------------------------------------------

    async fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::StoryCompleted(id) => {
                debug!(story = %id, "story completed");
                // Re-read and unblock so agents peeking at the document see
                // `ready` rather than `blocked` for unblocked children.
                if let Err(e) = self.deps.store.refresh_and_unblock().await {
                    warn!("unblock after completion failed: {e}");
                }
                self.emit_progress(&format!("story {id} complete")).await;
            }
            SchedulerEvent::LayerCompleted { layer, next } => {
                // At most one active transition: stale observations of an
                // already-advanced layer are dropped.
                if layer != self.current_layer {
                    debug!(layer, current = self.current_layer, "stale layer event");
                    return;
                }
                info!(layer, next = next.len(), "layer complete, advancing");
                self.current_layer = layer + 1;
                if let Err(e) = self.deps.store.set_current_layer(self.current_layer).await {
                    warn!("failed to persist layer advance: {e}");
                }
                self.emit_progress(&format!(
                    "layer {} complete, launching layer {}",
                    layer, self.current_layer
                ))
                .await;
                self.set_phase(SchedulerPhase::Launching);
                self.launch_layer(self.current_layer).await;
                self.set_phase(SchedulerPhase::Monitoring);
            }
            SchedulerEvent::SlotTerminated { slot, exit_code } => {
                self.on_slot_terminated(slot, exit_code).await;
            }
            SchedulerEvent::AllComplete => {
                let live: Vec<SlotNumber> = self
                    .slots
                    .values()
                    .filter(|s| s.lifecycle.is_live())
                    .map(|s| s.assignment.slot)
                    .collect();
                if live.is_empty() {
                    info!("all stories complete");
                    self.set_phase(SchedulerPhase::Completed);
                    let _ = self.deps.events.send(OrchestratorEvent::Completed);
                } else {
                    // Loop scripts exit 0 on their own once their stories
                    // are complete; wait for that so their exit codes decide
                    // slot completion. A backstop kill covers scripts that
                    // ignore their contract.
                    info!(
                        live = live.len(),
                        "all stories complete; draining live slots"
                    );
                    let supervisor = self.deps.supervisor.clone();
                    let grace = std::time::Duration::from_secs(
                        u64::from(self.deps.config.dispatch.sleep_seconds) * 2 + 5,
                    );
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        supervisor.terminate_all();
                    });
                }
            }
            SchedulerEvent::WatcherFailed(e) => {
                let dispatch_err = DispatchError::Store(e);
                error!("status watcher failed: {dispatch_err}");
                self.emit_error(&dispatch_err);
                self.deps.supervisor.terminate_all();
                self.set_phase(SchedulerPhase::Failed);
            }
            SchedulerEvent::StopAll => {
                info!("cancellation requested");
                for slot in self.slots.values_mut() {
                    if let Some(pid) = slot.process.take() {
                        self.deps.supervisor.terminate(pid);
                    }
                }
                self.set_phase(SchedulerPhase::Idle);
            }
        }
    }

    async fn on_slot_terminated(&mut self, number: SlotNumber, exit_code: i32) {
        let (stories_complete, stories_total) = self.slot_story_counts(number).await;

        if let Some(slot) = self.slots.get_mut(&number) {
            slot.process = None;
            slot.lifecycle = if exit_code == 0 {
                SlotLifecycle::Completed
            } else {
                SlotLifecycle::Failed
            };
            info!(
                slot = %number,
                exit_code,
                lifecycle = %slot.lifecycle,
                "slot terminated"
            );
            if exit_code == 0 && stories_complete < stories_total {
                // The loop script claims success but stories are not all
                // complete; surface the divergence instead of hiding it.
                warn!(
                    slot = %number,
                    stories_complete,
                    stories_total,
                    "slot exited 0 with incomplete stories"
                );
            }
            let _ = self
                .deps
                .events
                .send(OrchestratorEvent::SlotUpdated(slot.info()));
        }
        let _ = self.deps.events.send(OrchestratorEvent::SlotTerminated {
            slot: number,
            exit_code,
            stories_complete,
            stories_total,
        });

        let any_live = self.slots.values().any(|s| s.lifecycle.is_live());
        if any_live {
            return;
        }

        let Ok(doc) = self.deps.store.read().await else {
            return;
        };
        if doc.all_complete() {
            self.set_phase(SchedulerPhase::Completed);
            let _ = self.deps.events.send(OrchestratorEvent::Completed);
        } else if doc.layer_complete(self.current_layer)
            && self.current_layer + 1 < self.layers.len()
        {
            // The watcher is about to advance the layer and relaunch; wait.
            debug!("no live slots, but a layer transition is pending");
        } else {
            error!("no live slots and incomplete stories remain; session failed");
            self.set_phase(SchedulerPhase::Failed);
        }
    }

    async fn slot_story_counts(&self, number: SlotNumber) -> (usize, usize) {
        let Some(slot) = self.slots.get(&number) else {
            return (0, 0);
        };
        let total = slot.assignment.stories.len();
        match self.deps.store.read().await {
            Ok(doc) => {
                let complete = slot
                    .assignment
                    .stories
                    .iter()
                    .filter(|id| {
                        doc.stories
                            .get(*id)
                            .is_some_and(|t| t.status == StoryStatus::Complete)
                    })
                    .count();
                (complete, total)
            }
            Err(_) => (0, total),
        }
    }

    // -- launching ----------------------------------------------------------

    async fn launch_layer(&mut self, layer_index: usize) {
        let Some(layer) = self.layers.get(layer_index) else {
            return;
        };
        let layer_stories: HashSet<StoryId> = layer.iter().cloned().collect();

        let candidates: Vec<SlotNumber> = self
            .slots
            .values()
            .filter(|slot| {
                slot.assignment
                    .stories
                    .iter()
                    .any(|id| layer_stories.contains(id))
            })
            .filter(|slot| {
                !matches!(
                    slot.lifecycle,
                    SlotLifecycle::Running | SlotLifecycle::Completed
                )
            })
            .map(|slot| slot.assignment.slot)
            .collect();

        info!(
            layer = layer_index,
            slots = candidates.len(),
            "launching layer"
        );

        for number in candidates {
            if let Some(slot) = self.slots.get_mut(&number) {
                slot.lifecycle = SlotLifecycle::Launching;
                let _ = self
                    .deps
                    .events
                    .send(OrchestratorEvent::SlotUpdated(slot.info()));
            }

            match self.launch_slot(number).await {
                Ok(pid) => {
                    if let Some(slot) = self.slots.get_mut(&number) {
                        slot.process = Some(pid);
                        slot.lifecycle = SlotLifecycle::Running;
                        let _ = self
                            .deps
                            .events
                            .send(OrchestratorEvent::SlotUpdated(slot.info()));
                    }
                }
                Err(e) => {
                    error!(slot = %number, "launch failed: {e}");
                    if let Some(slot) = self.slots.get_mut(&number) {
                        slot.lifecycle = SlotLifecycle::Failed;
                        let _ = self
                            .deps
                            .events
                            .send(OrchestratorEvent::SlotUpdated(slot.info()));
                    }
                    self.emit_error(&e);
                }
            }
        }

        self.emit_progress(&format!("layer {layer_index} launched"))
            .await;
    }

    async fn launch_slot(&mut self, number: SlotNumber) -> Result<ProcessId, DispatchError> {
        let (assignment, path) = {
            let slot = self
                .slots
                .get(&number)
                .ok_or(DispatchError::UnknownSession {
                    id: format!("slot {number}"),
                })?;
            let path = slot.path.clone().ok_or_else(|| {
                DispatchError::Provision(
                    crate::provision::ProvisionError::WorkingCopyValidationFailed {
                        path: self.worktrees_root().join(slot.assignment.worktree_dir_name()),
                    },
                )
            })?;
            (slot.assignment.clone(), path)
        };

        let status_file = self.deps.store.path().to_path_buf();

        // Brief and PRD are idempotently rewritten so a relaunched slot sees
        // current instructions; progress.txt is preserved.
        let files = self.slot_files(&assignment, &status_file);
        let provisioner = SlotProvisioner::new(&self.deps.repo, self.worktrees_root());
        provisioner.write_slot_files(&path, &files);
        provisioner.ensure_ignored(&path).await;

        let script = resolve_loop_script(&assignment.agent, self.deps.repo.root()).ok_or_else(
            || {
                DispatchError::Supervisor(crate::pty::SupervisorError::ExecutableNotFound {
                    executable: PathBuf::from(script_file_name(&assignment.agent)),
                })
            },
        )?;

        let mut env: Vec<(String, String)> = std::env::vars().collect();
        env.extend([
            (
                "CROSSROADS_SESSION_ID".to_owned(),
                self.session_id.to_string(),
            ),
            (
                "CROSSROADS_AGENT_TYPE".to_owned(),
                assignment.agent.to_string(),
            ),
            (
                "CROSSROADS_BRANCH".to_owned(),
                assignment.branch_name().to_string(),
            ),
            (
                "CROSSROADS_ACTION_TYPE".to_owned(),
                assignment.action.to_string(),
            ),
            (
                "CROSSROADS_ASSIGNED_STORIES".to_owned(),
                assignment.stories_csv(),
            ),
            (
                "CROSSROADS_LOADED_SKILLS".to_owned(),
                skills_for_action(&assignment.action).join(","),
            ),
            ("CROSSROADS_SLOT".to_owned(), number.to_string()),
            (
                "CROSSROADS_WORKTREE".to_owned(),
                path.to_string_lossy().into_owned(),
            ),
            (
                "CROSSROADS_REPO".to_owned(),
                self.deps.repo.root().to_string_lossy().into_owned(),
            ),
            (
                "CROSSROADS_STATUS_FILE".to_owned(),
                status_file.to_string_lossy().into_owned(),
            ),
        ]);

        let spec = LaunchSpec {
            executable: script,
            args: vec![
                self.deps.config.dispatch.max_iterations.to_string(),
                self.deps.config.dispatch.sleep_seconds.to_string(),
            ],
            cwd: path,
            env,
        };

        let events = self.deps.events.clone();
        let inbox = self.inbox_tx.clone();
        let pid = self.deps.supervisor.launch(
            &spec,
            Box::new(move |chunk| {
                let _ = events.send(OrchestratorEvent::SlotOutput {
                    slot: number,
                    chunk,
                });
            }),
            Box::new(move |exit_code| {
                let _ = inbox.send(SchedulerEvent::SlotTerminated {
                    slot: number,
                    exit_code,
                });
            }),
        )?;
        Ok(pid)
    }

    // -- plumbing -----------------------------------------------------------

    fn set_phase(&mut self, phase: SchedulerPhase) {
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        let _ = self.phase_tx.send(phase);
        let _ = self
            .deps
            .events
            .send(OrchestratorEvent::PhaseChanged(phase));
    }

    fn emit_error(&self, e: &DispatchError) {
        let _ = self.deps.events.send(OrchestratorEvent::Error {
            kind: e.kind().to_owned(),
            message: e.to_string(),
        });
    }

    async fn emit_progress(&self, message: &str) {
        let (stories_complete, total_stories) = match self.deps.store.read().await {
            Ok(doc) => (
                doc.complete_stories().len(),
                doc.stories.len(),
            ),
            Err(_) => (0, self.prd.stories.len()),
        };
        let slots_launched = self
            .slots
            .values()
            .filter(|s| {
                matches!(
                    s.lifecycle,
                    SlotLifecycle::Running | SlotLifecycle::Completed
                )
            })
            .count();
        let _ = self
            .deps
            .events
            .send(OrchestratorEvent::Progress(ProgressSnapshot {
                current_layer: self.current_layer,
                total_layers: self.layers.len(),
                slots_launched,
                total_slots: self.slots.len(),
                stories_complete,
                total_stories,
                message: message.to_owned(),
            }));
    }

    fn shut_down(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// BoundedSeen
// ---------------------------------------------------------------------------

/// Insertion-ordered set with a capacity bound; the oldest entry is evicted
/// when full. Keeps watcher memory flat over arbitrarily long sessions.
struct BoundedSeen {
    set: HashSet<StoryId>,
    order: VecDeque<StoryId>,
    cap: usize,
}

impl BoundedSeen {
    fn new(cap: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// Insert; returns `true` when the id was not present.
    fn insert(&mut self, id: StoryId) -> bool {
        if self.set.contains(&id) {
            return false;
        }
        if self.order.len() >= self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        self.set.insert(id.clone());
        self.order.push_back(id);
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
