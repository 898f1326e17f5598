//! Pseudo-terminal process supervisor.
//!
//! The coding-assistant CLIs refuse to start (or buffer all output) without
//! a controlling terminal, so plain pipes are not an option. The supervisor
//! allocates a PTY pair per process, binds the child's standard streams to
//! the slave side, and reads the master side on a dedicated blocking thread.
//!
//! Ordering contract, per process:
//! - output callbacks fire in the exact byte order the child produced,
//!   delivered by a single consumer task;
//! - the terminate callback fires exactly once, strictly after the last
//!   output callback has returned.
//!
//! Callbacks for distinct processes are independent and may interleave.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Default grace period between the termination signal and the hard kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Terminal geometry presented to children. Wide enough that agent CLIs
/// don't wrap their own status lines into noise.
const PTY_ROWS: u16 = 30;
const PTY_COLS: u16 = 120;

/// Opaque process identifier, unique within one supervisor.
pub type ProcessId = u64;

/// Ordered per-process output sink.
pub type OutputCallback = Box<dyn FnMut(String) + Send>;

/// Exactly-once termination notification with the exit code.
pub type TerminateCallback = Box<dyn FnOnce(i32) + Send>;

// ---------------------------------------------------------------------------
// SupervisorError
// ---------------------------------------------------------------------------

/// Errors from the PTY supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    /// The executable was not found (neither as a path nor on `PATH`).
    ExecutableNotFound { executable: PathBuf },
    /// The requested working directory does not exist.
    WorkingDirectoryNotFound { cwd: PathBuf },
    /// The PTY or the child process could not be created.
    LaunchFailed { reason: String },
    /// No process with this id is registered.
    ProcessNotFound { id: ProcessId },
    /// The process has already terminated.
    AlreadyTerminated { id: ProcessId },
    /// Input could not be queued for the process.
    WriteFailed { id: ProcessId, detail: String },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExecutableNotFound { executable } => {
                write!(f, "executable '{}' not found", executable.display())
            }
            Self::WorkingDirectoryNotFound { cwd } => {
                write!(f, "working directory '{}' does not exist", cwd.display())
            }
            Self::LaunchFailed { reason } => write!(f, "launch failed: {reason}"),
            Self::ProcessNotFound { id } => write!(f, "no process with id {id}"),
            Self::AlreadyTerminated { id } => {
                write!(f, "process {id} has already terminated")
            }
            Self::WriteFailed { id, detail } => {
                write!(f, "failed to write to process {id}: {detail}")
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

// ---------------------------------------------------------------------------
// LaunchSpec
// ---------------------------------------------------------------------------

/// Everything needed to launch one supervised process.
///
/// `env` is applied wholesale: the child sees exactly these variables and
/// nothing inherited. Callers merge the parent environment themselves.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// PtySupervisor
// ---------------------------------------------------------------------------

struct ProcessEntry {
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    master: StdMutex<Option<Box<dyn MasterPty + Send>>>,
    pid: Option<u32>,
    alive: Arc<AtomicBool>,
}

struct SupervisorInner {
    next_id: AtomicU64,
    table: StdMutex<HashMap<ProcessId, Arc<ProcessEntry>>>,
    grace: Duration,
}

/// Launches and tracks PTY-attached child processes.
///
/// Cheap to clone; clones share the process table.
#[derive(Clone)]
pub struct PtySupervisor {
    inner: Arc<SupervisorInner>,
}

impl Default for PtySupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl PtySupervisor {
    /// Create a supervisor with the given kill-escalation grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                next_id: AtomicU64::new(1),
                table: StdMutex::new(HashMap::new()),
                grace,
            }),
        }
    }

    /// Launch `spec` on a fresh PTY.
    ///
    /// `on_output` receives each burst of child output (UTF-8, lossy) in
    /// order; `on_terminate` fires exactly once after the last output
    /// callback, with the exit code (`-1` when the code is unknown).
    pub fn launch(
        &self,
        spec: &LaunchSpec,
        on_output: OutputCallback,
        on_terminate: TerminateCallback,
    ) -> Result<ProcessId, SupervisorError> {
        if !spec.cwd.is_dir() {
            return Err(SupervisorError::WorkingDirectoryNotFound {
                cwd: spec.cwd.clone(),
            });
        }
        // Resolution honours the PATH the child will actually see; later
        // entries override earlier ones, so take the last.
        let path_var = spec
            .env
            .iter()
            .rev()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| value.as_str());
        let executable = resolve_executable(&spec.executable, path_var).ok_or_else(|| {
            SupervisorError::ExecutableNotFound {
                executable: spec.executable.clone(),
            }
        })?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SupervisorError::LaunchFailed {
                reason: format!("openpty: {e}"),
            })?;

        let mut builder = CommandBuilder::new(&executable);
        for arg in &spec.args {
            builder.arg(arg);
        }
        builder.cwd(&spec.cwd);
        builder.env_clear();
        for (key, value) in &spec.env {
            builder.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| SupervisorError::LaunchFailed {
                reason: format!("spawn '{}': {e}", executable.display()),
            })?;
        // The supervisor only talks to the master side from here on. The
        // slave must be dropped so the reader sees EOF when the child exits.
        drop(pair.slave);

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let pid = child.process_id();
        let killer = child.clone_killer();
        let alive = Arc::new(AtomicBool::new(true));

        let mut reader =
            pair.master
                .try_clone_reader()
                .map_err(|e| SupervisorError::LaunchFailed {
                    reason: format!("clone pty reader: {e}"),
                })?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SupervisorError::LaunchFailed {
                reason: format!("take pty writer: {e}"),
            })?;

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(256);
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let entry = Arc::new(ProcessEntry {
            writer_tx,
            killer: StdMutex::new(Some(killer)),
            master: StdMutex::new(Some(pair.master)),
            pid,
            alive: Arc::clone(&alive),
        });
        if let Ok(mut table) = self.inner.table.lock() {
            table.insert(id, Arc::clone(&entry));
        }

        // Reader: drain the PTY master, forward bursts in order.
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });

        // Writer: apply queued input to the master side.
        tokio::task::spawn_blocking(move || {
            while let Some(bytes) = writer_rx.blocking_recv() {
                if writer.write_all(&bytes).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        // Wait: reap the child, publish the exit code, then drop the master
        // so a reader blocked on a lingering descendant's fd unblocks.
        let wait_entry = Arc::clone(&entry);
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).unwrap_or(-1),
                Err(_) => -1,
            };
            let _ = exit_tx.send(code);
            std::thread::sleep(Duration::from_millis(100));
            if let Ok(mut master) = wait_entry.master.lock() {
                drop(master.take());
            }
        });

        // Delivery: the single consumer that owns callback ordering.
        let inner = Arc::clone(&self.inner);
        let delivery_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            let mut on_output = on_output;
            while let Some(chunk) = output_rx.recv().await {
                on_output(String::from_utf8_lossy(&chunk).into_owned());
            }
            let code = exit_rx.await.unwrap_or(-1);
            delivery_alive.store(false, Ordering::SeqCst);
            if let Ok(mut table) = inner.table.lock() {
                table.remove(&id);
            }
            debug!(process = id, exit_code = code, "process terminated");
            on_terminate(code);
        });

        debug!(process = id, executable = %executable.display(), "launched");
        Ok(id)
    }

    /// Write `text` to the process's terminal, appending `\n` if absent.
    pub async fn send_input(&self, id: ProcessId, text: &str) -> Result<(), SupervisorError> {
        let entry = self.entry(id)?;
        if !entry.alive.load(Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyTerminated { id });
        }
        let mut bytes = text.as_bytes().to_vec();
        if !text.ends_with('\n') {
            bytes.push(b'\n');
        }
        entry
            .writer_tx
            .send(bytes)
            .await
            .map_err(|e| SupervisorError::WriteFailed {
                id,
                detail: e.to_string(),
            })
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_running(&self, id: ProcessId) -> bool {
        self.inner
            .table
            .lock()
            .ok()
            .and_then(|t| t.get(&id).map(|e| e.alive.load(Ordering::SeqCst)))
            .unwrap_or(false)
    }

    /// Ids of all live processes.
    #[must_use]
    pub fn running_processes(&self) -> Vec<ProcessId> {
        self.inner
            .table
            .lock()
            .map(|t| {
                let mut ids: Vec<ProcessId> = t
                    .iter()
                    .filter(|(_, e)| e.alive.load(Ordering::SeqCst))
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                ids
            })
            .unwrap_or_default()
    }

    /// Terminate a process: close the master, send SIGTERM, and escalate to
    /// an unconditional kill after the grace period. Idempotent; terminating
    /// an unknown or already-dead process is a no-op.
    pub fn terminate(&self, id: ProcessId) {
        let Ok(entry) = self.entry(id) else {
            return;
        };

        // Closing the master makes the child's next terminal write fail.
        if let Ok(mut master) = entry.master.lock() {
            drop(master.take());
        }

        if let Some(pid) = entry.pid {
            let target = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap_or(0));
            if let Err(e) = nix::sys::signal::kill(target, nix::sys::signal::Signal::SIGTERM) {
                debug!(process = id, "SIGTERM failed (already gone?): {e}");
            }
        }

        let grace = self.inner.grace;
        let alive = Arc::clone(&entry.alive);
        let entry_for_kill = Arc::clone(&entry);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if alive.load(Ordering::SeqCst) {
                warn!(process = id, "grace period expired, killing");
                let killer = entry_for_kill
                    .killer
                    .lock()
                    .ok()
                    .and_then(|mut k| k.take());
                if let Some(mut killer) = killer {
                    let _ = killer.kill();
                }
            }
        });
    }

    /// Terminate every live process.
    pub fn terminate_all(&self) {
        for id in self.running_processes() {
            self.terminate(id);
        }
    }

    fn entry(&self, id: ProcessId) -> Result<Arc<ProcessEntry>, SupervisorError> {
        self.inner
            .table
            .lock()
            .ok()
            .and_then(|t| t.get(&id).cloned())
            .ok_or(SupervisorError::ProcessNotFound { id })
    }
}

// ---------------------------------------------------------------------------
// Executable resolution
// ---------------------------------------------------------------------------

/// Resolve an executable: a path containing a separator must exist as given;
/// a bare name is searched on `path_var` (falling back to the process PATH).
#[must_use]
pub fn resolve_executable(executable: &Path, path_var: Option<&str>) -> Option<PathBuf> {
    if executable.components().count() > 1 {
        return executable.is_file().then(|| executable.to_path_buf());
    }
    let search = match path_var {
        Some(value) => std::ffi::OsString::from(value),
        None => std::env::var_os("PATH")?,
    };
    std::env::split_paths(&search)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sh_spec(dir: &Path, script: &str) -> LaunchSpec {
        LaunchSpec {
            executable: PathBuf::from("sh"),
            args: vec!["-c".to_owned(), script.to_owned()],
            cwd: dir.to_path_buf(),
            env: std::env::vars().collect(),
        }
    }

    /// Collects output chunks and the exit code for assertions.
    struct Capture {
        output: Arc<Mutex<String>>,
        exit: oneshot::Receiver<i32>,
    }

    fn capture(supervisor: &PtySupervisor, spec: &LaunchSpec) -> (ProcessId, Capture) {
        let output = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&output);
        let (exit_tx, exit_rx) = oneshot::channel();
        let id = supervisor
            .launch(
                spec,
                Box::new(move |chunk| {
                    if let Ok(mut buf) = sink.lock() {
                        buf.push_str(&chunk);
                    }
                }),
                Box::new(move |code| {
                    let _ = exit_tx.send(code);
                }),
            )
            .expect("launch");
        (
            id,
            Capture {
                output,
                exit: exit_rx,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn output_arrives_in_order_and_terminate_is_last() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let supervisor = PtySupervisor::default();
        let (id, cap) = capture(
            &supervisor,
            &sh_spec(tmp.path(), "printf one; printf two; printf three; exit 7"),
        );

        let code = tokio::time::timeout(Duration::from_secs(10), cap.exit)
            .await
            .expect("terminate callback fired")
            .expect("exit code delivered");
        assert_eq!(code, 7);
        // Terminate ran after the last output callback, so the buffer is final.
        let output = cap.output.lock().expect("lock").clone();
        assert!(output.contains("onetwothree"), "got: {output:?}");
        assert!(!supervisor.is_running(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn send_input_reaches_the_child() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let supervisor = PtySupervisor::default();
        let (id, cap) = capture(
            &supervisor,
            &sh_spec(tmp.path(), "read line; printf 'got:%s' \"$line\"; exit 0"),
        );

        // Give the shell a beat to reach `read`.
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.send_input(id, "hello").await.expect("send");

        let code = tokio::time::timeout(Duration::from_secs(10), cap.exit)
            .await
            .expect("terminated")
            .expect("code");
        assert_eq!(code, 0);
        let output = cap.output.lock().expect("lock").clone();
        assert!(output.contains("got:hello"), "got: {output:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn terminate_escalates_within_grace() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let supervisor = PtySupervisor::new(Duration::from_millis(500));
        let (id, cap) = capture(&supervisor, &sh_spec(tmp.path(), "sleep 60"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(supervisor.is_running(id));
        supervisor.terminate(id);

        let code = tokio::time::timeout(Duration::from_secs(10), cap.exit)
            .await
            .expect("terminated")
            .expect("code");
        assert_ne!(code, 0);
        assert!(!supervisor.is_running(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn missing_executable_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let supervisor = PtySupervisor::default();
        let spec = LaunchSpec {
            executable: PathBuf::from("definitely-not-a-real-binary-4729"),
            args: vec![],
            cwd: tmp.path().to_path_buf(),
            env: vec![],
        };
        let err = supervisor
            .launch(&spec, Box::new(|_| {}), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::ExecutableNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn missing_cwd_is_reported() {
        let supervisor = PtySupervisor::default();
        let spec = LaunchSpec {
            executable: PathBuf::from("sh"),
            args: vec![],
            cwd: PathBuf::from("/no/such/cwd"),
            env: vec![],
        };
        let err = supervisor
            .launch(&spec, Box::new(|_| {}), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::WorkingDirectoryNotFound { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn input_to_unknown_process_fails() {
        let supervisor = PtySupervisor::default();
        let err = supervisor.send_input(999, "hi").await.unwrap_err();
        assert!(matches!(err, SupervisorError::ProcessNotFound { id: 999 }));
    }

    #[test]
    fn resolve_finds_sh_on_path() {
        assert!(resolve_executable(Path::new("sh"), None).is_some());
    }

    #[test]
    fn resolve_rejects_missing_relative_path() {
        assert!(resolve_executable(Path::new("./no/such/script.sh"), None).is_none());
    }

    #[test]
    fn resolve_honours_explicit_path_var() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let exe = tmp.path().join("mytool");
        std::fs::write(&exe, "#!/bin/sh\n").expect("write");
        let path_var = tmp.path().to_string_lossy().into_owned();
        assert_eq!(
            resolve_executable(Path::new("mytool"), Some(&path_var)),
            Some(exe)
        );
        assert!(resolve_executable(Path::new("mytool"), Some("/nonexistent")).is_none());
    }
}
