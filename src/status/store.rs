//! Status store: durable, two-writer-safe access to the status document.
//!
//! Both the orchestrator and the agent processes rewrite the document. The
//! only synchronisation available across arbitrary subprocesses is the
//! filesystem, so every writer follows the same discipline: serialise the
//! full document to a sibling temporary file, fsync, rename onto the target.
//! Readers never see a torn file outside the rename window; a decode failure
//! is treated as a transient torn read and retried once before surfacing.
//!
//! The orchestrator side adds a monotonic in-process cache: after each write
//! the written snapshot is retained, and reads consult the file's mtime to
//! decide whether a disk refresh is needed. Every mutation is read-modify-
//! write — the store never writes from a stale snapshot.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::document::StatusDocument;
use crate::model::{
    compute_layers, LayerError, Prd, SessionId, SlotNumber, StoryId, StoryStatus,
};

/// Delay before the single torn-read retry.
const TORN_READ_RETRY_DELAY_MS: u64 = 50;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors from the status store.
#[derive(Clone, Debug)]
pub enum StoreError {
    /// Filesystem failure reading or writing the document.
    Io { path: PathBuf, detail: String },
    /// The document on disk is not valid JSON (after the torn-read retry).
    Decode { path: PathBuf, detail: String },
    /// The PRD's prerequisite graph is cyclic.
    CyclicPrerequisites(LayerError),
    /// A story id was not found in the document.
    UnknownStory { id: StoryId },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, detail } => {
                write!(f, "status file I/O error at '{}': {detail}", path.display())
            }
            Self::Decode { path, detail } => {
                write!(
                    f,
                    "status file at '{}' is not valid JSON: {detail}",
                    path.display()
                )
            }
            Self::CyclicPrerequisites(inner) => write!(f, "{inner}"),
            Self::UnknownStory { id } => {
                write!(f, "story '{id}' is not in the status document")
            }
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

struct CacheState {
    snapshot: Option<StatusDocument>,
    /// Modification time of the file at the moment `snapshot` was taken.
    stamp: Option<SystemTime>,
}

/// Handle to the status document at a fixed path.
pub struct StatusStore {
    path: PathBuf,
    cache: Mutex<CacheState>,
}

impl StatusStore {
    /// Create a store for the document at `path`. Nothing is read or written
    /// until [`StatusStore::initialise`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(CacheState {
                snapshot: None,
                stamp: None,
            }),
        }
    }

    /// The document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compute layers and write the initial document, or adopt an existing
    /// valid document verbatim when `resume_if_exists` is set.
    pub async fn initialise(
        &self,
        session_id: SessionId,
        prd: &Prd,
        resume_if_exists: bool,
    ) -> Result<StatusDocument, StoreError> {
        let layers = compute_layers(prd).map_err(StoreError::CyclicPrerequisites)?;

        let mut cache = self.cache.lock().await;

        if resume_if_exists && self.path.exists() {
            match self.read_from_disk().await {
                Ok(existing) => {
                    debug!(path = %self.path.display(), "resuming existing status document");
                    cache.snapshot = Some(existing.clone());
                    cache.stamp = self.mtime();
                    return Ok(existing);
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        "existing status document unusable ({e}); reinitialising"
                    );
                }
            }
        }

        let doc = StatusDocument::initial(session_id, prd, layers, Utc::now());
        self.write_locked(&mut cache, &doc).await?;
        Ok(doc)
    }

    /// Current snapshot: cached if the file has not changed since, otherwise
    /// freshly decoded from disk.
    pub async fn read(&self) -> Result<StatusDocument, StoreError> {
        let mut cache = self.cache.lock().await;
        self.read_locked(&mut cache).await
    }

    /// Drop the cache and re-read from disk, then apply [`unblock`]: used by
    /// the scheduler after agents (external writers) modify the file, so a
    /// blocked child whose prerequisites just completed shows `ready` to the
    /// next agent that peeks.
    ///
    /// [`unblock`]: StatusDocument::unblock
    pub async fn refresh_and_unblock(&self) -> Result<Vec<StoryId>, StoreError> {
        let mut cache = self.cache.lock().await;
        cache.snapshot = None;
        cache.stamp = None;
        let mut doc = self.read_locked(&mut cache).await?;
        let changed = doc.unblock();
        if !changed.is_empty() {
            doc.touch(Utc::now());
            self.write_locked(&mut cache, &doc).await?;
        }
        Ok(changed)
    }

    /// Flip satisfied `blocked` stories to `ready`. Idempotent.
    pub async fn unblock(&self) -> Result<Vec<StoryId>, StoreError> {
        let mut cache = self.cache.lock().await;
        let mut doc = self.read_locked(&mut cache).await?;
        let changed = doc.unblock();
        if !changed.is_empty() {
            doc.touch(Utc::now());
            self.write_locked(&mut cache, &doc).await?;
        }
        Ok(changed)
    }

    /// Transition one story and run the unblock pass.
    pub async fn transition(
        &self,
        id: &StoryId,
        status: StoryStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut doc = self.read_locked(&mut cache).await?;
        let now = Utc::now();
        if !doc.transition(id, status, error, now) {
            return Err(StoreError::UnknownStory { id: id.clone() });
        }
        doc.unblock();
        doc.touch(now);
        self.write_locked(&mut cache, &doc).await
    }

    /// Record a slot assignment.
    pub async fn assign_slot(&self, id: &StoryId, slot: SlotNumber) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut doc = self.read_locked(&mut cache).await?;
        if !doc.assign_slot(id, slot) {
            return Err(StoreError::UnknownStory { id: id.clone() });
        }
        doc.touch(Utc::now());
        self.write_locked(&mut cache, &doc).await
    }

    /// Persist a new current-layer index.
    pub async fn set_current_layer(&self, layer: usize) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut doc = self.read_locked(&mut cache).await?;
        doc.current_layer = layer;
        doc.touch(Utc::now());
        self.write_locked(&mut cache, &doc).await
    }

    // -- convenience queries ------------------------------------------------

    /// Ids currently in `ready`.
    pub async fn ready_stories(&self) -> Result<Vec<StoryId>, StoreError> {
        Ok(self.read().await?.ready_stories())
    }

    /// Ids currently in `blocked`.
    pub async fn blocked_stories(&self) -> Result<Vec<StoryId>, StoreError> {
        Ok(self.read().await?.blocked_stories())
    }

    /// Whether every prerequisite of `id` is complete.
    pub async fn prerequisites_satisfied(&self, id: &StoryId) -> Result<bool, StoreError> {
        Ok(self.read().await?.prerequisites_satisfied(id))
    }

    /// Completed fraction, 0.0 to 1.0.
    pub async fn progress_ratio(&self) -> Result<f64, StoreError> {
        Ok(self.read().await?.progress_ratio())
    }

    // -- internals ----------------------------------------------------------

    async fn read_locked(
        &self,
        cache: &mut CacheState,
    ) -> Result<StatusDocument, StoreError> {
        let mtime = self.mtime();
        if let (Some(snapshot), Some(stamp), Some(current)) =
            (&cache.snapshot, cache.stamp, mtime)
        {
            if current <= stamp {
                return Ok(snapshot.clone());
            }
        }

        let doc = self.read_from_disk().await?;
        cache.snapshot = Some(doc.clone());
        cache.stamp = mtime;
        Ok(doc)
    }

    /// Read and decode from disk, retrying once after a short delay on a
    /// decode failure (torn read from a concurrent writer that does not
    /// follow the rename discipline). A persistent failure surfaces.
    async fn read_from_disk(&self) -> Result<StatusDocument, StoreError> {
        match self.decode_once() {
            Ok(doc) => Ok(doc),
            Err(e @ StoreError::Decode { .. }) => {
                debug!(path = %self.path.display(), "torn read ({e}); retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(TORN_READ_RETRY_DELAY_MS))
                    .await;
                self.decode_once()
            }
            Err(e) => Err(e),
        }
    }

    fn decode_once(&self) -> Result<StatusDocument, StoreError> {
        let bytes = std::fs::read(&self.path).map_err(|e| StoreError::Io {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    /// Write the document atomically: temp sibling + fsync + rename, then
    /// refresh the cache from the freshly renamed file.
    async fn write_locked(
        &self,
        cache: &mut CacheState,
        doc: &StatusDocument,
    ) -> Result<(), StoreError> {
        let json = doc.to_canonical_json().map_err(|e| StoreError::Decode {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        let io_err = |e: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            detail: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "status.json".to_owned());
        let tmp_path = self
            .path
            .with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));

        {
            use std::io::Write as _;
            let mut file = std::fs::File::create(&tmp_path).map_err(io_err)?;
            file.write_all(json.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        cache.snapshot = Some(doc.clone());
        cache.stamp = self.mtime();
        Ok(())
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::story::{Priority, Story};

    fn sid(s: &str) -> StoryId {
        StoryId::new(s).unwrap()
    }

    fn story(id: &str, deps: &[&str]) -> Story {
        Story {
            id: sid(id),
            title: id.to_owned(),
            description: String::new(),
            priority: Priority::Medium,
            complexity: 1,
            acceptance_criteria: vec![],
            depends_on: deps.iter().map(|d| sid(d)).collect(),
            status: StoryStatus::Pending,
        }
    }

    fn chain_prd() -> Prd {
        Prd {
            name: "chain".to_owned(),
            description: String::new(),
            author: String::new(),
            template: String::new(),
            stories: vec![story("US-1", &[]), story("US-2", &["US-1"])],
        }
    }

    fn store_in(dir: &Path) -> StatusStore {
        StatusStore::new(dir.join(".crossroads").join("status.json"))
    }

    #[tokio::test]
    async fn initialise_writes_valid_json() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let doc = store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();
        assert_eq!(doc.stories[&sid("US-1")].status, StoryStatus::Ready);
        assert_eq!(doc.stories[&sid("US-2")].status, StoryStatus::Blocked);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["prdName"], "chain");
        assert_eq!(parsed["currentLayer"], 0);
    }

    #[tokio::test]
    async fn initialise_rejects_cyclic_prd() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let prd = Prd {
            name: "cyclic".to_owned(),
            description: String::new(),
            author: String::new(),
            template: String::new(),
            stories: vec![story("A", &["B"]), story("B", &["A"])],
        };
        let err = store
            .initialise(SessionId::generate(), &prd, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CyclicPrerequisites(_)));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn resume_adopts_existing_document_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let prd = chain_prd();
        let first_session = SessionId::generate();
        let original = store.initialise(first_session, &prd, false).await.unwrap();
        let original_bytes = std::fs::read(store.path()).unwrap();

        // New store, new session id, resume: the old document survives.
        let store2 = store_in(tmp.path());
        let resumed = store2
            .initialise(SessionId::generate(), &prd, true)
            .await
            .unwrap();
        assert_eq!(resumed, original);
        assert_eq!(resumed.session_id, first_session);
        assert_eq!(std::fs::read(store2.path()).unwrap(), original_bytes);
    }

    #[tokio::test]
    async fn transition_and_unblock_flow() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();

        store
            .transition(&sid("US-1"), StoryStatus::InProgress, None)
            .await
            .unwrap();
        store
            .transition(&sid("US-1"), StoryStatus::Complete, None)
            .await
            .unwrap();

        // The transition's built-in unblock pass already flipped US-2.
        let doc = store.read().await.unwrap();
        assert_eq!(doc.stories[&sid("US-2")].status, StoryStatus::Ready);
        assert!(doc.stories[&sid("US-1")].started_at.is_some());
        assert!(doc.stories[&sid("US-1")].completed_at.is_some());
    }

    #[tokio::test]
    async fn transition_unknown_story_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();
        let err = store
            .transition(&sid("GHOST"), StoryStatus::Complete, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownStory { .. }));
    }

    #[tokio::test]
    async fn refresh_and_unblock_sees_external_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();

        // Simulate an agent's rename-based rewrite marking US-1 complete.
        let mut doc = store.read().await.unwrap();
        doc.transition(&sid("US-1"), StoryStatus::Complete, None, Utc::now());
        let tmp_file = store.path().with_extension("agent-tmp");
        std::fs::write(&tmp_file, doc.to_canonical_json().unwrap()).unwrap();
        std::fs::rename(&tmp_file, store.path()).unwrap();

        let changed = store.refresh_and_unblock().await.unwrap();
        assert_eq!(changed, vec![sid("US-2")]);
        assert_eq!(
            store.read().await.unwrap().stories[&sid("US-2")].status,
            StoryStatus::Ready
        );
    }

    #[tokio::test]
    async fn unblock_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();
        store
            .transition(&sid("US-1"), StoryStatus::Complete, None)
            .await
            .unwrap();
        assert!(store.unblock().await.unwrap().is_empty());
        assert!(store.unblock().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_garbage_surfaces_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();

        std::fs::write(store.path(), b"{ not json").unwrap();
        let err = store.refresh_and_unblock().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[tokio::test]
    async fn no_temp_residue_after_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();
        store
            .transition(&sid("US-1"), StoryStatus::Complete, None)
            .await
            .unwrap();

        let dir = store.path().parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn updated_at_never_regresses_across_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let initial = store
            .initialise(SessionId::generate(), &chain_prd(), false)
            .await
            .unwrap();
        store
            .transition(&sid("US-1"), StoryStatus::Complete, None)
            .await
            .unwrap();
        let after = store.read().await.unwrap();
        assert!(after.updated_at >= initial.updated_at);
    }
}
