//! Unified dispatch error type.
//!
//! Each component surfaces its own typed error; [`DispatchError`] wraps them
//! for the facade, carrying a machine-readable kind tag (used in the event
//! stream's `error(reason)` payload) next to the human-readable message.

use std::fmt;

use crate::config::ConfigError;
use crate::git::GitError;
use crate::model::{LayerError, PrdError, StoryId};
use crate::provision::ProvisionError;
use crate::pty::SupervisorError;
use crate::status::StoreError;

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Anything that can stop a dispatch.
#[derive(Debug)]
pub enum DispatchError {
    /// The PRD failed referential validation.
    Prd(PrdError),
    /// The prerequisite graph is cyclic.
    Layer(LayerError),
    /// A story is not owned by any slot. Fatal before launch.
    NoSlotForStory { story: StoryId },
    /// Two assignments claim the same slot number. Fatal before launch.
    DuplicateSlot { slot: u8 },
    /// The repository could not be opened or operated on.
    Git(GitError),
    /// Slot provisioning failed.
    Provision(ProvisionError),
    /// The PTY supervisor failed.
    Supervisor(SupervisorError),
    /// The status store failed.
    Store(StoreError),
    /// Configuration could not be loaded.
    Config(ConfigError),
    /// The request referenced an unknown session.
    UnknownSession { id: String },
    /// The request is malformed for its mode.
    InvalidRequest { message: String },
}

impl DispatchError {
    /// Machine-readable kind tag for the event stream.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prd(_) => "InvalidPrd",
            Self::Layer(_) | Self::Store(StoreError::CyclicPrerequisites(_)) => {
                "CyclicPrerequisites"
            }
            Self::NoSlotForStory { .. } => "NoSlotForStory",
            Self::DuplicateSlot { .. } => "DuplicateSlot",
            Self::Git(GitError::NotARepository { .. } | GitError::PathNotFound { .. }) => {
                "RepositoryMissing"
            }
            Self::Git(_) => "CommandFailed",
            Self::Provision(ProvisionError::WorkingCopyValidationFailed { .. }) => {
                "WorkingCopyValidationFailed"
            }
            Self::Provision(_) => "WorkingCopyCreateFailed",
            Self::Supervisor(SupervisorError::ExecutableNotFound { .. }) => "ExecutableNotFound",
            Self::Supervisor(
                SupervisorError::AlreadyTerminated { .. } | SupervisorError::WriteFailed { .. },
            ) => "WriteToTerminatedProcess",
            Self::Supervisor(_) => "LaunchFailed",
            Self::Store(StoreError::Decode { .. }) => "DecodeError",
            Self::Store(_) => "IOError",
            Self::Config(_) => "ConfigError",
            Self::UnknownSession { .. } => "UnknownSession",
            Self::InvalidRequest { .. } => "InvalidRequest",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prd(e) => write!(f, "{e}"),
            Self::Layer(e) => write!(f, "{e}"),
            Self::NoSlotForStory { story } => {
                write!(
                    f,
                    "story '{story}' is not assigned to any slot; every story needs an owner"
                )
            }
            Self::DuplicateSlot { slot } => {
                write!(f, "slot {slot} appears in more than one assignment")
            }
            Self::Git(e) => write!(f, "{e}"),
            Self::Provision(e) => write!(f, "{e}"),
            Self::Supervisor(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::UnknownSession { id } => write!(f, "no session with id '{id}'"),
            Self::InvalidRequest { message } => write!(f, "invalid request: {message}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Prd(e) => Some(e),
            Self::Layer(e) => Some(e),
            Self::Git(e) => Some(e),
            Self::Provision(e) => Some(e),
            Self::Supervisor(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::NoSlotForStory { .. }
            | Self::DuplicateSlot { .. }
            | Self::UnknownSession { .. }
            | Self::InvalidRequest { .. } => None,
        }
    }
}

impl From<PrdError> for DispatchError {
    fn from(e: PrdError) -> Self {
        Self::Prd(e)
    }
}

impl From<LayerError> for DispatchError {
    fn from(e: LayerError) -> Self {
        Self::Layer(e)
    }
}

impl From<GitError> for DispatchError {
    fn from(e: GitError) -> Self {
        Self::Git(e)
    }
}

impl From<ProvisionError> for DispatchError {
    fn from(e: ProvisionError) -> Self {
        Self::Provision(e)
    }
}

impl From<SupervisorError> for DispatchError {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ConfigError> for DispatchError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn kind_tags_match_taxonomy() {
        let not_repo = DispatchError::Git(GitError::NotARepository {
            path: PathBuf::from("/tmp/x"),
        });
        assert_eq!(not_repo.kind(), "RepositoryMissing");

        let exe = DispatchError::Supervisor(SupervisorError::ExecutableNotFound {
            executable: PathBuf::from("claude-loop.sh"),
        });
        assert_eq!(exe.kind(), "ExecutableNotFound");

        let decode = DispatchError::Store(StoreError::Decode {
            path: PathBuf::from("status.json"),
            detail: "eof".to_owned(),
        });
        assert_eq!(decode.kind(), "DecodeError");

        let no_slot = DispatchError::NoSlotForStory {
            story: StoryId::new("US-9").unwrap(),
        };
        assert_eq!(no_slot.kind(), "NoSlotForStory");

        let cyclic = DispatchError::Layer(LayerError::CyclicPrerequisites { remaining: vec![] });
        assert_eq!(cyclic.kind(), "CyclicPrerequisites");
    }

    #[test]
    fn display_passes_through_inner_messages() {
        let err = DispatchError::NoSlotForStory {
            story: StoryId::new("US-404").unwrap(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("US-404"));
        assert!(msg.contains("not assigned"));
    }
}
