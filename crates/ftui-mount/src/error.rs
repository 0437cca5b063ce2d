#![forbid(unsafe_code)]

//! Error types for mounting.

use std::fmt;

use ftui_lanes::{ConfinementError, ExecutorError};

use crate::descriptor::{ComponentKind, Tag};

/// Reasons a single mutation could not be applied.
///
/// These never abort a transaction; the offending mutation is logged,
/// counted, and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    /// The mutation refers to a tag with no instance.
    MissingInstance { tag: Tag },
    /// `Create` for a tag that already has an instance.
    DuplicateInstance { tag: Tag },
    /// The native host refused to build the node.
    ConstructionFailure {
        tag: Tag,
        kind: ComponentKind,
        reason: String,
    },
    /// `Update` changed the component kind of an existing instance.
    KindMismatch {
        tag: Tag,
        expected: ComponentKind,
        found: ComponentKind,
    },
    /// The requested tree edit would break the tree shape.
    TreeConflict {
        parent: Tag,
        child: Tag,
        reason: &'static str,
    },
}

impl MountError {
    /// Tag the error is about.
    pub fn tag(&self) -> Tag {
        match self {
            MountError::MissingInstance { tag }
            | MountError::DuplicateInstance { tag }
            | MountError::ConstructionFailure { tag, .. }
            | MountError::KindMismatch { tag, .. } => *tag,
            MountError::TreeConflict { child, .. } => *child,
        }
    }
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::MissingInstance { tag } => write!(f, "no instance for {tag}"),
            MountError::DuplicateInstance { tag } => write!(f, "instance {tag} already exists"),
            MountError::ConstructionFailure { tag, kind, reason } => {
                write!(f, "failed to construct {kind} for {tag}: {reason}")
            }
            MountError::KindMismatch {
                tag,
                expected,
                found,
            } => write!(f, "instance {tag} is {expected}, update describes {found}"),
            MountError::TreeConflict {
                parent,
                child,
                reason,
            } => write!(f, "cannot edit {child} under {parent}: {reason}"),
        }
    }
}

impl std::error::Error for MountError {}

/// Errors from session-level calls that cross lanes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The lane hop failed.
    Executor(ExecutorError),
    /// Mount state was unavailable on the UI lane.
    Confinement(ConfinementError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Executor(e) => write!(f, "executor error: {e}"),
            SessionError::Confinement(e) => write!(f, "confinement error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Executor(e) => Some(e),
            SessionError::Confinement(e) => Some(e),
        }
    }
}

impl From<ExecutorError> for SessionError {
    fn from(e: ExecutorError) -> Self {
        SessionError::Executor(e)
    }
}

impl From<ConfinementError> for SessionError {
    fn from(e: ConfinementError) -> Self {
        SessionError::Confinement(e)
    }
}
