// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Engine error type, classified into the domain-wide taxonomy.

use arena_proto::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Failure of a container, store, module, or command operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The addressed entity is not alive in the store.
    #[error("entity {0} not found")]
    EntityNotFound(u64),
    /// The permission table denied a cross-module component access.
    #[error("module `{module}` may not access component `{component}`")]
    PermissionDenied {
        /// Calling module name.
        module: String,
        /// Target component name.
        component: String,
    },
    /// The entity presence bitmap is full.
    #[error("entity capacity {0} exceeded")]
    CapacityExceeded(usize),
    /// The command queue is at its depth limit.
    #[error("command queue is full ({0} entries)")]
    QueueFull(usize),
    /// The addressed match does not exist in the container.
    #[error("match {0} not found")]
    MatchNotFound(u64),
    /// The addressed container does not exist on the node.
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    /// The addressed component is not registered.
    #[error("component `{0}` not found")]
    ComponentNotFound(String),
    /// A match references a module the container has not installed.
    #[error("module `{0}` is not installed")]
    ModuleNotInstalled(String),
    /// The module library has no factory for the identifier.
    #[error("module `{0}` is not registered")]
    ModuleUnknown(String),
    /// A module with the same name and version is already installed.
    #[error("module `{0}` is already installed")]
    AlreadyInstalled(String),
    /// A module identifier or declaration failed validation.
    #[error("invalid module spec: {0}")]
    InvalidSpec(String),
    /// A request parameter failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No command with the given name is installed.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// The container lifecycle state does not permit the operation.
    #[error("container is {0}")]
    InvalidState(&'static str),
    /// The container is shutting down; in-flight work is abandoned.
    #[error("container is stopping")]
    ContainerStopping,
    /// Invariant violation; indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classification into the wire taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EntityNotFound(_)
            | Self::MatchNotFound(_)
            | Self::ContainerNotFound(_)
            | Self::ComponentNotFound(_)
            | Self::ModuleNotInstalled(_)
            | Self::ModuleUnknown(_)
            | Self::UnknownCommand(_) => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::CapacityExceeded(_) | Self::QueueFull(_) => ErrorKind::CapacityExceeded,
            Self::AlreadyInstalled(_) => ErrorKind::AlreadyExists,
            Self::InvalidSpec(_) | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidState(_) => ErrorKind::Conflict,
            Self::ContainerStopping => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Converts to the wire error body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.to_string())
    }
}

/// Failure raised by a module system during a tick.
///
/// System failures are logged and attributed; they never abort the tick.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SystemError(pub String);

impl SystemError {
    /// Builds a system error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}
