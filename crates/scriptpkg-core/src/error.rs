//! Core error types for scriptpkg-core

use scriptpkg_exec::{ErrorKind, ExecError};
use thiserror::Error;

use crate::resource::LifecycleEvent;

/// Errors that can occur while applying a lifecycle event
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Staging, connection or script failure
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Event needs the state of an existing resource
    #[error("{event} requires existing resource state")]
    MissingState {
        /// Event that was applied
        event: LifecycleEvent,
    },

    /// State could not be read or written
    #[error("state error: {0}")]
    State(String),
}

impl CoreError {
    /// Classification of the underlying engine error, if any
    #[must_use]
    pub fn exec_kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::Exec(e) => Some(e.kind()),
            _ => None,
        }
    }
}
