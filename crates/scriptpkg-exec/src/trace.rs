//! Per-request trace switch
//!
//! Callers opt into verbose engine output per request. The switch is a plain
//! value handed to each component; it never touches subscriber configuration.

use std::fmt::Display;

use tracing::{debug, info};

/// Decides the level engine progress messages are emitted at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace {
    enabled: bool,
}

impl Trace {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Emit a progress message: `info` when tracing was requested, `debug` otherwise
    pub fn message(&self, msg: impl Display) {
        if self.enabled {
            info!(target: "scriptpkg::trace", "{msg}");
        } else {
            debug!(target: "scriptpkg::trace", "{msg}");
        }
    }
}
