//! scriptpkg-exec: script staging and execution
//!
//! Runs a program once, locally or on a remote host over SSH (optionally through
//! a bastion), after staging its source, and returns its normalized output.

pub mod bastion;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod keys;
pub mod local;
pub mod request;
pub mod result;
pub mod runner;
pub mod sftp;
pub mod ssh;
pub mod stage;
pub mod trace;
pub mod traits;

pub use config::{EngineConfig, HostKeyPolicy};
pub use error::{ErrorKind, ExecError, HostRole};
pub use request::{ExecutionRequest, RawRequest};
pub use result::ExecutionResult;
pub use runner::ScriptEngine;
pub use stage::StagingPlan;
pub use trace::Trace;
pub use traits::{CommandRunner, ScriptRunner};
