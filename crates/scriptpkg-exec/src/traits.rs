//! Executor traits

use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::request::{ExecutionRequest, Program};
use crate::result::ExecutionResult;

/// Runs one program to completion and returns its standard output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program`, writing `input` to its standard input
    ///
    /// A non-zero exit is reported as `ExecError::CommandFailed`.
    async fn run(&self, program: &Program, input: &[u8]) -> Result<Vec<u8>, ExecError>;

    fn runner_type(&self) -> &'static str;
}

/// Copies a local file onto the host a runner targets
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Returns the number of bytes written
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, ExecError>;
}

/// A runner able to receive files, i.e. a remote host
pub trait RemoteTarget: CommandRunner + FileTransfer {
    /// Host name for messages
    fn host(&self) -> &str;
}

/// Entry point used by resource lifecycle hosts
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run_script(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError>;
}
