//! Local command execution using `tokio::process`

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::request::Program;
use crate::trace::Trace;
use crate::traits::CommandRunner;

/// Local command executor
///
/// Spawns the first token directly (no shell) with the remaining tokens as
/// arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    trace: Trace,
}

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }

    #[instrument(skip_all, fields(program = %program.label()), level = "debug")]
    async fn execute(&self, program: &Program, input: &[u8]) -> Result<Vec<u8>, ExecError> {
        let tokens = program.tokens();
        let Some((executable, args)) = tokens.split_first() else {
            return Err(ExecError::invalid(
                "program",
                "program list must contain at least one element",
            ));
        };

        let start = Instant::now();
        self.trace
            .message(format_args!("executing local program {}", program.redacted()));

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ExecError::ProgramNotFound {
                    program: program.label().to_string(),
                },
                _ => ExecError::CommandFailed {
                    program: program.label().to_string(),
                    detail: e.to_string(),
                },
            })?;

        // Feed stdin from its own task so a chatty child cannot deadlock on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let input = input.to_vec();
            tokio::spawn(async move {
                match stdin.write_all(&input).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::CommandFailed {
                program: program.label().to_string(),
                detail: e.to_string(),
            })?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "failed writing program input"),
                Err(e) => debug!(error = %e, "stdin writer task failed"),
            }
        }

        let status = output.status.code().unwrap_or(-1);
        debug!(status, duration = ?start.elapsed(), "local program completed");

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(program = %program.label(), status, "local program failed");
        let detail = if stderr.trim().is_empty() {
            format!(
                "command {:?} failed with no error message (exit status {status})",
                program.label()
            )
        } else {
            stderr.into_owned()
        };

        Err(ExecError::CommandFailed {
            program: program.label().to_string(),
            detail,
        })
    }
}

#[async_trait]
impl CommandRunner for LocalExecutor {
    async fn run(&self, program: &Program, input: &[u8]) -> Result<Vec<u8>, ExecError> {
        self.execute(program, input).await
    }

    fn runner_type(&self) -> &'static str {
        "local"
    }
}
