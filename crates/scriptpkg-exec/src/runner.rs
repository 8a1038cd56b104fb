//! Top-level "run script" operation
//!
//! Stages the source, runs the program locally or over SSH with the parameter
//! object on standard input, and normalizes what it printed.

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::error::ExecError;
use crate::local::LocalExecutor;
use crate::request::ExecutionRequest;
use crate::result::{ExecutionResult, normalize};
use crate::ssh::SshExecutor;
use crate::stage::SourceStager;
use crate::trace::Trace;
use crate::traits::{CommandRunner, RemoteTarget, ScriptRunner};

/// Script engine bound to one set of engine settings
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine {
    config: EngineConfig,
}

impl ScriptEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run against explicit runners
    ///
    /// `remote` selects where the program runs; `local` is used for local
    /// execution and for downloads made on this machine.
    ///
    /// # Errors
    /// Returns the first staging, execution or output-contract error
    pub async fn run_with(
        request: &ExecutionRequest,
        local: &dyn CommandRunner,
        remote: Option<&dyn RemoteTarget>,
        trace: Trace,
    ) -> Result<ExecutionResult, ExecError> {
        SourceStager::new(local, trace)
            .stage(&request.source, remote)
            .await?;

        let input = request.parameters.to_json()?;
        let output = match remote {
            Some(remote) => remote.run(&request.program, &input).await?,
            None => local.run(&request.program, &input).await?,
        };

        normalize(&output, request.program.label())
    }
}

#[async_trait]
impl ScriptRunner for ScriptEngine {
    #[instrument(skip_all, fields(program = %request.program.label(), remote = request.remote.as_ref().map(|r| r.host.as_str())))]
    async fn run_script(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let trace = Trace::new(request.trace);
        let local = LocalExecutor::new(trace);

        let result = match &request.remote {
            Some(target) => {
                // Credentials are checked here, before staging touches the network.
                let ssh = SshExecutor::new(
                    target.clone(),
                    request.bastion.clone(),
                    &self.config,
                    trace,
                )?;
                Self::run_with(request, &local, Some(&ssh as &dyn RemoteTarget), trace).await?
            }
            None => Self::run_with(request, &local, None, trace).await?,
        };

        let shape = match &result {
            ExecutionResult::Pairs(_) => "pairs",
            ExecutionResult::Text(_) => "text",
        };
        info!(shape, "script completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CredentialError, ErrorKind, HostRole};
    use crate::request::RawRequest;
    use serde_json::json;

    fn request(raw: RawRequest) -> ExecutionRequest {
        ExecutionRequest::from_raw(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_local_json_result() {
        let req = request(RawRequest {
            program: vec![json!("echo"), json!(r#"{"status":"ok"}"#)],
            ..RawRequest::default()
        });

        let result = ScriptEngine::default().run_script(&req).await.unwrap();
        assert_eq!(result.get("status"), Some("ok"));
    }

    #[tokio::test]
    async fn test_parameters_reach_stdin() {
        let req = request(RawRequest {
            program: vec![json!("cat")],
            query: [("region".to_string(), json!("eu"))].into(),
            query_sensitive: [("token".to_string(), json!("abc"))].into(),
            ..RawRequest::default()
        });

        let result = ScriptEngine::default().run_script(&req).await.unwrap();
        assert_eq!(result.get("region"), Some("eu"));
        assert_eq!(result.get("token"), Some("abc"));
    }

    #[tokio::test]
    async fn test_missing_remote_credentials() {
        let req = request(RawRequest {
            program: vec![json!("true")],
            remote_host: Some("192.0.2.1".into()),
            remote_user: Some("root".into()),
            ..RawRequest::default()
        });

        let err = ScriptEngine::default().run_script(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
        assert!(matches!(
            err,
            ExecError::Credential {
                role: HostRole::Remote,
                reason: CredentialError::MissingCredential
            }
        ));
    }
}
