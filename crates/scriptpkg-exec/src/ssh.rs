//! SSH command execution using russh crate
//!
//! Every call opens its own connection (directly or through a bastion), runs one
//! command or transfer, and closes the connection again before returning.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use tracing::{debug, error, info, instrument, warn};

use crate::bastion::{BastionRelay, connect_via_bastion};
use crate::config::{EngineConfig, HostKeyPolicy};
use crate::error::{ExecError, HostRole};
use crate::keepalive::{KeepAlive, KeepAliveTarget};
use crate::keys::{AuthMethod, ClientConfig};
use crate::request::{ConnectionDescriptor, Program};
use crate::sftp;
use crate::trace::Trace;
use crate::traits::{CommandRunner, FileTransfer, RemoteTarget};

/// SSH client handler for russh
#[derive(Debug)]
pub(crate) struct ClientHandler {
    role: HostRole,
    address: String,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub(crate) fn new(role: HostRole, address: String, policy: HostKeyPolicy) -> Self {
        Self {
            role,
            address,
            policy,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    role = %self.role,
                    host = %self.address,
                    %fingerprint,
                    "accepting host key without verification"
                );
                Ok(true)
            }
            policy if policy.accepts(&fingerprint) => Ok(true),
            HostKeyPolicy::Pinned { .. } => {
                error!(
                    role = %self.role,
                    host = %self.address,
                    %fingerprint,
                    "host key is not pinned, refusing connection"
                );
                Ok(false)
            }
        }
    }
}

pub(crate) fn transport_config() -> Arc<client::Config> {
    Arc::new(client::Config::default())
}

/// Authenticate an established transport
pub(crate) async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    config: &ClientConfig,
) -> Result<(), String> {
    let outcome = match &config.auth {
        AuthMethod::Password(password) => handle
            .authenticate_password(config.user.as_str(), password.as_str())
            .await
            .map_err(|e| e.to_string())?,
        AuthMethod::PublicKey(key) => {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            handle
                .authenticate_publickey(
                    config.user.as_str(),
                    PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                )
                .await
                .map_err(|e| e.to_string())?
        }
    };

    if outcome.success() {
        Ok(())
    } else {
        Err(format!("authentication rejected for user {}", config.user))
    }
}

/// An authenticated SSH connection to one host
pub struct SshClient {
    role: HostRole,
    address: String,
    handle: Arc<client::Handle<ClientHandler>>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("role", &self.role)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SshClient {
    pub(crate) fn new(role: HostRole, address: String, handle: client::Handle<ClientHandler>) -> Self {
        Self {
            role,
            address,
            handle: Arc::new(handle),
        }
    }

    /// Dial `descriptor` over TCP and authenticate with `config`
    ///
    /// # Errors
    /// Returns `ExecError::Connection` if the dial, handshake or authentication fails
    #[instrument(skip(descriptor, config, policy), fields(host = %descriptor.address()))]
    pub async fn connect(
        role: HostRole,
        descriptor: &ConnectionDescriptor,
        config: &ClientConfig,
        policy: &HostKeyPolicy,
    ) -> Result<Self, ExecError> {
        let address = descriptor.address();
        info!(%role, host = %address, user = %config.user, "connecting to SSH");

        let handler = ClientHandler::new(role, address.clone(), policy.clone());
        let mut handle = client::connect(
            transport_config(),
            (descriptor.host.as_str(), descriptor.port),
            handler,
        )
        .await
        .map_err(|e| ExecError::connection(role, &address, e))?;

        if let Err(reason) = authenticate(&mut handle, config).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(ExecError::connection(
                role,
                &address,
                format!("authentication failed: {reason}"),
            ));
        }

        info!(%role, host = %address, "SSH connected and authenticated");
        Ok(Self::new(role, address, handle))
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn role(&self) -> HostRole {
        self.role
    }

    pub(crate) fn handle(&self) -> &client::Handle<ClientHandler> {
        &self.handle
    }

    pub(crate) async fn open_channel(&self) -> Result<Channel<client::Msg>, russh::Error> {
        self.handle.channel_open_session().await
    }

    /// Keep-alive sender sharing this connection
    pub(crate) fn keepalive_target(&self) -> Arc<dyn KeepAliveTarget> {
        Arc::new(HandlePing {
            handle: Arc::clone(&self.handle),
        })
    }

    /// Disconnect, logging instead of failing
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(role = %self.role, host = %self.address, error = %e, "disconnect failed");
        } else {
            debug!(role = %self.role, host = %self.address, "SSH disconnected");
        }
    }
}

struct HandlePing {
    handle: Arc<client::Handle<ClientHandler>>,
}

#[async_trait]
impl KeepAliveTarget for HandlePing {
    async fn send_keepalive(&self) -> Result<(), ExecError> {
        self.handle
            .send_keepalive(true)
            .await
            .map_err(|e| ExecError::Internal(format!("keep-alive failed: {e}")))
    }
}

/// A connection ready for session creation, direct or relayed
#[derive(Debug)]
pub enum SshConnection {
    Direct(SshClient),
    Relayed(BastionRelay),
}

impl SshConnection {
    /// Client for the target host
    #[must_use]
    pub fn client(&self) -> &SshClient {
        match self {
            SshConnection::Direct(client) => client,
            SshConnection::Relayed(relay) => relay.target(),
        }
    }

    /// Release every resource held by the connection
    pub async fn close(self) {
        match self {
            SshConnection::Direct(client) => client.close().await,
            SshConnection::Relayed(relay) => relay.close().await,
        }
    }
}

/// Everything observed while a remote command ran
#[derive(Debug, Default)]
struct RemoteOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
}

/// Pick the detail text for a failed remote command
///
/// In order: stderr carried by an exit error, then any stderr that was
/// captured followed by the underlying error, then the underlying error alone.
pub(crate) fn failure_detail(
    exit_stderr: Option<&str>,
    stderr_pipe: Option<&[u8]>,
    cause: &str,
) -> String {
    if let Some(stderr) = exit_stderr.filter(|s| !s.trim().is_empty()) {
        return stderr.to_string();
    }

    if let Some(pipe) = stderr_pipe {
        let drained = String::from_utf8_lossy(pipe);
        let lines: Vec<&str> = drained.lines().collect();
        if !lines.is_empty() {
            return format!("{}\n{cause}", lines.join("\n"));
        }
    }

    cause.to_string()
}

/// SSH command executor
///
/// Credentials are resolved when the executor is built, so a missing or broken
/// credential is reported before any connection attempt.
pub struct SshExecutor {
    target: ConnectionDescriptor,
    target_config: ClientConfig,
    bastion: Option<(ConnectionDescriptor, ClientConfig)>,
    host_keys: HostKeyPolicy,
    keepalive_interval: Duration,
    trace: Trace,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("target", &self.target)
            .field("bastion", &self.bastion.as_ref().map(|(d, _)| d))
            .field("host_keys", &self.host_keys)
            .field("keepalive_interval", &self.keepalive_interval)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::Credential` if the target or bastion credentials are unusable
    pub fn new(
        target: ConnectionDescriptor,
        bastion: Option<ConnectionDescriptor>,
        settings: &EngineConfig,
        trace: Trace,
    ) -> Result<Self, ExecError> {
        let target_config = ClientConfig::from_descriptor(HostRole::Remote, &target)?;
        let bastion = bastion
            .map(|descriptor| {
                ClientConfig::from_descriptor(HostRole::Bastion, &descriptor)
                    .map(|config| (descriptor, config))
            })
            .transpose()?;

        Ok(Self {
            target,
            target_config,
            bastion,
            host_keys: settings.host_key_policy.clone(),
            keepalive_interval: settings.keepalive_interval(),
            trace,
        })
    }

    /// Get the target descriptor
    pub fn target(&self) -> &ConnectionDescriptor {
        &self.target
    }

    /// Connect to the target, through the bastion when one is configured
    ///
    /// # Errors
    /// Returns `ExecError::Connection` naming the host that could not be reached
    pub async fn connect(&self) -> Result<SshConnection, ExecError> {
        match &self.bastion {
            Some((bastion, bastion_config)) => {
                self.trace.message(format_args!(
                    "using bastion host {} to connect",
                    bastion.address()
                ));
                let relay = connect_via_bastion(
                    bastion,
                    bastion_config,
                    &self.target,
                    &self.target_config,
                    &self.host_keys,
                )
                .await?;
                Ok(SshConnection::Relayed(relay))
            }
            None => SshClient::connect(
                HostRole::Remote,
                &self.target,
                &self.target_config,
                &self.host_keys,
            )
            .await
            .map(SshConnection::Direct),
        }
    }

    /// Execute command on remote host
    #[instrument(skip_all, fields(host = %client.address(), program = %program.label()))]
    async fn execute_remote(
        &self,
        client: &SshClient,
        program: &Program,
        input: &[u8],
    ) -> Result<Vec<u8>, ExecError> {
        let start = Instant::now();
        self.trace.message(format_args!(
            "executing remote program {} on {}",
            program.redacted(),
            client.address()
        ));

        let failed = |detail: String| ExecError::CommandFailed {
            program: program.label().to_string(),
            detail,
        };

        let mut channel = client.open_channel().await.map_err(|e| {
            ExecError::connection(client.role(), client.address(), format!("error creating session: {e}"))
        })?;

        let keepalive = KeepAlive::spawn(client.keepalive_target(), self.keepalive_interval);
        let outcome = run_on_channel(&mut channel, program, input).await;
        let keepalives = keepalive.stop().await;

        let duration = start.elapsed();
        let output = match outcome {
            Ok(output) => output,
            Err((partial, e)) => {
                error!(error = %e, "remote session failed");
                return Err(ExecError::connection(
                    client.role(),
                    client.address(),
                    failure_detail(None, Some(&partial.stderr), &format!("session error: {e}")),
                ));
            }
        };

        debug!(
            status = ?output.exit_status,
            keepalives,
            duration = ?duration,
            "remote command completed"
        );

        match (output.exit_status, &output.exit_signal) {
            (Some(0), _) => Ok(output.stdout),
            // An exit status carries no stderr of its own, so the drained
            // pipe is reported ahead of the status.
            (Some(status), _) => Err(failed(failure_detail(
                None,
                Some(&output.stderr),
                &format!("Process exited with status {status}"),
            ))),
            (None, Some(signal)) => Err(failed(failure_detail(
                None,
                Some(&output.stderr),
                &format!("Process terminated by signal {signal}"),
            ))),
            (None, None) => Err(ExecError::connection(
                client.role(),
                client.address(),
                failure_detail(
                    None,
                    Some(&output.stderr),
                    "channel closed without an exit status",
                ),
            )),
        }
    }
}

/// Start the command, feed its input, and collect everything until the channel closes
async fn run_on_channel(
    channel: &mut Channel<client::Msg>,
    program: &Program,
    input: &[u8],
) -> Result<RemoteOutput, (RemoteOutput, russh::Error)> {
    let mut output = RemoteOutput::default();

    let command_line = program.command_line();
    if let Err(e) = channel.exec(true, command_line.as_str()).await {
        return Err((output, e));
    }
    if let Err(e) = channel.data(input).await {
        return Err((output, e));
    }
    if let Err(e) = channel.eof().await {
        return Err((output, e));
    }

    // ExitStatus may arrive before or after Eof; read until the channel closes.
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                output.stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
            ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            } => {
                output.exit_signal = Some(format!("{signal_name:?}: {error_message}"));
            }
            _ => {}
        }
    }

    Ok(output)
}

#[async_trait]
impl CommandRunner for SshExecutor {
    async fn run(&self, program: &Program, input: &[u8]) -> Result<Vec<u8>, ExecError> {
        let connection = self.connect().await?;
        let result = self.execute_remote(connection.client(), program, input).await;
        connection.close().await;
        result
    }

    fn runner_type(&self) -> &'static str {
        "ssh"
    }
}

#[async_trait]
impl FileTransfer for SshExecutor {
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, ExecError> {
        let connection = self.connect().await?;
        let result = sftp::upload(connection.client(), local, remote).await;
        connection.close().await;
        result
    }
}

impl RemoteTarget for SshExecutor {
    fn host(&self) -> &str {
        &self.target.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use tokio::net::TcpListener;

    #[test]
    fn test_failure_detail_prefers_exit_stderr() {
        let detail = failure_detail(Some("disk full\n"), None, "exec failed");
        assert_eq!(detail, "disk full\n");
    }

    #[test]
    fn test_failure_detail_keeps_exit_status_after_stderr() {
        let detail = failure_detail(None, Some(b"disk full\n"), "Process exited with status 3");
        assert_eq!(detail, "disk full\nProcess exited with status 3");
    }

    #[test]
    fn test_failure_detail_drains_pipe() {
        let detail = failure_detail(None, Some(b"line one\nline two\n"), "signal KILL");
        assert_eq!(detail, "line one\nline two\nsignal KILL");
    }

    #[test]
    fn test_failure_detail_falls_back_to_cause() {
        assert_eq!(failure_detail(None, None, "channel closed"), "channel closed");
        assert_eq!(
            failure_detail(Some("  "), Some(b""), "Process exited with status 2"),
            "Process exited with status 2"
        );
    }

    #[test]
    fn test_missing_credentials_detected_before_dial() {
        let target = ConnectionDescriptor::new("192.0.2.10").with_user("root");
        let err = SshExecutor::new(target, None, &EngineConfig::default(), Trace::default())
            .unwrap_err();

        assert!(matches!(
            err,
            ExecError::Credential {
                role: HostRole::Remote,
                reason: CredentialError::MissingCredential
            }
        ));
    }

    #[test]
    fn test_bastion_credentials_checked() {
        let target = ConnectionDescriptor::new("10.0.0.2")
            .with_user("root")
            .with_password("pw");
        let bastion = ConnectionDescriptor::new("jump").with_password("pw");
        let err = SshExecutor::new(target, Some(bastion), &EngineConfig::default(), Trace::default())
            .unwrap_err();

        assert!(matches!(
            err,
            ExecError::Credential {
                role: HostRole::Bastion,
                reason: CredentialError::MissingUser
            }
        ));
    }

    #[tokio::test]
    async fn test_direct_dial_failure_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ConnectionDescriptor::new("127.0.0.1")
            .with_port(port)
            .with_user("root")
            .with_password("pw");
        let executor =
            SshExecutor::new(target, None, &EngineConfig::default(), Trace::default()).unwrap();

        let err = executor
            .run(&Program::public(["true"]), b"")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Connection {
                role: HostRole::Remote,
                ..
            }
        ));
    }
}
