//! Getting the script to the place it runs
//!
//! [`plan`] looks only at the request and the local filesystem and decides what
//! has to happen. [`SourceStager::stage`] carries the plan out, probing the
//! remote host for a download tool when the script is fetched there.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::request::{Program, SourceSpec};
use crate::trace::Trace;
use crate::traits::{CommandRunner, RemoteTarget};

/// Text wget prints when it refuses an unverifiable certificate
const CERT_HINT: &str = "no-check-certificate";

/// What staging has to do for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingPlan {
    /// Neither source nor destination given
    Skip,
    /// Source already sits at the destination on this machine
    LocalPresent { path: String },
    /// Download with local wget into a relative destination
    DownloadLocal { url: String, destination: String },
    /// Download onto the remote host, tool chosen by probing
    DownloadRemote { url: String, destination: String },
    /// Copy a local file to the remote host over SFTP
    TransferLocal { path: String, destination: String },
}

impl StagingPlan {
    /// Short name of the plan, free of URLs and paths
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StagingPlan::Skip => "skip",
            StagingPlan::LocalPresent { .. } => "local-present",
            StagingPlan::DownloadLocal { .. } => "download-local",
            StagingPlan::DownloadRemote { .. } => "download-remote",
            StagingPlan::TransferLocal { .. } => "transfer-local",
        }
    }
}

impl std::fmt::Display for StagingPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagingPlan::Skip => f.write_str("no staging"),
            StagingPlan::LocalPresent { path } => write!(f, "use local file {path}"),
            StagingPlan::DownloadLocal { url, destination } => {
                write!(f, "download {url} to local {destination}")
            }
            StagingPlan::DownloadRemote { url, destination } => {
                write!(f, "download {url} to remote {destination}")
            }
            StagingPlan::TransferLocal { path, destination } => {
                write!(f, "transfer local {path} to remote {destination}")
            }
        }
    }
}

/// Tool used for a remote download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFetch {
    Wget,
    Curl,
    /// Neither tool on the remote host: fetch here, then transfer
    LocalThenTransfer,
}

/// What staging actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staged {
    Nothing,
    AlreadyPresent,
    DownloadedLocally,
    DownloadedRemotely(RemoteFetch),
    Transferred { bytes: u64 },
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Decide how the source reaches its destination
///
/// # Errors
/// Returns `ExecError::Validation` for inconsistent or unsafe staging fields and
/// `ExecError::SourceNotFound` when a local source path does not exist
pub fn plan(source: &SourceSpec, has_remote: bool) -> Result<StagingPlan, ExecError> {
    let (uri, destination) = match (&source.uri, &source.destination) {
        (None, None) => return Ok(StagingPlan::Skip),
        (None, Some(_)) => {
            return Err(ExecError::invalid(
                "destination",
                "destination was specified, but not source",
            ));
        }
        (Some(_), None) => {
            return Err(ExecError::invalid(
                "destination",
                "source was specified, but not destination",
            ));
        }
        (Some(uri), Some(destination)) => (uri.clone(), destination.clone()),
    };

    if is_url(&uri) {
        if uri.contains(';') {
            return Err(ExecError::invalid(
                "source",
                "source contains illegal character ';'",
            ));
        }
        if uri.starts_with("https://") && (source.user.is_none() || source.password.is_none()) {
            return Err(ExecError::invalid(
                "source_user",
                "source_user and source_password are required when source is an https URL",
            ));
        }

        if has_remote {
            return Ok(StagingPlan::DownloadRemote {
                url: uri,
                destination,
            });
        }

        let trimmed = destination.trim();
        if trimmed.starts_with('/') || trimmed.starts_with('~') {
            return Err(ExecError::invalid(
                "destination",
                "destination must be a relative path when downloading locally",
            ));
        }
        if destination.contains("..") {
            return Err(ExecError::invalid(
                "destination",
                "destination cannot contain a reference to a parent directory",
            ));
        }
        return Ok(StagingPlan::DownloadLocal {
            url: uri,
            destination,
        });
    }

    if !Path::new(&uri).exists() {
        return Err(ExecError::SourceNotFound { path: uri });
    }

    if has_remote {
        Ok(StagingPlan::TransferLocal {
            path: uri,
            destination,
        })
    } else if Path::new(&uri) == Path::new(&destination) {
        Ok(StagingPlan::LocalPresent { path: uri })
    } else {
        Err(ExecError::invalid(
            "destination",
            "copying a local file to another local path is not supported",
        ))
    }
}

/// `wget` command line: `wget [--user U --password P [--no-check-certificate]] -O dest url`
///
/// Only `wget` itself is public; URL, paths and credentials stay out of logs.
#[must_use]
pub fn wget_command(source: &SourceSpec, url: &str, destination: &str) -> Program {
    let mut args = Vec::new();
    if !url.starts_with("http://") {
        args.push("--user".to_string());
        args.push(source.user.clone().unwrap_or_default());
        args.push("--password".to_string());
        args.push(source.password.as_deref().cloned().unwrap_or_default());
        if source.no_check_cert {
            args.push("--no-check-certificate".to_string());
        }
    }
    args.extend(["-O".to_string(), destination.to_string(), url.to_string()]);
    Program::new(vec!["wget".to_string()], args)
}

/// `curl` command line: `curl [-u U:P [-k]] -o dest url`
#[must_use]
pub fn curl_command(source: &SourceSpec, url: &str, destination: &str) -> Program {
    let mut args = Vec::new();
    if !url.starts_with("http://") {
        args.push("-u".to_string());
        args.push(format!(
            "{}:{}",
            source.user.as_deref().unwrap_or_default(),
            source.password.as_deref().map_or("", String::as_str)
        ));
        if source.no_check_cert {
            args.push("-k".to_string());
        }
    }
    args.extend(["-o".to_string(), destination.to_string(), url.to_string()]);
    Program::new(vec!["curl".to_string()], args)
}

fn which(tool: &str) -> Program {
    Program::public(["which", tool])
}

/// File name a downloaded URL is stored under locally
fn file_name_of(url: &str) -> &str {
    match url.rsplit('/').next() {
        Some(name) if !matches!(name, "" | "." | "..") => name,
        _ => "source",
    }
}

/// Turn a failed download command into a staging error, keeping connectivity
/// and credential failures as they are
fn download_error(err: ExecError) -> ExecError {
    match err {
        ExecError::CommandFailed { .. } | ExecError::ProgramNotFound { .. } => {
            ExecError::Download {
                reason: err.to_string(),
            }
        }
        other => other,
    }
}

/// Carries out a [`StagingPlan`]
pub struct SourceStager<'a> {
    local: &'a dyn CommandRunner,
    trace: Trace,
}

impl<'a> SourceStager<'a> {
    pub fn new(local: &'a dyn CommandRunner, trace: Trace) -> Self {
        Self { local, trace }
    }

    /// Plan and stage `source`, downloading or copying onto `remote` when given
    ///
    /// # Errors
    /// Returns the planning error, or the first staging error encountered
    #[instrument(skip_all, fields(remote = remote.map(|r| r.host())))]
    pub async fn stage(
        &self,
        source: &SourceSpec,
        remote: Option<&dyn RemoteTarget>,
    ) -> Result<Staged, ExecError> {
        let plan = plan(source, remote.is_some())?;
        self.trace.message(format_args!("staging: {}", plan.kind()));

        match (plan, remote) {
            (StagingPlan::Skip, _) => Ok(Staged::Nothing),
            (StagingPlan::LocalPresent { .. }, _) => Ok(Staged::AlreadyPresent),
            (StagingPlan::DownloadLocal { url, destination }, _) => {
                self.download_locally(source, &url, &destination).await?;
                Ok(Staged::DownloadedLocally)
            }
            (StagingPlan::DownloadRemote { url, destination }, Some(remote)) => {
                let fetch = self
                    .download_remote(source, &url, &destination, remote)
                    .await
                    .map_err(download_error)?;
                Ok(Staged::DownloadedRemotely(fetch))
            }
            (StagingPlan::TransferLocal { path, destination }, Some(remote)) => {
                let bytes = remote.upload(Path::new(&path), &destination).await?;
                info!(bytes, "source transferred to remote host");
                Ok(Staged::Transferred { bytes })
            }
            (plan, None) => Err(ExecError::Internal(format!(
                "staging plan '{plan}' needs a remote host"
            ))),
        }
    }

    async fn download_locally(
        &self,
        source: &SourceSpec,
        url: &str,
        destination: &str,
    ) -> Result<(), ExecError> {
        let command = wget_command(source, url, destination);
        match self.local.run(&command, b"").await {
            Ok(_) => {
                debug!(destination, "source downloaded locally");
                Ok(())
            }
            Err(ExecError::CommandFailed { detail, .. })
                if !source.no_check_cert && detail.contains(CERT_HINT) =>
            {
                Err(ExecError::CertificateVerification {
                    source_uri: url.to_string(),
                    reason: detail,
                })
            }
            Err(e) => Err(download_error(e)),
        }
    }

    async fn download_remote(
        &self,
        source: &SourceSpec,
        url: &str,
        destination: &str,
        remote: &dyn RemoteTarget,
    ) -> Result<RemoteFetch, ExecError> {
        if probe(remote, "wget").await? {
            self.trace.message("downloading source on remote host with wget");
            remote
                .run(&wget_command(source, url, destination), b"")
                .await?;
            return Ok(RemoteFetch::Wget);
        }

        if probe(remote, "curl").await? {
            self.trace.message("downloading source on remote host with curl");
            remote
                .run(&curl_command(source, url, destination), b"")
                .await?;
            return Ok(RemoteFetch::Curl);
        }

        warn!(host = remote.host(), "neither wget nor curl found on remote host, downloading locally");
        let dir = tempfile::Builder::new()
            .prefix("scriptpkg-")
            .tempdir()
            .map_err(|e| ExecError::Download {
                reason: format!("could not create temporary directory for source file: {e}"),
            })?;
        let local_copy = dir.path().join(file_name_of(url));
        let local_path = local_copy.to_string_lossy().into_owned();

        self.local
            .run(&wget_command(source, url, &local_path), b"")
            .await?;
        remote.upload(&local_copy, destination).await?;
        // dir is removed when dropped
        Ok(RemoteFetch::LocalThenTransfer)
    }
}

/// Whether `tool` is on the remote host's PATH
///
/// A failing `which` means absent; any other failure is returned.
async fn probe(remote: &dyn RemoteTarget, tool: &str) -> Result<bool, ExecError> {
    match remote.run(&which(tool), b"").await {
        Ok(_) => Ok(true),
        Err(ExecError::CommandFailed { .. }) => {
            debug!(tool, "not found on remote host");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
