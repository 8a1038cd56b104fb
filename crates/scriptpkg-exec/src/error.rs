//! Error types for scriptpkg-exec
//!
//! Every variant renders as a two-part message: what went wrong, then the
//! underlying cause. Secrets never appear in any variant.

use std::fmt;

use thiserror::Error;

/// Which end of a connection an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    /// The host the program runs on
    Remote,
    /// The intermediary host used to reach the remote host
    Bastion,
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRole::Remote => f.write_str("remote host"),
            HostRole::Bastion => f.write_str("bastion host"),
        }
    }
}

/// Reasons a credential set cannot be turned into a client configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("a user is required")]
    MissingUser,

    #[error("one of password or private key is required")]
    MissingCredential,

    #[error("the private key must be base64 encoded")]
    MalformedKeyEncoding,

    #[error("error parsing private key: {0}")]
    UnparsableKey(String),
}

/// A single offending field found while validating a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Attribute name as the caller spelled it
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All validation problems found in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a list holding exactly one error
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Whether any error was reported against `field`
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Coarse classification of [`ExecError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Credential,
    Connectivity,
    Staging,
    Execution,
    OutputContract,
    Internal,
}

/// Errors that can occur while staging and running a script
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Request failed validation
    #[error("invalid request: {0}")]
    Validation(ValidationErrors),

    /// Credential material is missing or unusable
    #[error("invalid credentials for {role}: {reason}")]
    Credential {
        /// Which connection the credentials belong to
        role: HostRole,
        /// What is wrong with them
        reason: CredentialError,
    },

    /// Dial, channel-open, handshake or authentication failure
    #[error("error connecting to {role} {host}: {reason}")]
    Connection {
        /// Which end failed
        role: HostRole,
        /// Address that was being reached
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Local source file is missing
    #[error("can't find source program {path:?}")]
    SourceNotFound {
        /// Path as given
        path: String,
    },

    /// Download of the source failed
    #[error("error downloading source script: {reason}")]
    Download {
        /// Underlying cause
        reason: String,
    },

    /// Download failed because the server certificate could not be verified
    #[error(
        "could not verify the certificate for {source_uri}; set source_no_check_cert to true \
         to ignore the certificate of the source URL: {reason}"
    )]
    CertificateVerification {
        /// Source URL
        source_uri: String,
        /// Underlying cause
        reason: String,
    },

    /// Secure file copy to the remote host failed
    #[error("error transferring file to {host}: {reason}")]
    Transfer {
        /// Destination host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Executable could not be located
    #[error("can't find external program {program:?}")]
    ProgramNotFound {
        /// Redacted command label
        program: String,
    },

    /// Command ran and failed
    #[error("failed to execute {program:?}: {detail}")]
    CommandFailed {
        /// Redacted command label
        program: String,
        /// Captured diagnostics
        detail: String,
    },

    /// Command produced JSON that cannot be stored as a flat string map
    #[error(
        "command {program:?} produced JSON that was not key/value pairs of strings, \
         which is required for the result"
    )]
    OutputContract {
        /// Redacted command label
        program: String,
    },

    /// Never-expected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Validation(_) => ErrorKind::Validation,
            ExecError::Credential { .. } => ErrorKind::Credential,
            ExecError::Connection { .. } => ErrorKind::Connectivity,
            ExecError::SourceNotFound { .. }
            | ExecError::Download { .. }
            | ExecError::CertificateVerification { .. }
            | ExecError::Transfer { .. } => ErrorKind::Staging,
            ExecError::ProgramNotFound { .. } | ExecError::CommandFailed { .. } => {
                ErrorKind::Execution
            }
            ExecError::OutputContract { .. } => ErrorKind::OutputContract,
            ExecError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ExecError::Validation(ValidationErrors::single(field, message))
    }

    pub(crate) fn credential(role: HostRole, reason: CredentialError) -> Self {
        ExecError::Credential { role, reason }
    }

    pub(crate) fn connection(role: HostRole, host: &str, reason: impl fmt::Display) -> Self {
        ExecError::Connection {
            role,
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}
