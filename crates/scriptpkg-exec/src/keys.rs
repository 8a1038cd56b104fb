//! Client configuration from credential material
//!
//! Credentials arrive as a user plus either a password or a base64-encoded
//! private key. Resolution happens before any network activity so credential
//! problems never cost a dial.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use russh::keys::{PrivateKey, decode_secret_key};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{CredentialError, ExecError, HostRole};
use crate::request::ConnectionDescriptor;

/// How the client proves its identity
#[derive(Clone)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PublicKey(Arc<PrivateKey>),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(***)"),
            AuthMethod::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
        }
    }
}

/// Authenticated client settings for one SSH endpoint
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    pub auth: AuthMethod,
}

impl ClientConfig {
    /// Build the configuration for a descriptor
    ///
    /// # Errors
    /// Returns `ExecError::Credential` if the user or credentials are missing or unusable
    pub fn from_descriptor(
        role: HostRole,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Self, ExecError> {
        build_client_config(
            role,
            descriptor.user.as_deref(),
            descriptor.password.as_deref().map(String::as_str),
            descriptor.private_key.as_deref().map(String::as_str),
        )
    }
}

/// Build a client configuration, preferring the private key over the password
///
/// # Errors
/// Returns `ExecError::Credential` when:
/// - the user is missing
/// - neither a password nor a key is supplied
/// - the key is not valid base64
/// - the decoded key cannot be parsed
pub fn build_client_config(
    role: HostRole,
    user: Option<&str>,
    password: Option<&str>,
    base64_key: Option<&str>,
) -> Result<ClientConfig, ExecError> {
    let user = match user {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => return Err(ExecError::credential(role, CredentialError::MissingUser)),
    };

    let auth = match (base64_key, password) {
        (Some(key), _) if !key.is_empty() => {
            let key = decode_private_key(key).map_err(|reason| ExecError::credential(role, reason))?;
            debug!(%role, algorithm = %key.algorithm().as_str(), "using public key authentication");
            AuthMethod::PublicKey(Arc::new(key))
        }
        (_, Some(password)) if !password.is_empty() => {
            debug!(%role, "using password authentication");
            AuthMethod::Password(Zeroizing::new(password.to_string()))
        }
        _ => {
            return Err(ExecError::credential(
                role,
                CredentialError::MissingCredential,
            ));
        }
    };

    Ok(ClientConfig { user, auth })
}

fn decode_private_key(base64_key: &str) -> Result<PrivateKey, CredentialError> {
    let bytes = Zeroizing::new(
        base64::engine::general_purpose::STANDARD
            .decode(base64_key.trim())
            .map_err(|_| CredentialError::MalformedKeyEncoding)?,
    );
    let text = std::str::from_utf8(&bytes)
        .map_err(|_| CredentialError::UnparsableKey("key is not PEM/OpenSSH text".to_string()))?;

    decode_secret_key(text, None).map_err(|e| CredentialError::UnparsableKey(e.to_string()))
}
