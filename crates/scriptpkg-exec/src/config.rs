//! Engine settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keepalive::DEFAULT_KEEPALIVE_INTERVAL;

/// How server host keys are checked
///
/// `AcceptAny` keeps the historical trust model of the provisioning plugin:
/// hosts are freshly created by the same run and have no known key yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any host key
    #[default]
    AcceptAny,
    /// Accept only keys whose SHA-256 fingerprint is listed (`SHA256:...`)
    Pinned { fingerprints: Vec<String> },
}

impl HostKeyPolicy {
    /// Whether a key with `fingerprint` may be trusted
    #[must_use]
    pub fn accepts(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Pinned { fingerprints } => {
                fingerprints.iter().any(|f| f.trim() == fingerprint)
            }
        }
    }
}

/// Settings shared by every run of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between keep-alive requests on remote runs
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    /// Host key verification
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_secs()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_secs(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }
}
