//! Persisted resource state

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What is remembered about a resource between events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource id
    pub id: String,
    /// Flattened result of the last run, empty when nothing ran
    #[serde(default)]
    pub result: BTreeMap<String, String>,
    /// When the state was last written
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, result: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            result,
            updated_at: Utc::now(),
        }
    }

    /// Read state from a JSON file
    ///
    /// # Errors
    /// Returns `CoreError::State` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::State(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::State(format!("parsing {}: {e}", path.display())))
    }

    /// Write state as pretty JSON
    ///
    /// # Errors
    /// Returns `CoreError::State` if the file cannot be written
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::State(format!("encoding state: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| CoreError::State(format!("writing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = ResourceState::new(
            "0A1B2C3D-0000-4000-8000-000000000001",
            BTreeMap::from([("ip".to_string(), "10.0.0.1".to_string())]),
        );

        state.save(&path).unwrap();
        assert_eq!(ResourceState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ResourceState::load(Path::new("/no/such/state.json")).unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }
}
