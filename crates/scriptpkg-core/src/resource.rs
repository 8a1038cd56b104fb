//! Lifecycle events for script-package resources

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use scriptpkg_exec::ScriptRunner;

use crate::config::{PackageKind, ScriptPackage};
use crate::error::CoreError;
use crate::state::ResourceState;

/// Lifecycle event applied to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Create,
    Update,
    Delete,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Create => f.write_str("create"),
            LifecycleEvent::Update => f.write_str("update"),
            LifecycleEvent::Delete => f.write_str("delete"),
        }
    }
}

/// How a changed definition is applied to an existing resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePlan {
    /// Delete with the old definition, then create with the new one
    Replace,
    UpdateInPlace,
}

/// Decide how to move from `old` to `new`
///
/// Only the lifecycle flags of a plain script package can change without
/// replacing it.
#[must_use]
pub fn plan_change(old: &ScriptPackage, new: &ScriptPackage) -> ChangePlan {
    if old.kind != new.kind {
        return ChangePlan::Replace;
    }
    match new.kind {
        PackageKind::ScriptPackage if old.request != new.request => ChangePlan::Replace,
        _ => ChangePlan::UpdateInPlace,
    }
}

/// Random resource id: upper-case hex in 8-4-4-4-12 groups
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub event: LifecycleEvent,
    /// Whether the script ran
    pub ran: bool,
    /// State to persist; `None` after a delete
    pub state: Option<ResourceState>,
    /// Result of this event, empty when the script did not run
    pub result: BTreeMap<String, String>,
}

/// Applies lifecycle events using a script runner
pub struct ResourceManager {
    runner: Arc<dyn ScriptRunner>,
}

impl ResourceManager {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self { runner }
    }

    /// Apply `event` to `package`
    ///
    /// # Errors
    /// Returns `CoreError::MissingState` when update or delete has no previous
    /// state, or the engine error when the script fails
    #[instrument(skip(self, package, previous))]
    pub async fn apply(
        &self,
        event: LifecycleEvent,
        package: &ScriptPackage,
        previous: Option<&ResourceState>,
    ) -> Result<Outcome, CoreError> {
        match event {
            LifecycleEvent::Create => self.create(package).await,
            LifecycleEvent::Update => {
                let previous = previous.ok_or(CoreError::MissingState { event })?;
                self.update(package, previous).await
            }
            LifecycleEvent::Delete => {
                let previous = previous.ok_or(CoreError::MissingState { event })?;
                self.delete(package, previous).await
            }
        }
    }

    /// Create the resource, running the script when `on_create` is set
    ///
    /// # Errors
    /// Returns the engine error; no state is produced in that case
    pub async fn create(&self, package: &ScriptPackage) -> Result<Outcome, CoreError> {
        let result = if package.on_create {
            Some(self.run(package).await?)
        } else {
            debug!("on_create not set, script not run");
            None
        };

        let id = generate_id();
        info!(%id, ran = result.is_some(), "resource created");
        Ok(Self::outcome(
            LifecycleEvent::Create,
            result,
            Some(id),
        ))
    }

    /// Update in place, keeping the id
    ///
    /// # Errors
    /// Returns the engine error
    pub async fn update(
        &self,
        package: &ScriptPackage,
        previous: &ResourceState,
    ) -> Result<Outcome, CoreError> {
        let result = if package.on_update {
            Some(self.run(package).await?)
        } else {
            debug!(id = %previous.id, "on_update not set, script not run");
            None
        };

        info!(id = %previous.id, ran = result.is_some(), "resource updated");
        Ok(Self::outcome(
            LifecycleEvent::Update,
            result,
            Some(previous.id.clone()),
        ))
    }

    /// Delete the resource, running the script when `on_delete` is set
    ///
    /// # Errors
    /// Returns the engine error; the resource is then still considered present
    pub async fn delete(
        &self,
        package: &ScriptPackage,
        previous: &ResourceState,
    ) -> Result<Outcome, CoreError> {
        let result = if package.on_delete {
            Some(self.run(package).await?)
        } else {
            debug!(id = %previous.id, "on_delete not set, script not run");
            None
        };

        info!(id = %previous.id, ran = result.is_some(), "resource deleted");
        Ok(Self::outcome(LifecycleEvent::Delete, result, None))
    }

    /// Move an existing resource from `old` to `new`
    ///
    /// Replacement deletes with the old definition and then creates with the
    /// new one; otherwise this is an update.
    ///
    /// # Errors
    /// Returns the first failing step's error
    pub async fn change(
        &self,
        old: &ScriptPackage,
        new: &ScriptPackage,
        previous: &ResourceState,
    ) -> Result<Outcome, CoreError> {
        match plan_change(old, new) {
            ChangePlan::Replace => {
                info!(id = %previous.id, "definition changed, replacing resource");
                self.delete(old, previous).await?;
                self.create(new).await
            }
            ChangePlan::UpdateInPlace => self.update(new, previous).await,
        }
    }

    async fn run(&self, package: &ScriptPackage) -> Result<BTreeMap<String, String>, CoreError> {
        let request = package.execution_request()?;
        let result = self.runner.run_script(&request).await?;
        Ok(result.into_map())
    }

    fn outcome(
        event: LifecycleEvent,
        result: Option<BTreeMap<String, String>>,
        id: Option<String>,
    ) -> Outcome {
        let ran = result.is_some();
        let result = result.unwrap_or_default();
        Outcome {
            event,
            ran,
            state: id.map(|id| ResourceState::new(id, result.clone())),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn package(kind: PackageKind, program: &str) -> ScriptPackage {
        let mut package = ScriptPackage {
            kind,
            ..ScriptPackage::default()
        };
        package.request.program = vec![json!(program)];
        package
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id();
        let groups: Vec<&str> = id.split('-').collect();

        assert_eq!(
            groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_plan_change_for_plain_package() {
        let old = package(PackageKind::ScriptPackage, "a.sh");
        let mut flags_only = old.clone();
        flags_only.on_update = true;

        assert_eq!(plan_change(&old, &flags_only), ChangePlan::UpdateInPlace);
        assert_eq!(
            plan_change(&old, &package(PackageKind::ScriptPackage, "b.sh")),
            ChangePlan::Replace
        );
    }

    #[test]
    fn test_plan_change_for_updatable_package() {
        let old = package(PackageKind::UpdatableScriptPackage, "a.sh");
        let new = package(PackageKind::UpdatableScriptPackage, "b.sh");

        assert_eq!(plan_change(&old, &new), ChangePlan::UpdateInPlace);
        assert_eq!(
            plan_change(&old, &package(PackageKind::ScriptPackage, "a.sh")),
            ChangePlan::Replace
        );
    }

    #[test]
    fn test_lifecycle_event_serde() {
        assert_eq!(serde_json::to_string(&LifecycleEvent::Delete).unwrap(), "\"delete\"");
        assert_eq!(LifecycleEvent::Update.to_string(), "update");
    }
}
