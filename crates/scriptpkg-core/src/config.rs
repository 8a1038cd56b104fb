//! Script-package definitions

use serde::{Deserialize, Serialize};

use scriptpkg_exec::{ExecError, ExecutionRequest, RawRequest};

/// How changes to a package's request are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    /// Any request change replaces the resource
    #[default]
    #[serde(rename = "scriptpackage")]
    ScriptPackage,
    /// Request changes update the resource in place
    #[serde(rename = "updatable_scriptpackage")]
    UpdatableScriptPackage,
}

/// A script package as declared by the operator
///
/// The request attributes sit at the same level as the lifecycle flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPackage {
    #[serde(default)]
    pub kind: PackageKind,
    /// Run the script when the resource is created
    #[serde(default)]
    pub on_create: bool,
    /// Run the script when the resource is updated
    #[serde(default)]
    pub on_update: bool,
    /// Run the script when the resource is deleted
    #[serde(default)]
    pub on_delete: bool,
    #[serde(flatten)]
    pub request: RawRequest,
}

impl ScriptPackage {
    /// Validate the request attributes
    ///
    /// # Errors
    /// Returns `ExecError::Validation` listing every offending attribute
    pub fn execution_request(&self) -> Result<ExecutionRequest, ExecError> {
        ExecutionRequest::from_raw(&self.request)
    }
}
