//! scriptpkg-core: script-package resource lifecycle
//!
//! Decides whether a lifecycle event runs the script, keeps the resource state
//! (id and result), and plans replacement for packages that cannot be updated
//! in place.

pub mod config;
pub mod error;
pub mod resource;
pub mod state;

pub use config::{PackageKind, ScriptPackage};
pub use error::CoreError;
pub use resource::{ChangePlan, LifecycleEvent, Outcome, ResourceManager, generate_id};
pub use state::ResourceState;
