use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use scriptpkg_core::*;
use scriptpkg_exec::error::ExecError;
use scriptpkg_exec::request::ExecutionRequest;
use scriptpkg_exec::result::ExecutionResult;
use scriptpkg_exec::traits::ScriptRunner;
use scriptpkg_exec::{ErrorKind, ScriptEngine};

// Mock implementations
#[derive(Default)]
struct MockRunner {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ScriptRunner for MockRunner {
    async fn run_script(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExecError::CommandFailed {
                program: request.program.label().to_string(),
                detail: "boom".to_string(),
            });
        }
        Ok(ExecutionResult::Pairs(
            [("program".to_string(), request.program.label().to_string())].into(),
        ))
    }
}

fn package(program: &str) -> ScriptPackage {
    serde_json::from_value(json!({ "program": [program] })).unwrap()
}

fn manager(runner: &Arc<MockRunner>) -> ResourceManager {
    ResourceManager::new(runner.clone())
}

#[tokio::test]
async fn test_create_without_flag_skips_script() {
    let runner = Arc::new(MockRunner::default());
    let outcome = manager(&runner)
        .apply(LifecycleEvent::Create, &package("setup.sh"), None)
        .await
        .unwrap();

    assert!(!outcome.ran);
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.state.unwrap().id.len(), 36);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_with_flag_stores_result() {
    let runner = Arc::new(MockRunner::default());
    let mut pkg = package("setup.sh");
    pkg.on_create = true;

    let outcome = manager(&runner)
        .apply(LifecycleEvent::Create, &pkg, None)
        .await
        .unwrap();

    let state = outcome.state.unwrap();
    assert_eq!(state.result.get("program").map(String::as_str), Some("setup.sh"));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_keeps_id() {
    let runner = Arc::new(MockRunner::default());
    let previous = ResourceState::new("ABC", Default::default());
    let mut pkg = package("update.sh");
    pkg.on_update = true;

    let outcome = manager(&runner)
        .apply(LifecycleEvent::Update, &pkg, Some(&previous))
        .await
        .unwrap();

    let state = outcome.state.unwrap();
    assert_eq!(state.id, "ABC");
    assert_eq!(state.result.len(), 1);
}

#[tokio::test]
async fn test_update_without_flag_clears_result() {
    let runner = Arc::new(MockRunner::default());
    let previous = ResourceState::new(
        "ABC",
        [("old".to_string(), "value".to_string())].into(),
    );

    let outcome = manager(&runner)
        .apply(LifecycleEvent::Update, &package("update.sh"), Some(&previous))
        .await
        .unwrap();

    assert!(outcome.state.unwrap().result.is_empty());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_update_requires_state() {
    let runner = Arc::new(MockRunner::default());
    let err = manager(&runner)
        .apply(LifecycleEvent::Update, &package("x.sh"), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::MissingState {
            event: LifecycleEvent::Update
        }
    ));
}

#[tokio::test]
async fn test_delete_runs_only_with_flag() {
    let runner = Arc::new(MockRunner::default());
    let previous = ResourceState::new("ABC", Default::default());
    let mut pkg = package("teardown.sh");

    let skipped = manager(&runner)
        .apply(LifecycleEvent::Delete, &pkg, Some(&previous))
        .await
        .unwrap();
    assert!(!skipped.ran);
    assert!(skipped.state.is_none());

    pkg.on_delete = true;
    let ran = manager(&runner)
        .apply(LifecycleEvent::Delete, &pkg, Some(&previous))
        .await
        .unwrap();
    assert!(ran.ran);
    assert!(ran.state.is_none());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_script_failure_propagates() {
    let runner = Arc::new(MockRunner {
        fail: true,
        ..MockRunner::default()
    });
    let mut pkg = package("setup.sh");
    pkg.on_create = true;

    let err = manager(&runner)
        .apply(LifecycleEvent::Create, &pkg, None)
        .await
        .unwrap_err();

    assert_eq!(err.exec_kind(), Some(ErrorKind::Execution));
}

#[tokio::test]
async fn test_replacement_deletes_then_creates() {
    let runner = Arc::new(MockRunner::default());
    let previous = ResourceState::new("OLD-ID", Default::default());
    let mut old = package("v1.sh");
    old.on_delete = true;
    let mut new = package("v2.sh");
    new.on_create = true;

    let outcome = manager(&runner).change(&old, &new, &previous).await.unwrap();

    assert_eq!(outcome.event, LifecycleEvent::Create);
    let state = outcome.state.unwrap();
    assert_ne!(state.id, "OLD-ID");
    assert_eq!(state.result.get("program").map(String::as_str), Some("v2.sh"));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_definition_is_rejected_before_running() {
    let runner = Arc::new(MockRunner::default());
    let mut pkg: ScriptPackage = serde_json::from_value(json!({ "program": [1] })).unwrap();
    pkg.on_create = true;

    let err = manager(&runner)
        .apply(LifecycleEvent::Create, &pkg, None)
        .await
        .unwrap_err();

    assert_eq!(err.exec_kind(), Some(ErrorKind::Validation));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_real_engine_local_run() {
    let mut pkg: ScriptPackage = serde_json::from_value(json!({
        "program": ["echo", "{\"status\":\"ok\"}"],
        "on_create": true
    }))
    .unwrap();
    pkg.kind = PackageKind::UpdatableScriptPackage;

    let outcome = ResourceManager::new(Arc::new(ScriptEngine::default()))
        .apply(LifecycleEvent::Create, &pkg, None)
        .await
        .unwrap();

    assert_eq!(outcome.result.get("status").map(String::as_str), Some("ok"));
}
