//! Reality verifier behavior through the full tool path.

mod common;

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::Harness;
use foreman::domain::errors::ErrorKind;
use foreman::domain::models::{FileAction, QualityCheck, ToolOutcome};
use foreman::services::tools::{
    SideEffect, Tool, ToolExecution, ToolKind, ToolRegistry, WriteFileTool,
};
use foreman::services::verifier::{content_digest, RealityVerifier, VerifyContext};

fn ctx(h: &Harness, task_id: uuid::Uuid) -> VerifyContext {
    VerifyContext {
        task_id,
        step_index: 0,
        repo_root: h.repo_dir.path().to_path_buf(),
    }
}

fn verifier_with(h: &Harness, registry: ToolRegistry) -> RealityVerifier {
    RealityVerifier::new(
        Arc::new(registry),
        h.runs.clone(),
        h.bus.clone(),
        h.clock.clone(),
        h.config.timeouts.clone(),
    )
}

/// Reports a successful write without performing one.
struct LyingWriteTool;

#[async_trait::async_trait]
impl Tool for LyingWriteTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "claims to write"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::FileOp
    }

    async fn execute(
        &self,
        args: Value,
        _repo_root: &Path,
        _cancel: &CancellationToken,
    ) -> ToolExecution {
        let path = args["path"].as_str().unwrap_or("ghost.txt").to_string();
        ToolExecution::ok(
            "wrote 9 bytes",
            vec![SideEffect::Create {
                path,
                byte_size: 9,
                sha256: content_digest(b"ghost data"),
            }],
        )
    }
}

#[tokio::test]
async fn test_verified_write_emits_exactly_one_event() {
    let h = Harness::new().await;
    let task = h.submit("verify a write").await;

    let verifier = verifier_with(
        &h,
        ToolRegistry::builder().register(WriteFileTool).build(),
    );

    let invocation = verifier
        .execute(
            &ctx(&h, task.id),
            "write_file",
            json!({ "path": "src/new.rs", "content": "fn f() {}\n" }),
            &CancellationToken::new(),
        )
        .await;

    assert!(invocation.success());

    let events = h.runs.list_file_events(task.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, FileAction::Create);
    assert_eq!(events[0].path, "src/new.rs");
    assert_eq!(events[0].byte_size, 10);
    assert!(events[0].checks_passed.contains(&QualityCheck::Utf8Clean));
    assert!(events[0].checks_passed.contains(&QualityCheck::SyntaxValid));

    // The same event reached the bus topic.
    let kinds = h.event_kinds(task.id).await;
    assert_eq!(kinds, vec!["file_verified"]);
}

#[tokio::test]
async fn test_missing_file_after_write_is_reality_mismatch() {
    let h = Harness::new().await;
    let task = h.submit("catch the liar").await;

    let verifier = verifier_with(
        &h,
        ToolRegistry::builder().register(LyingWriteTool).build(),
    );

    let invocation = verifier
        .execute(
            &ctx(&h, task.id),
            "write_file",
            json!({ "path": "ghost.txt" }),
            &CancellationToken::new(),
        )
        .await;

    assert!(!invocation.success());
    match &invocation.outcome {
        ToolOutcome::Err { kind, detail } => {
            assert_eq!(*kind, ErrorKind::RealityMismatch);
            assert!(detail.contains("missing"));
        }
        ToolOutcome::Ok { .. } => panic!("expected failure"),
    }

    // No event was persisted or published.
    assert!(h.runs.list_file_events(task.id).await.unwrap().is_empty());
    assert!(h.event_kinds(task.id).await.is_empty());
}

#[tokio::test]
async fn test_path_escape_refused() {
    let h = Harness::new().await;
    let task = h.submit("escape attempt").await;

    let verifier = verifier_with(
        &h,
        ToolRegistry::builder().register(WriteFileTool).build(),
    );

    let invocation = verifier
        .execute(
            &ctx(&h, task.id),
            "write_file",
            json!({ "path": "../outside.txt", "content": "x" }),
            &CancellationToken::new(),
        )
        .await;

    assert!(!invocation.success());
    match &invocation.outcome {
        ToolOutcome::Err { kind, .. } => assert_eq!(*kind, ErrorKind::PathEscape),
        ToolOutcome::Ok { .. } => panic!("expected failure"),
    }
    assert!(h.runs.list_file_events(task.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsafe_command_refused_through_verifier() {
    let h = Harness::new().await;
    let task = h.submit("dangerous command").await;

    let verifier = verifier_with(&h, ToolRegistry::standard());

    let invocation = verifier
        .execute(
            &ctx(&h, task.id),
            "run_command",
            json!({ "command": "rm -rf /" }),
            &CancellationToken::new(),
        )
        .await;

    assert!(!invocation.success());
    match &invocation.outcome {
        ToolOutcome::Err { kind, .. } => assert_eq!(*kind, ErrorKind::UnsafeCommand),
        ToolOutcome::Ok { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_unknown_tool_fails_cleanly() {
    let h = Harness::new().await;
    let task = h.submit("unknown tool").await;

    let verifier = verifier_with(&h, ToolRegistry::standard());
    let invocation = verifier
        .execute(&ctx(&h, task.id), "teleport", json!({}), &CancellationToken::new())
        .await;

    assert!(!invocation.success());
    match &invocation.outcome {
        ToolOutcome::Err { kind, detail } => {
            assert_eq!(*kind, ErrorKind::ToolFailed);
            assert!(detail.contains("teleport"));
        }
        ToolOutcome::Ok { .. } => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_delete_then_recreate_sequence() {
    let h = Harness::new().await;
    let task = h.submit("delete and recreate").await;
    std::fs::write(h.repo_dir.path().join("old.py"), "legacy").unwrap();

    let verifier = verifier_with(&h, ToolRegistry::standard());
    let cancel = CancellationToken::new();
    let context = ctx(&h, task.id);

    let deletion = verifier
        .execute(&context, "delete_file", json!({ "path": "old.py" }), &cancel)
        .await;
    assert!(deletion.success());

    let recreation = verifier
        .execute(
            &context,
            "write_file",
            json!({ "path": "old.py", "content": "fresh" }),
            &cancel,
        )
        .await;
    assert!(recreation.success());

    let events = h.runs.list_file_events(task.id).await.unwrap();
    let actions: Vec<FileAction> = events.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![FileAction::Delete, FileAction::Create]);
    assert_eq!(events[0].byte_size, 0);
}
