//! End-to-end pipeline scenarios driven through the task engine with a
//! scripted generative client and a scratch repository on disk.

mod common;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;

use common::{
    plan_value, script_coder_write, script_docs, script_full_success, script_qa_fail,
    script_qa_no_tests, script_qa_pass, Harness,
};
use foreman::domain::errors::ErrorKind;
use foreman::domain::models::{FileAction, TaskStatus};
use foreman::domain::ports::Clock;
use foreman::services::LeaseSweeper;

#[tokio::test]
async fn test_happy_path_event_order_and_verified_create() {
    let h = Harness::new().await;
    let task = h.submit("Add GET /healthz returning 200").await;

    h.client.push_structured(Ok(plan_value(0.9, "app/health.py")));
    script_coder_write(&h.client, "app/health.py", "def health():\n    return 200\n");
    script_qa_pass(&h.client);
    script_docs(&h.client);

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());
    assert!(h.repo_dir.path().join("app/health.py").exists());

    // Verified effects: exactly one create on app/health.py.
    let file_events = h.runs.list_file_events(task.id).await.unwrap();
    assert_eq!(file_events.len(), 1);
    assert_eq!(file_events[0].path, "app/health.py");
    assert_eq!(file_events[0].action, FileAction::Create);
    assert!(file_events[0].byte_size > 0);

    let kinds = h.event_kinds(task.id).await;
    assert_eq!(
        kinds,
        vec![
            "status",        // pending -> planning
            "plan_ready",
            "agent_log",     // planner
            "status",        // planning -> executing
            "file_verified", // streamed live during the coder step
            "agent_log",     // coder_be
            "status",        // executing -> testing
            "agent_log",     // qa
            "status",        // testing -> documenting
            "agent_log",     // docs
            "status",        // documenting -> completed
            "complete",
        ]
    );

    // Sequence numbers are dense and monotone per topic.
    let events = h.bus.replay(task.id, None).await.unwrap();
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
    }
    // Within the task, wall-clock order follows sequence order.
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_low_confidence_plan_waits_for_approval() {
    let h = Harness::new().await;
    let task = h.submit("Refactor the persistence layer").await;

    h.client.push_structured(Ok(plan_value(0.4, "app/db.py")));

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let paused = h.task(task.id).await;
    assert_eq!(paused.status, TaskStatus::PlanReview);
    assert!(paused.requires_review);
    assert!(paused.plan.is_some());
    assert!(paused.heartbeat_at.is_none());

    // Approve: external command moves plan_review -> executing.
    let mut approved = paused.clone();
    approved
        .transition_to(TaskStatus::Executing, chrono::Utc::now())
        .unwrap();
    assert!(h
        .tasks
        .update_with_expected_status(&approved, TaskStatus::PlanReview)
        .await
        .unwrap());

    script_coder_write(&h.client, "app/db.py", "def migrate():\n    pass\n");
    script_qa_pass(&h.client);
    script_docs(&h.client);

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.task(task.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_fix_loop_spawns_child_and_recovers() {
    let h = Harness::new().await;
    let task = h.submit("Add feature with a subtle bug").await;

    // Parent plan, then the fix child's plan.
    h.client.push_structured(Ok(plan_value(0.9, "app/feature.py")));
    script_coder_write(&h.client, "app/feature.py", "def feature():\n    return 1\n");
    script_qa_fail(&h.client);
    // Child pipeline (planned and driven inline by the parent's worker).
    h.client.push_structured(Ok(plan_value(0.95, "app/feature.py")));
    script_coder_write(&h.client, "app/feature.py", "def feature():\n    return 2\n");
    script_qa_pass(&h.client);
    script_docs(&h.client);
    // Parent re-tests, then documents.
    script_qa_pass(&h.client);
    script_docs(&h.client);

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let parent = h.task(task.id).await;
    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(parent.retry_count, 1);

    let children = h.tasks.list_children(task.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(children[0].title.starts_with("Fix: "));
    assert_eq!(children[0].status, TaskStatus::Completed);
    assert_eq!(children[0].fix_depth, 1);
    assert!(children[0].user_request.contains("assert 404 == 200"));
}

#[tokio::test]
async fn test_no_tests_collected_spawns_write_tests_child() {
    let h = Harness::new().await;
    let task = h.submit("Add parsing helper").await;

    h.client.push_structured(Ok(plan_value(0.9, "app/parse.py")));
    script_coder_write(&h.client, "app/parse.py", "def parse(x):\n    return x\n");
    script_qa_no_tests(&h.client);
    // Write-tests child pipeline.
    script_full_success(&h.client, "tests/test_parse.py", "def test_parse():\n    assert True\n");
    // Parent re-tests and documents.
    script_qa_pass(&h.client);
    script_docs(&h.client);

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let parent = h.task(task.id).await;
    assert_eq!(parent.status, TaskStatus::Completed);

    let children = h.tasks.list_children(task.id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(children[0].title.starts_with("Write tests for"));
    assert_eq!(children[0].status, TaskStatus::Completed);

    // The parent never reached documenting before tests existed: the
    // child's completion precedes the parent's documenting transition.
    let kinds = h.event_kinds(task.id).await;
    let documenting_pos = kinds.iter().position(|k| k == "complete").unwrap();
    assert!(documenting_pos == kinds.len() - 1);
}

#[tokio::test]
async fn test_fix_budget_exhaustion_fails_task() {
    let h = Harness::new().await;
    let task = h.submit("Unfixable change").await;

    h.client.push_structured(Ok(plan_value(0.9, "app/bad.py")));
    script_coder_write(&h.client, "app/bad.py", "def bad():\n    return 0\n");

    // Every QA round fails; every fix child succeeds but fixes nothing.
    // With the default budget of 2 retries: failure -> child -> failure ->
    // child -> failure -> task fails.
    script_qa_fail(&h.client);
    script_full_success(&h.client, "app/bad.py", "def bad():\n    return 1\n");
    script_qa_fail(&h.client);
    script_full_success(&h.client, "app/bad.py", "def bad():\n    return 2\n");
    script_qa_fail(&h.client);

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let parent = h.task(task.id).await;
    assert_eq!(parent.status, TaskStatus::Failed);
    assert_eq!(parent.error_kind, Some(ErrorKind::TestsFailed));
    assert_eq!(parent.retry_count, h.config.fix_loop.max_test_retries);

    let children = h.tasks.list_children(task.id).await.unwrap();
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn test_cyclic_plan_fails_without_execution() {
    let h = Harness::new().await;
    let task = h.submit("Anything").await;

    // Step 0 depends on step 1: a forward reference, i.e. a cycle under
    // the strict ordering rule.
    let mut plan = plan_value(0.9, "app/x.py");
    plan["steps"][0]["depends_on"] = serde_json::json!([1]);
    plan["steps"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!({
            "index": 1,
            "description": "second",
            "role": "coder_be",
            "files": ["app/y.py"],
            "depends_on": [0]
        }));
    h.client.push_structured(Ok(plan.clone()));
    // The engine's single planner retry receives the same cyclic plan.
    h.client.push_structured(Ok(plan));

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::CyclicPlan));
    // No executor ran: no tool_call prompts ever reached the client.
    assert!(h.client.tool_prompts().is_empty());
}

#[tokio::test]
async fn test_duplicate_step_indices_rejected_as_invalid_plan() {
    let h = Harness::new().await;
    let task = h.submit("Anything").await;

    let mut plan = plan_value(0.9, "app/x.py");
    plan["steps"].as_array_mut().unwrap().push(serde_json::json!({
        "index": 0,
        "description": "duplicate",
        "role": "coder_be",
        "files": ["app/y.py"],
        "depends_on": []
    }));
    h.client.push_structured(Ok(plan.clone()));
    h.client.push_structured(Ok(plan));

    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::InvalidPlan));
}

#[tokio::test]
async fn test_lease_expiry_reclaims_without_fix_spawn() {
    let h = Harness::new().await;
    let task = h.submit("Long running work").await;

    // Simulate a worker that claimed the task and then vanished.
    let mut claimed = task.clone();
    claimed
        .transition_to(TaskStatus::Planning, h.clock.now())
        .unwrap();
    claimed
        .transition_to(TaskStatus::Executing, h.clock.now())
        .unwrap();
    claimed.heartbeat_at = Some(h.clock.now());
    assert!(h
        .tasks
        .update_with_expected_status(&claimed, TaskStatus::Pending)
        .await
        .unwrap());

    // A verified effect from before the crash is retained.
    let prior = foreman::domain::models::VerifiedFileEvent {
        task_id: task.id,
        step_index: 1,
        path: "app/partial.py".to_string(),
        action: FileAction::Create,
        byte_size: 10,
        checks_passed: vec![],
        quality_warnings: vec![],
        timestamp: h.clock.now(),
    };
    h.runs.append_file_event(&prior).await.unwrap();

    let sweeper = LeaseSweeper::new(
        h.tasks.clone(),
        h.bus.clone(),
        h.clock.clone(),
        h.config.lease.clone(),
        CancellationToken::new(),
    );

    // Within the lease window: nothing to reclaim.
    assert_eq!(sweeper.sweep().await.unwrap(), 0);

    // Past the lease window: reclaimed.
    h.clock
        .advance(ChronoDuration::seconds(h.config.lease.expiry_secs as i64 + 1));
    assert_eq!(sweeper.sweep().await.unwrap(), 1);

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_kind, Some(ErrorKind::LeaseExpired));

    // No fix child was spawned, and the prior effect survived (no rollback).
    assert!(h.tasks.list_children(task.id).await.unwrap().is_empty());
    assert_eq!(h.runs.list_file_events(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pause_resume_is_a_noop_on_data() {
    let h = Harness::new().await;
    let task = h.submit("Pausable work").await;

    // Pause before any worker touches it.
    let mut paused = h.task(task.id).await;
    paused
        .transition_to(TaskStatus::Paused, chrono::Utc::now())
        .unwrap();
    assert!(h
        .tasks
        .update_with_expected_status(&paused, TaskStatus::Pending)
        .await
        .unwrap());

    // The engine yields a paused task untouched.
    h.engine
        .run(task.id, CancellationToken::new())
        .await
        .unwrap();
    let during = h.task(task.id).await;
    assert_eq!(during.status, TaskStatus::Paused);
    assert_eq!(during.paused_from, Some(TaskStatus::Pending));
    assert_eq!(during.current_step, 0);
    assert!(during.plan.is_none());

    // Resume restores the recorded status; everything else is unchanged.
    let mut resumed = during.clone();
    resumed
        .transition_to(TaskStatus::Pending, chrono::Utc::now())
        .unwrap();
    resumed.paused_from = None;
    assert!(h
        .tasks
        .update_with_expected_status(&resumed, TaskStatus::Paused)
        .await
        .unwrap());

    let after = h.task(task.id).await;
    assert_eq!(after.status, TaskStatus::Pending);
    assert_eq!(after.user_request, task.user_request);
    assert_eq!(after.retry_count, 0);
}
