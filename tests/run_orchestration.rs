//! Integration tests for the run orchestration layer: state fan-out,
//! operator handshakes, abort semantics, and registry retention. These drive
//! the same paths the websocket transport uses, without a browser.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use showrun::api::dispatcher::RunStateHooks;
use showrun::config::RetentionConfig;
use showrun::error::RunnerError;
use showrun::models::{Checkpoint, CheckpointMap, Plan, PlanStep, VarMap};
use showrun::runner::RunnerHooks;
use showrun::runs::{RunRegistry, RunState, RunStatus};
use showrun::storage::StoredPlan;

fn plan_with_variable() -> Plan {
    Plan {
        name: "Say hi to {person}".to_string(),
        vars: VarMap::new(),
        steps: vec![PlanStep {
            id: "s1".to_string(),
            title: "Greet".to_string(),
            instructions: "Type hello {person}".to_string(),
        }],
        start_url: None,
        has_variables: true,
    }
}

fn stored(plan: Plan, checkpoints: CheckpointMap) -> Arc<StoredPlan> {
    Arc::new(StoredPlan {
        plan_id: "plan1".to_string(),
        recording_id: "rec1".to_string(),
        has_variables: plan.has_variables,
        plan,
        prompt: None,
        raw_response: None,
        checkpoints,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
}

async fn next_of_type(
    receiver: &mut tokio::sync::mpsc::UnboundedReceiver<Value>,
    wanted: &str,
) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("timed out waiting for message")
            .expect("stream closed");
        if message.get("type").and_then(Value::as_str) == Some(wanted) {
            return message;
        }
    }
}

#[tokio::test]
async fn variable_prompt_round_trip() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));
    let hooks = RunStateHooks::new(Arc::clone(&state));

    let mut subscription = state.subscribe().await;

    let request_state = Arc::clone(&state);
    let handshake = tokio::spawn(async move {
        let hooks = RunStateHooks::new(request_state);
        hooks
            .request_variables(json!({"vars": [{"name": "person", "value": ""}]}))
            .await
    });

    // The subscriber sees the prompt with the missing variable.
    let prompt = next_of_type(&mut subscription.receiver, "variable_prompt").await;
    assert_eq!(prompt["payload"]["vars"][0]["name"], "person");
    assert_eq!(prompt["payload"]["vars"][0]["value"], "");

    // Operator replies; the awaiting side gets the values.
    let mut values = HashMap::new();
    values.insert("person".to_string(), json!("Ada"));
    state.resolve_variables(values).await;

    let provided = handshake.await.unwrap().unwrap();
    assert_eq!(provided["person"], json!("Ada"));

    // The slot is free again for a later prompt.
    hooks
        .publish_event("variables_applied", json!({"vars": {"person": "Ada"}}))
        .await;
    let applied = next_of_type(&mut subscription.receiver, "variables_applied").await;
    assert_eq!(applied["vars"]["person"], "Ada");
}

#[tokio::test]
async fn abort_during_variable_wait_reaches_terminal() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));
    let mut subscription = state.subscribe().await;

    let request_state = Arc::clone(&state);
    let handshake = tokio::spawn(async move {
        let hooks = RunStateHooks::new(request_state);
        hooks.request_variables(json!({"vars": []})).await
    });
    next_of_type(&mut subscription.receiver, "variable_prompt").await;

    state.request_abort().await;

    // The pending handshake is auto-failed with AbortRequested.
    match handshake.await.unwrap() {
        Err(RunnerError::AbortRequested) => {}
        other => panic!("expected AbortRequested, got {other:?}"),
    }

    // Subscribers observe abort_requested, then the terminal status the task
    // wrapper would publish.
    let status = next_of_type(&mut subscription.receiver, "runner_status").await;
    assert_eq!(status["message"], "abort_requested");

    state.finish(RunStatus::Aborted).await;
    state
        .publish(json!({"type": "runner_status", "message": "aborted"}))
        .await;
    let terminal = next_of_type(&mut subscription.receiver, "runner_status").await;
    assert_eq!(terminal["message"], "aborted");
    assert!(state.completed_at().await.is_some());
}

#[tokio::test]
async fn subscribers_see_publishes_in_order() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));
    let mut subscription = state.subscribe().await;

    for i in 0..100 {
        state
            .publish(json!({"type": "action_executed", "seq": i}))
            .await;
    }

    for expected in 0..100 {
        let message = subscription.receiver.recv().await.unwrap();
        assert_eq!(message["seq"], expected);
    }
}

#[tokio::test]
async fn late_joiner_bootstraps_before_new_traffic() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));

    state
        .publish(json!({"type": "runner_status", "message": "started"}))
        .await;
    state
        .publish(json!({"type": "runner_frame", "frame": "old"}))
        .await;
    state
        .publish(json!({"type": "runner_frame", "frame": "new"}))
        .await;

    let mut subscription = state.subscribe().await;
    state
        .publish(json!({"type": "step_started", "stepId": "s1"}))
        .await;

    let first = subscription.receiver.recv().await.unwrap();
    let second = subscription.receiver.recv().await.unwrap();
    let third = subscription.receiver.recv().await.unwrap();
    assert_eq!(first["type"], "runner_status");
    assert_eq!(second["type"], "runner_frame");
    assert_eq!(second["frame"], "new", "only the latest frame is replayed");
    assert_eq!(third["type"], "step_started");
}

#[tokio::test]
async fn only_one_safety_prompt_in_flight() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));
    let mut subscription = state.subscribe().await;

    let first_state = Arc::clone(&state);
    let first = tokio::spawn(async move {
        let hooks = RunStateHooks::new(first_state);
        hooks
            .request_confirmation(json!({"stepId": "s1", "action": "click_at", "args": {}}))
            .await
    });
    next_of_type(&mut subscription.receiver, "safety_prompt").await;

    let hooks = RunStateHooks::new(Arc::clone(&state));
    let second = hooks.request_confirmation(json!({"stepId": "s1"})).await;
    assert!(second.is_err(), "second confirmation must fail fast");

    state.resolve_confirmation(false).await;
    assert!(!first.await.unwrap().unwrap(), "decline reaches the runner");
}

#[tokio::test]
async fn checkpoints_come_from_the_stored_plan() {
    let mut checkpoints = CheckpointMap::new();
    checkpoints.insert(
        "s1".to_string(),
        vec![Checkpoint {
            png_base64: "abc".to_string(),
            label: Some("Greet".to_string()),
        }],
    );
    let state = Arc::new(RunState::new(stored(plan_with_variable(), checkpoints), None));
    let hooks = RunStateHooks::new(state);

    let found = hooks.get_checkpoints("s1").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].label.as_deref(), Some("Greet"));
    assert!(hooks.get_checkpoints("s2").await.is_empty());
}

#[tokio::test]
async fn registry_retains_finished_runs_until_ttl() {
    let registry = Arc::new(RunRegistry::new(RetentionConfig {
        completed_run_ttl: Duration::from_secs(300),
        sweep_interval: Duration::from_secs(3600),
    }));

    let run = registry
        .create(stored(plan_with_variable(), CheckpointMap::new()), None)
        .await;
    run.publish(json!({"type": "runner_frame", "frame": "png"}))
        .await;
    run.finish(RunStatus::Completed).await;

    // Within the TTL the run (and its last frame) stays queryable.
    assert_eq!(registry.sweep_once(Utc::now()).await, 0);
    let found = registry.get(&run.run_id).await.unwrap();
    assert_eq!(found.latest_frame().await.unwrap()["frame"], "png");

    // Past the TTL the sweeper drops it.
    let later = Utc::now() + chrono::Duration::seconds(301);
    assert_eq!(registry.sweep_once(later).await, 1);
    assert!(registry.get(&run.run_id).await.is_none());
}

#[tokio::test]
async fn abort_is_idempotent() {
    let state = Arc::new(RunState::new(stored(plan_with_variable(), CheckpointMap::new()), None));
    state.request_abort().await;
    state.request_abort().await;
    assert!(state.is_aborted());
}
