use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::{AppError, Result, RunnerError};
use crate::models::{
    RunAbortResponse, RunCaptureResponse, RunStartRequest, RunStartResponse, VarMap,
};
use crate::runs::{RunState, RunStatus};
use crate::vars::{coerce_variable, diagnose_missing, normalize_plan_variables};

use super::super::dispatcher::RunStateHooks;
use super::super::state::AppState;

/// Launch a run for a stored plan.
///
/// A caller that supplies a `variables` map gets synchronous validation:
/// placeholders still unfilled after the merge fail with 400. A caller that
/// omits it defers to the runner's interactive variable handshake.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunStartRequest>,
) -> Result<Json<RunStartResponse>> {
    let stored_plan = state.plans.get(&request.plan_id)?;

    let start_url = request
        .start_url
        .as_deref()
        .or(stored_plan.plan.start_url.as_deref())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    let (mut runtime_plan, placeholders) = normalize_plan_variables(&stored_plan.plan);

    if let Some(provided) = &request.variables {
        let mut sanitized = VarMap::new();
        for (name, raw) in provided {
            if let Some(value) = coerce_variable(raw) {
                sanitized.insert(name.clone(), value);
            }
        }
        let mut merged = runtime_plan.vars.clone();
        for (name, value) in sanitized {
            merged.insert(name, value);
        }
        let missing = diagnose_missing(&merged, &placeholders);
        if !missing.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Missing values for variables: {}",
                missing.join(", ")
            )));
        }
        runtime_plan = runtime_plan.with_vars(merged);
    }

    let run_state = state
        .registry
        .create(Arc::clone(&stored_plan), start_url.clone())
        .await;

    spawn_runner_task(&state, Arc::clone(&run_state), runtime_plan, start_url);

    run_state
        .publish(json!({
            "type": "runner_status",
            "message": "started",
            "runId": run_state.run_id,
            "planId": stored_plan.plan_id,
            "planHasVariables": stored_plan.has_variables,
        }))
        .await;

    Ok(Json(RunStartResponse {
        run_id: run_state.run_id.clone(),
    }))
}

/// Drive the plan in a background task. Every exit path publishes exactly
/// one terminal `runner_status` and stamps `completed_at`.
fn spawn_runner_task(
    state: &Arc<AppState>,
    run_state: Arc<RunState>,
    plan: crate::models::Plan,
    start_url: Option<String>,
) {
    let runner = state.plan_runner();
    tokio::spawn(async move {
        run_state.mark_running().await;
        let hooks = RunStateHooks::new(Arc::clone(&run_state));
        let result = runner.run(plan, start_url, &hooks).await;

        match result {
            Ok(()) => {
                run_state.finish(RunStatus::Completed).await;
                run_state
                    .publish(json!({"type": "runner_status", "message": "completed"}))
                    .await;
            }
            Err(RunnerError::AbortRequested) => {
                run_state.finish(RunStatus::Aborted).await;
                run_state
                    .publish(json!({"type": "runner_status", "message": "aborted"}))
                    .await;
            }
            Err(err) => {
                tracing::warn!("Run {} failed: {}", run_state.run_id, err);
                run_state.finish(RunStatus::Failed).await;
                run_state
                    .publish(json!({
                        "type": "runner_status",
                        "message": "failed",
                        "error": err.to_string(),
                    }))
                    .await;
            }
        }
    });
}

/// Request cooperative cancellation of a run.
pub async fn abort_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunAbortResponse>> {
    let run_state = state
        .registry
        .get(&run_id)
        .await
        .ok_or_else(|| AppError::NotFound("Run not found".into()))?;
    run_state.request_abort().await;
    Ok(Json(RunAbortResponse {
        run_id: run_state.run_id.clone(),
        status: "aborting".to_string(),
    }))
}

/// Latest frame captured by the run, if any.
pub async fn capture_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunCaptureResponse>> {
    let run_state = state
        .registry
        .get(&run_id)
        .await
        .ok_or_else(|| AppError::NotFound("Run not found".into()))?;

    let Some(latest) = run_state.latest_frame().await else {
        return Ok(Json(RunCaptureResponse {
            ok: false,
            frame: None,
            message: Some(
                "No screenshot available yet. The run may not have started rendering.".to_string(),
            ),
        }));
    };

    let Some(frame) = latest.get("frame").and_then(|f| f.as_str()) else {
        return Ok(Json(RunCaptureResponse {
            ok: false,
            frame: None,
            message: Some("Screenshot data is invalid or corrupted.".to_string()),
        }));
    };

    Ok(Json(RunCaptureResponse {
        ok: true,
        frame: Some(frame.to_string()),
        message: None,
    }))
}
