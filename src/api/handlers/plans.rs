use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{
    PlanDetailResponse, PlanListResponse, PlanSaveRequest, PlanSummaryItem,
    PlanSynthesisRequest, PlanSynthesisResponse,
};
use crate::synthesis::SynthesisContext;

use super::super::state::AppState;

/// Synthesize a plan from a completed recording.
pub async fn synthesize_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanSynthesisRequest>,
) -> Result<Json<PlanSynthesisResponse>> {
    let recording = state.recordings.get(&request.recording_id)?;
    let Some(bundle) = recording.bundle else {
        return Err(AppError::BadRequest("Recording has no frames yet".into()));
    };

    // The recorded start URL wins over whatever the caller passed.
    let context = SynthesisContext {
        plan_name: request.plan_name,
        start_url: recording.start_url.or(request.start_url),
        variable_hints: request.variable_hints,
    };

    let outcome = state.synthesizer.synthesize(&bundle, &context).await?;
    let stored = state.plans.save(
        &recording.recording_id,
        outcome.plan,
        Some(outcome.prompt.clone()),
        Some(outcome.raw_response.clone()),
        outcome.checkpoints,
    );

    Ok(Json(PlanSynthesisResponse {
        plan_id: stored.plan_id.clone(),
        recording_id: stored.recording_id.clone(),
        plan: stored.plan.clone(),
        has_variables: stored.has_variables,
        prompt: outcome.prompt,
        raw_response: outcome.raw_response,
        created_at: stored.created_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlanListQuery {
    #[serde(rename = "recordingId")]
    pub recording_id: Option<String>,
}

pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlanListQuery>,
) -> Result<Json<PlanListResponse>> {
    let plans = state
        .plans
        .list(query.recording_id.as_deref())
        .into_iter()
        .map(|stored| PlanSummaryItem {
            plan_id: stored.plan_id.clone(),
            recording_id: stored.recording_id.clone(),
            name: stored.plan.name.clone(),
            has_variables: stored.has_variables,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
        .collect();
    Ok(Json(PlanListResponse { plans }))
}

pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
) -> Result<Json<PlanDetailResponse>> {
    let stored = state.plans.get(&plan_id)?;
    Ok(Json(PlanDetailResponse {
        plan_id: stored.plan_id.clone(),
        recording_id: stored.recording_id.clone(),
        plan: stored.plan.clone(),
        has_variables: stored.has_variables,
        prompt: stored.prompt.clone(),
        raw_response: stored.raw_response.clone(),
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }))
}

/// Persist an edited plan under a (possibly new) name.
pub async fn save_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<String>,
    Json(request): Json<PlanSaveRequest>,
) -> Result<Json<serde_json::Value>> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Plan name must not be empty".into()));
    }
    let stored = state.plans.update(&plan_id, name, request.plan)?;
    Ok(Json(serde_json::json!({
        "planId": stored.plan_id,
        "name": stored.plan.name,
        "updatedAt": stored.updated_at,
        "plan": stored.plan,
        "hasVariables": stored.has_variables,
    })))
}
