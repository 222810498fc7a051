use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{Plan, Viewport};

#[derive(Debug, Serialize)]
pub struct TeachStartResponse {
    #[serde(rename = "teachId")]
    pub teach_id: String,
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub viewport: Viewport,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TeachStopResponse {
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub frames: Vec<Value>,
    pub markers: Vec<Value>,
    pub events: Vec<Value>,
    #[serde(rename = "hasAudio")]
    pub has_audio: bool,
}

#[derive(Debug, Serialize)]
pub struct RecordingStartResponse {
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub title: Option<String>,
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RecordingSummary {
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub title: Option<String>,
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RecordingListResponse {
    pub recordings: Vec<RecordingSummary>,
}

#[derive(Debug, Serialize)]
pub struct PlanSynthesisResponse {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub plan: Plan,
    #[serde(rename = "hasVariables")]
    pub has_variables: bool,
    pub prompt: String,
    #[serde(rename = "rawResponse")]
    pub raw_response: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PlanSummaryItem {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub name: String,
    #[serde(rename = "hasVariables")]
    pub has_variables: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<PlanSummaryItem>,
}

#[derive(Debug, Serialize)]
pub struct PlanDetailResponse {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    pub plan: Plan,
    #[serde(rename = "hasVariables")]
    pub has_variables: bool,
    pub prompt: Option<String>,
    #[serde(rename = "rawResponse")]
    pub raw_response: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RunStartResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunAbortResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RunCaptureResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
