use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::{RecordingFrame, RecordingMarker};

#[derive(Debug, Default, Deserialize)]
pub struct TeachStartRequest {
    #[serde(default, rename = "startUrl")]
    pub start_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TeachStopRequest {
    #[serde(default, rename = "audioWavBase64")]
    pub audio_wav_base64: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordingStartRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventBatch {
    pub events: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordingStopRequest {
    #[serde(default)]
    pub frames: Vec<RecordingFrame>,
    #[serde(default)]
    pub markers: Vec<RecordingMarker>,
    #[serde(default, rename = "audioWavBase64")]
    pub audio_wav_base64: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanSynthesisRequest {
    #[serde(rename = "recordingId")]
    pub recording_id: String,
    #[serde(default, rename = "planName")]
    pub plan_name: Option<String>,
    #[serde(default, rename = "startUrl")]
    pub start_url: Option<String>,
    #[serde(default, rename = "variableHints")]
    pub variable_hints: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlanSaveRequest {
    pub name: String,
    pub plan: super::Plan,
}

#[derive(Debug, Deserialize)]
pub struct RunStartRequest {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(default, rename = "startUrl")]
    pub start_url: Option<String>,
    #[serde(default)]
    pub variables: Option<HashMap<String, Value>>,
}
