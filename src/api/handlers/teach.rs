use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    RecordingBundle, TeachStartRequest, TeachStartResponse, TeachStopRequest, TeachStopResponse,
};

use super::super::state::AppState;

/// Begin a teach session: launch the browser, register the recording.
pub async fn start_teach(
    State(state): State<Arc<AppState>>,
    request: Option<Json<TeachStartRequest>>,
) -> Result<Json<TeachStartResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let recording_id = Uuid::new_v4().simple().to_string();

    let session = state
        .teach
        .start(&recording_id, request.start_url.as_deref())
        .await?;
    state
        .recordings
        .start(None, Some(recording_id.clone()), request.start_url.clone());

    Ok(Json(TeachStartResponse {
        teach_id: session.teach_id.clone(),
        recording_id,
        viewport: state.teach.viewport(),
        thumbnail: None,
    }))
}

/// End the active teach session and persist its bundle for synthesis.
pub async fn stop_teach(
    State(state): State<Arc<AppState>>,
    request: Option<Json<TeachStopRequest>>,
) -> Result<Json<TeachStopResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let outcome = state.teach.stop(None).await?;

    let events: Vec<Value> = outcome
        .events
        .iter()
        .filter_map(|e| serde_json::to_value(e).ok())
        .collect();
    state
        .recordings
        .append_events(&outcome.recording_id, events.clone())?;

    let audio_wav_base64 = request
        .audio_wav_base64
        .filter(|audio| !audio.is_empty());
    if let Some(audio) = &audio_wav_base64 {
        tracing::info!(
            "Received audio data from teach session ({} chars)",
            audio.len()
        );
    }

    let has_audio = audio_wav_base64.is_some();
    let bundle = RecordingBundle {
        frames: outcome.frames.clone(),
        markers: Vec::new(),
        events: events.clone(),
        audio_wav_base64,
        transcript: None,
    };
    let stored = state.recordings.complete(&outcome.recording_id, bundle)?;

    let frames = stored
        .bundle
        .as_ref()
        .map(|b| {
            b.frames
                .iter()
                .filter_map(|f| serde_json::to_value(f).ok())
                .collect()
        })
        .unwrap_or_default();

    Ok(Json(TeachStopResponse {
        recording_id: stored.recording_id,
        frames,
        markers: Vec::new(),
        events,
        has_audio,
    }))
}
