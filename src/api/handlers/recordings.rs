use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{
    EventBatch, RecordingBundle, RecordingListResponse, RecordingStartRequest,
    RecordingStartResponse, RecordingStopRequest, RecordingSummary,
};

use super::super::state::AppState;

/// List all recordings, most recent first.
pub async fn list_recordings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecordingListResponse>> {
    let recordings = state
        .recordings
        .list()
        .into_iter()
        .map(|rec| RecordingSummary {
            recording_id: rec.recording_id,
            title: rec.title,
            status: rec.status,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
            ended_at: rec.ended_at,
        })
        .collect();
    Ok(Json(RecordingListResponse { recordings }))
}

/// Register a recording ahead of event/frame uploads.
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    request: Option<Json<RecordingStartRequest>>,
) -> Result<Json<RecordingStartResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let stored = state.recordings.start(request.title, None, None);
    Ok(Json(RecordingStartResponse {
        recording_id: stored.recording_id,
        title: stored.title,
        status: stored.status,
        created_at: stored.created_at,
    }))
}

/// Append a batch of captured events.
pub async fn append_keystrokes(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    Json(batch): Json<EventBatch>,
) -> Result<Json<Value>> {
    let count = state.recordings.append_events(&recording_id, batch.events)?;
    Ok(Json(json!({"ok": true, "count": count})))
}

/// Finalize a recording with its uploaded bundle parts.
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    request: Option<Json<RecordingStopRequest>>,
) -> Result<Json<Value>> {
    // Validate existence before accepting the payload.
    state.recordings.get(&recording_id)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let audio_available = request.audio_wav_base64.is_some();
    let bundle = RecordingBundle {
        frames: request.frames,
        markers: request.markers,
        events: Vec::new(),
        audio_wav_base64: request.audio_wav_base64,
        transcript: request.transcript.clone(),
    };
    let stored = state.recordings.complete(&recording_id, bundle)?;
    let bundle = stored.bundle.as_ref().unwrap();

    let frames: Vec<Value> = bundle
        .frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            json!({"index": index, "timestamp": frame.timestamp, "png": frame.png})
        })
        .collect();
    let markers: Vec<Value> = bundle
        .markers
        .iter()
        .filter_map(|m| serde_json::to_value(m).ok())
        .collect();

    Ok(Json(json!({
        "recordingId": stored.recording_id,
        "title": stored.title,
        "status": stored.status,
        "frames": frames,
        "markers": markers,
        "audioAvailable": audio_available,
        "transcript": request.transcript,
        "updatedAt": stored.updated_at,
    })))
}

/// Full bundle payload with metadata.
pub async fn get_bundle(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(state.recordings.bundle_payload(&recording_id)?))
}

/// Strip audio from a completed recording while preserving the transcript.
pub async fn delete_audio(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
) -> Result<Json<Value>> {
    let stored = state.recordings.get(&recording_id)?;
    let Some(bundle) = stored.bundle else {
        return Err(AppError::BadRequest("Recording has no bundle".into()));
    };

    if bundle.audio_wav_base64.is_none() {
        return Ok(Json(json!({
            "ok": true,
            "message": "No audio data to delete",
            "had_transcript": bundle.transcript.is_some(),
        })));
    }

    let transcript_preserved = bundle.transcript.is_some();
    let stripped = RecordingBundle {
        audio_wav_base64: None,
        ..bundle
    };
    state.recordings.complete(&recording_id, stripped)?;

    Ok(Json(json!({
        "ok": true,
        "message": "Audio data deleted successfully",
        "transcript_preserved": transcript_preserved,
    })))
}
