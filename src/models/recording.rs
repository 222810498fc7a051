use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One sampled screenshot from a teach session. Timestamps are seconds since
/// teach start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFrame {
    pub timestamp: f64,
    pub png: String,
}

/// A labeled moment in the recording timeline, used to align plan steps to
/// frames when deriving checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMarker {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One user action captured during a teach session. `data` is flattened onto
/// the wire so events serialize as `{"ts": ..., "kind": ..., ...payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachEvent {
    pub ts: f64,
    pub kind: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl TeachEvent {
    pub fn new(ts: f64, kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            ts,
            kind: kind.into(),
            data,
        }
    }
}

/// Everything a teach session produced: frames, markers, the event log, and
/// optional audio/transcript from the operator's narration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingBundle {
    #[serde(default)]
    pub frames: Vec<RecordingFrame>,
    #[serde(default)]
    pub markers: Vec<RecordingMarker>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(
        default,
        rename = "audioWavBase64",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_wav_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl RecordingBundle {
    pub fn has_audio(&self) -> bool {
        self.audio_wav_base64.is_some()
    }
}
