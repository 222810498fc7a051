use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::RunnerError;
use crate::models::Checkpoint;
use crate::runner::{CursorHint, RunnerHooks};
use crate::runs::RunState;

/// Bridges runner hooks onto a run's state: events become websocket
/// broadcasts, handshakes go through the run's single-slot channels, and
/// checkpoints come from the stored plan.
pub struct RunStateHooks {
    state: Arc<RunState>,
}

impl RunStateHooks {
    pub fn new(state: Arc<RunState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RunnerHooks for RunStateHooks {
    async fn publish_event(&self, event_type: &str, payload: Value) {
        let mut message = json!({"type": event_type});
        if let (Some(target), Some(source)) = (message.as_object_mut(), payload.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        self.state.publish(message).await;
    }

    async fn publish_frame(
        &self,
        png_base64: String,
        step_id: Option<&str>,
        cursor: Option<CursorHint>,
    ) {
        let mut message = json!({
            "type": "runner_frame",
            "frame": png_base64,
            "stepId": step_id,
        });
        if let Some(cursor) = cursor {
            message["cursor"] = json!({"x": cursor.x, "y": cursor.y});
        }
        self.state.publish(message).await;
    }

    async fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    async fn request_confirmation(&self, payload: Value) -> Result<bool, RunnerError> {
        self.state.request_confirmation(payload).await
    }

    async fn request_variables(
        &self,
        payload: Value,
    ) -> Result<HashMap<String, Value>, RunnerError> {
        self.state.request_variables(payload).await
    }

    async fn get_checkpoints(&self, step_id: &str) -> Vec<Checkpoint> {
        self.state
            .plan
            .checkpoints
            .get(step_id)
            .cloned()
            .unwrap_or_default()
    }
}
