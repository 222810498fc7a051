use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::RunnerError;
use crate::models::Checkpoint;

/// Pointer position hint for frame overlays, on the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CursorHint {
    pub x: f64,
    pub y: f64,
}

/// The surface the runner drives its surroundings through: event/frame
/// fan-out, abort polling, operator handshakes, and checkpoint lookup. The
/// transport layer implements this against a run's state.
#[async_trait]
pub trait RunnerHooks: Send + Sync {
    async fn publish_event(&self, event_type: &str, payload: Value);

    async fn publish_frame(
        &self,
        png_base64: String,
        step_id: Option<&str>,
        cursor: Option<CursorHint>,
    );

    async fn is_aborted(&self) -> bool;

    /// Ask the operator to allow a safety-flagged action. Fails when a
    /// confirmation is already outstanding.
    async fn request_confirmation(&self, payload: Value) -> Result<bool, RunnerError>;

    /// Ask the operator for variable values. Completes with `AbortRequested`
    /// when the run is aborted while waiting.
    async fn request_variables(
        &self,
        payload: Value,
    ) -> Result<HashMap<String, Value>, RunnerError>;

    /// Reference screenshots for a step, empty when none exist.
    async fn get_checkpoints(&self, step_id: &str) -> Vec<Checkpoint>;
}
