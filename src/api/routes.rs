use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{health, plans, recordings, runs, teach};
use super::state::AppState;
use super::websocket::{runs_ws_handler, teach_ws_handler};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Teach mode
        .route("/teach/start", post(teach::start_teach))
        .route("/teach/stop", post(teach::stop_teach))
        .route("/ws/teach/:teach_id", get(teach_ws_handler))
        // Recordings
        .route("/recordings", get(recordings::list_recordings))
        .route("/recordings/start", post(recordings::start_recording))
        .route(
            "/recordings/:recording_id/keystrokes",
            post(recordings::append_keystrokes),
        )
        .route(
            "/recordings/:recording_id/stop",
            post(recordings::stop_recording),
        )
        .route(
            "/recordings/:recording_id/bundle",
            get(recordings::get_bundle),
        )
        .route(
            "/recordings/:recording_id/audio",
            delete(recordings::delete_audio),
        )
        // Plans
        .route("/plans/synthesize", post(plans::synthesize_plan))
        .route("/plans", get(plans::list_plans))
        .route("/plans/:plan_id", get(plans::get_plan))
        .route("/plans/:plan_id/save", post(plans::save_plan))
        // Runs
        .route("/runs/start", post(runs::start_run))
        .route("/runs/:run_id/abort", post(runs::abort_run))
        .route("/runs/:run_id/capture", post(runs::capture_run))
        .route("/ws/runs/:run_id", get(runs_ws_handler))
        .layer(cors)
        .with_state(state)
}
