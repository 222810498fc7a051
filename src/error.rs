use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while driving a run. Variants map 1:1 onto the terminal
/// statuses and recovery rules the runner enforces.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Cooperative cancellation; the run ends with status `aborted`.
    #[error("run aborted")]
    AbortRequested,

    /// The action agent returned nothing usable. Carries the prompt and a
    /// JSON summary of whatever function calls were observed so both can be
    /// surfaced to subscribers before the run fails.
    #[error("{message}")]
    AgentDecision {
        message: String,
        prompt: Option<String>,
        response_summary: Option<String>,
    },

    /// A single action failed at the browser. Recovered within the turn loop,
    /// never terminal by itself.
    #[error("{0}")]
    Action(String),

    /// The operator's variable reply was missing required values or malformed.
    #[error("{0}")]
    VariableHandshake(String),

    /// The embedded frame for the start URL never became ready.
    #[error("embedded frame did not finish loading before timeout{}", host_suffix(.expected_host))]
    EmbeddedFrameTimeout { expected_host: Option<String> },

    /// Any other unrecoverable runner condition.
    #[error("{0}")]
    Failed(String),
}

fn host_suffix(host: &Option<String>) -> String {
    match host {
        Some(h) => format!(" (expected host: {h})"),
        None => String::new(),
    }
}

impl RunnerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn action(message: impl Into<String>) -> Self {
        Self::Action(message.into())
    }

    /// Terminal status label for `runner_status` messages.
    pub fn terminal_status(&self) -> &'static str {
        match self {
            RunnerError::AbortRequested => "aborted",
            _ => "failed",
        }
    }
}

/// HTTP-facing error for the transport layer.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Browser automation error: {0}")]
    Browser(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            AppError::Browser(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Browser Error"),
            AppError::Synthesis(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Synthesis Error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
            detail: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_labels() {
        assert_eq!(RunnerError::AbortRequested.terminal_status(), "aborted");
        assert_eq!(RunnerError::failed("boom").terminal_status(), "failed");
        assert_eq!(
            RunnerError::Action("navigate requires a 'url' argument".into()).terminal_status(),
            "failed"
        );
    }

    #[test]
    fn embedded_frame_message_includes_host() {
        let err = RunnerError::EmbeddedFrameTimeout {
            expected_host: Some("example.com".into()),
        };
        assert!(err.to_string().contains("expected host: example.com"));

        let bare = RunnerError::EmbeddedFrameTimeout {
            expected_host: None,
        };
        assert!(!bare.to_string().contains("expected host"));
    }
}
