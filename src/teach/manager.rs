use std::sync::Arc;

use tokio::sync::Mutex;

use crate::browser::{navigation::ensure_scheme, BrowserDriver};
use crate::config::TeachConfig;
use crate::error::AppError;
use crate::models::{RecordingFrame, TeachEvent, Viewport};

use super::session::TeachSession;

/// What `stop` hands back for bundle assembly.
#[derive(Debug)]
pub struct TeachStopOutcome {
    pub recording_id: String,
    pub teach_id: String,
    pub frames: Vec<RecordingFrame>,
    pub events: Vec<TeachEvent>,
}

/// Owns the single active teach session. One session at a time keeps browser
/// accounting trivial; a second `start` while one is live is rejected.
pub struct TeachManager {
    config: TeachConfig,
    viewport: Viewport,
    active: Mutex<Option<Arc<TeachSession>>>,
}

impl TeachManager {
    pub fn new(config: TeachConfig, viewport: Viewport) -> Self {
        Self {
            config,
            viewport,
            active: Mutex::new(None),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Launch a browser for a new session, optionally navigating to the
    /// start URL (scheme auto-prefixed).
    pub async fn start(
        &self,
        recording_id: &str,
        start_url: Option<&str>,
    ) -> Result<Arc<TeachSession>, AppError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(AppError::Conflict("teach session already active".into()));
        }

        let driver = BrowserDriver::launch(self.viewport)
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?;
        let page = driver
            .open_page(self.viewport)
            .await
            .map_err(|e| AppError::Browser(e.to_string()))?;

        if let Some(url) = start_url.filter(|u| !u.trim().is_empty()) {
            let url = ensure_scheme(url.trim());
            page.navigate(&url)
                .await
                .map_err(|e| AppError::Browser(e.to_string()))?;
        }

        let teach_id = format!("teach_{}", chrono::Utc::now().timestamp_millis());
        let session = Arc::new(TeachSession::new(
            teach_id,
            recording_id.to_string(),
            driver,
            page,
            &self.config,
        ));
        *active = Some(Arc::clone(&session));

        tracing::info!(
            "Teach session {} started (recording={})",
            session.teach_id,
            recording_id
        );
        Ok(session)
    }

    pub async fn get(&self, teach_id: &str) -> Option<Arc<TeachSession>> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|s| s.teach_id == teach_id)
            .map(Arc::clone)
    }

    /// Pop the active session (or the named one), capture a final frame,
    /// tear down the browser, and return the recorded parts. Cleanup never
    /// fails; a missing session is the only error.
    pub async fn stop(&self, teach_id: Option<&str>) -> Result<TeachStopOutcome, AppError> {
        let session = {
            let mut active = self.active.lock().await;
            match (&*active, teach_id) {
                (Some(current), Some(requested)) if current.teach_id != requested => {
                    return Err(AppError::BadRequest("no such session".into()));
                }
                (Some(_), _) => active.take().unwrap(),
                (None, _) => return Err(AppError::BadRequest("no active session".into())),
            }
        };

        let (frames, events) = session.finish().await;
        tracing::info!("Teach session {} stopped", session.teach_id);
        Ok(TeachStopOutcome {
            recording_id: session.recording_id.clone(),
            teach_id: session.teach_id.clone(),
            frames,
            events,
        })
    }
}
