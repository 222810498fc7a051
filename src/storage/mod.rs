//! In-process keyed stores for recordings and plans.
//!
//! These implement the persistent-store contract the core consumes; swapping
//! in a durable backend only has to preserve these shapes and operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{CheckpointMap, Plan, RecordingBundle};
use crate::vars::normalize_plan_variables;

/// One stored recording: lifecycle metadata, the appended event log, and the
/// completed bundle once teach/stop finalized it.
#[derive(Debug, Clone)]
pub struct StoredRecording {
    pub recording_id: String,
    pub title: Option<String>,
    pub status: String,
    pub start_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub events: Vec<Value>,
    pub bundle: Option<RecordingBundle>,
}

#[derive(Default)]
pub struct RecordingStore {
    recordings: DashMap<String, StoredRecording>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recording. An explicit id lets teach sessions pre-allocate.
    pub fn start(
        &self,
        title: Option<String>,
        recording_id: Option<String>,
        start_url: Option<String>,
    ) -> StoredRecording {
        let now = Utc::now();
        let recording = StoredRecording {
            recording_id: recording_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            title,
            status: "recording".to_string(),
            start_url,
            created_at: now,
            updated_at: now,
            ended_at: None,
            events: Vec::new(),
            bundle: None,
        };
        self.recordings
            .insert(recording.recording_id.clone(), recording.clone());
        recording
    }

    pub fn exists(&self, recording_id: &str) -> bool {
        self.recordings.contains_key(recording_id)
    }

    pub fn get(&self, recording_id: &str) -> Result<StoredRecording, AppError> {
        self.recordings
            .get(recording_id)
            .map(|r| r.clone())
            .ok_or_else(|| AppError::NotFound("Recording not found".into()))
    }

    pub fn append_events(&self, recording_id: &str, events: Vec<Value>) -> Result<usize, AppError> {
        let mut entry = self
            .recordings
            .get_mut(recording_id)
            .ok_or_else(|| AppError::NotFound("Recording not found".into()))?;
        let count = events.len();
        entry.events.extend(events);
        entry.updated_at = Utc::now();
        Ok(count)
    }

    /// Finalize with the captured bundle; also used to rewrite the bundle
    /// (e.g. stripping audio).
    pub fn complete(
        &self,
        recording_id: &str,
        bundle: RecordingBundle,
    ) -> Result<StoredRecording, AppError> {
        let mut entry = self
            .recordings
            .get_mut(recording_id)
            .ok_or_else(|| AppError::NotFound("Recording not found".into()))?;
        let now = Utc::now();
        entry.bundle = Some(bundle);
        entry.status = "completed".to_string();
        entry.updated_at = now;
        entry.ended_at.get_or_insert(now);
        Ok(entry.clone())
    }

    pub fn list(&self) -> Vec<StoredRecording> {
        let mut all: Vec<StoredRecording> =
            self.recordings.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Full bundle payload with metadata, frames as base64 PNGs and events
    /// as a JSON list.
    pub fn bundle_payload(&self, recording_id: &str) -> Result<Value, AppError> {
        let recording = self.get(recording_id)?;
        let bundle = recording
            .bundle
            .as_ref()
            .map(|b| serde_json::to_value(b).unwrap_or(Value::Null))
            .unwrap_or(Value::Null);
        Ok(json!({
            "recordingId": recording.recording_id,
            "title": recording.title,
            "status": recording.status,
            "startUrl": recording.start_url,
            "createdAt": recording.created_at,
            "updatedAt": recording.updated_at,
            "bundle": bundle,
            "events": recording.events,
        }))
    }
}

/// One stored plan with its synthesis provenance and derived checkpoints.
#[derive(Debug, Clone)]
pub struct StoredPlan {
    pub plan_id: String,
    pub recording_id: String,
    pub plan: Plan,
    pub has_variables: bool,
    pub prompt: Option<String>,
    pub raw_response: Option<String>,
    pub checkpoints: CheckpointMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PlanStore {
    plans: DashMap<String, Arc<StoredPlan>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(
        &self,
        recording_id: &str,
        plan: Plan,
        prompt: Option<String>,
        raw_response: Option<String>,
        checkpoints: CheckpointMap,
    ) -> Arc<StoredPlan> {
        let (plan, placeholders) = normalize_plan_variables(&plan);
        let now = Utc::now();
        let stored = Arc::new(StoredPlan {
            plan_id: Uuid::new_v4().simple().to_string(),
            recording_id: recording_id.to_string(),
            has_variables: !placeholders.is_empty(),
            plan,
            prompt,
            raw_response,
            checkpoints,
            created_at: now,
            updated_at: now,
        });
        self.plans.insert(stored.plan_id.clone(), Arc::clone(&stored));
        stored
    }

    pub fn get(&self, plan_id: &str) -> Result<Arc<StoredPlan>, AppError> {
        self.plans
            .get(plan_id)
            .map(|p| Arc::clone(&p))
            .ok_or_else(|| AppError::NotFound("Plan not found".into()))
    }

    pub fn list(&self, recording_id: Option<&str>) -> Vec<Arc<StoredPlan>> {
        let mut all: Vec<Arc<StoredPlan>> = self
            .plans
            .iter()
            .filter(|p| recording_id.map_or(true, |id| p.recording_id == id))
            .map(|p| Arc::clone(&p))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Replace the plan body under an edited name; `has_variables` is
    /// recomputed from the new text.
    pub fn update(
        &self,
        plan_id: &str,
        name: &str,
        plan: Plan,
    ) -> Result<Arc<StoredPlan>, AppError> {
        let mut entry = self
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| AppError::NotFound("Plan not found".into()))?;
        let mut plan = plan;
        plan.name = name.to_string();
        let (plan, placeholders) = normalize_plan_variables(&plan);
        let updated = Arc::new(StoredPlan {
            plan_id: entry.plan_id.clone(),
            recording_id: entry.recording_id.clone(),
            has_variables: !placeholders.is_empty(),
            plan,
            prompt: entry.prompt.clone(),
            raw_response: entry.raw_response.clone(),
            checkpoints: entry.checkpoints.clone(),
            created_at: entry.created_at,
            updated_at: Utc::now(),
        });
        *entry = Arc::clone(&updated);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanStep;

    fn sample_plan(name: &str) -> Plan {
        Plan {
            name: name.to_string(),
            vars: Default::default(),
            steps: vec![PlanStep {
                id: "s1".to_string(),
                title: "Go".to_string(),
                instructions: String::new(),
            }],
            start_url: None,
            has_variables: false,
        }
    }

    #[test]
    fn recording_lifecycle() {
        let store = RecordingStore::new();
        let rec = store.start(Some("demo".into()), None, None);
        assert_eq!(rec.status, "recording");
        assert!(store.exists(&rec.recording_id));

        store
            .append_events(&rec.recording_id, vec![json!({"kind": "click"})])
            .unwrap();
        let completed = store
            .complete(&rec.recording_id, RecordingBundle::default())
            .unwrap();
        assert_eq!(completed.status, "completed");
        assert!(completed.ended_at.is_some());
        assert_eq!(completed.events.len(), 1);

        assert!(store.append_events("missing", vec![]).is_err());
    }

    #[test]
    fn plan_save_normalizes_variables() {
        let store = PlanStore::new();
        let stored = store.save("rec1", sample_plan("Visit {site}"), None, None, Default::default());
        assert!(stored.has_variables);
        assert!(stored.plan.vars.contains_key("site"));

        let fetched = store.get(&stored.plan_id).unwrap();
        assert_eq!(fetched.plan.name, "Visit {site}");
    }

    #[test]
    fn plan_update_recomputes_variables() {
        let store = PlanStore::new();
        let stored = store.save("rec1", sample_plan("Visit {site}"), None, None, Default::default());
        let updated = store
            .update(&stored.plan_id, "Visit home", sample_plan("Visit home"))
            .unwrap();
        assert!(!updated.has_variables);
        assert_eq!(updated.plan.name, "Visit home");
    }

    #[test]
    fn plan_list_filters_by_recording() {
        let store = PlanStore::new();
        store.save("rec1", sample_plan("a"), None, None, Default::default());
        store.save("rec2", sample_plan("b"), None, None, Default::default());
        assert_eq!(store.list(Some("rec1")).len(), 1);
        assert_eq!(store.list(None).len(), 2);
    }
}
