use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::error::RunnerError;
use crate::storage::StoredPlan;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Aborted | RunStatus::Failed
        )
    }
}

/// A live subscription to a run's event stream.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<Value>,
}

struct Inner {
    status: RunStatus,
    completed_at: Option<DateTime<Utc>>,
    next_subscriber_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<Value>)>,
    latest_status: Option<Value>,
    latest_frame: Option<Value>,
    pending_confirmation: Option<oneshot::Sender<bool>>,
    pending_variables: Option<oneshot::Sender<HashMap<String, Value>>>,
}

/// Per-run state: subscriber fan-out with late-joiner bootstrap, single-slot
/// operator handshakes, the abort signal, and the TTL marker.
///
/// All message pushes happen under the run's lock so every subscriber sees
/// messages in exact publish order; the queues are unbounded, so a slow
/// subscriber only ever costs the enqueue.
pub struct RunState {
    pub run_id: String,
    pub plan: Arc<StoredPlan>,
    pub start_url: Option<String>,
    pub created_at: DateTime<Utc>,
    aborted: AtomicBool,
    inner: Mutex<Inner>,
}

impl RunState {
    pub fn new(plan: Arc<StoredPlan>, start_url: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            plan,
            start_url,
            created_at: Utc::now(),
            aborted: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                status: RunStatus::Pending,
                completed_at: None,
                next_subscriber_id: 0,
                subscribers: Vec::new(),
                latest_status: None,
                latest_frame: None,
                pending_confirmation: None,
                pending_variables: None,
            }),
        }
    }

    /// Fan a message out to every subscriber, updating the latest-frame or
    /// latest-status pointer for late joiners.
    pub async fn publish(&self, message: Value) {
        let mut inner = self.inner.lock().await;
        if message.get("type").and_then(Value::as_str) == Some("runner_frame") {
            inner.latest_frame = Some(message.clone());
        } else {
            inner.latest_status = Some(message.clone());
        }
        inner
            .subscribers
            .retain(|(_, sender)| sender.send(message.clone()).is_ok());
    }

    /// Register a subscriber. It is bootstrapped with the latest status and
    /// then the latest frame before any newer message can reach it.
    pub async fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        if let Some(status) = &inner.latest_status {
            let _ = sender.send(status.clone());
        }
        if let Some(frame) = &inner.latest_frame {
            let _ = sender.send(frame.clone());
        }
        inner.subscribers.push((id, sender));
        Subscription { id, receiver }
    }

    pub async fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|(sid, _)| *sid != id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Ask the operator to allow an action. Fails fast when a confirmation is
    /// already outstanding; at most one safety prompt is in flight per run.
    pub async fn request_confirmation(&self, payload: Value) -> Result<bool, RunnerError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if inner.pending_confirmation.is_some() {
                return Err(RunnerError::failed("Confirmation already pending"));
            }
            inner.pending_confirmation = Some(sender);
        }
        self.publish(json!({"type": "safety_prompt", "payload": payload}))
            .await;

        let result = receiver.await;
        // Clear the slot even when the reply side dropped without resolving.
        self.inner.lock().await.pending_confirmation = None;
        result.map_err(|_| RunnerError::failed("Confirmation channel closed"))
    }

    /// Resolve the pending confirmation; a stray resolve with none pending is
    /// ignored.
    pub async fn resolve_confirmation(&self, allowed: bool) {
        let sender = self.inner.lock().await.pending_confirmation.take();
        if let Some(sender) = sender {
            let _ = sender.send(allowed);
        }
    }

    /// Ask the operator for variable values. An abort while waiting completes
    /// the request with `AbortRequested`.
    pub async fn request_variables(
        &self,
        payload: Value,
    ) -> Result<HashMap<String, Value>, RunnerError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if inner.pending_variables.is_some() {
                return Err(RunnerError::failed("Variable request already pending"));
            }
            inner.pending_variables = Some(sender);
        }
        self.publish(json!({"type": "variable_prompt", "payload": payload}))
            .await;

        let result = receiver.await;
        self.inner.lock().await.pending_variables = None;
        // The sender is dropped (not resolved) on abort.
        result.map_err(|_| RunnerError::AbortRequested)
    }

    pub async fn resolve_variables(&self, values: HashMap<String, Value>) {
        let sender = self.inner.lock().await.pending_variables.take();
        if let Some(sender) = sender {
            let _ = sender.send(values);
        }
    }

    /// Idempotent abort: sets the signal, fails any pending variable request,
    /// and tells subscribers. A pending confirmation is left for the operator
    /// to answer; the next abort check ends the run regardless.
    pub async fn request_abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().await;
            drop(inner.pending_variables.take());
        }
        self.publish(json!({"type": "runner_status", "message": "abort_requested"}))
            .await;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> RunStatus {
        self.inner.lock().await.status
    }

    pub async fn mark_running(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.status.is_terminal() {
            inner.status = RunStatus::Running;
        }
    }

    /// Transition to a terminal status. `completed_at` is set exactly once;
    /// later transitions are ignored.
    pub async fn finish(&self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        let mut inner = self.inner.lock().await;
        if inner.completed_at.is_none() {
            inner.status = status;
            inner.completed_at = Some(Utc::now());
        }
    }

    pub async fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.completed_at
    }

    /// Latest frame message, for the capture endpoint and latecomers.
    pub async fn latest_frame(&self) -> Option<Value> {
        self.inner.lock().await.latest_frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plan, VarMap};

    fn stored_plan() -> Arc<StoredPlan> {
        Arc::new(StoredPlan {
            plan_id: "p1".to_string(),
            recording_id: "r1".to_string(),
            plan: Plan {
                name: "test".to_string(),
                vars: VarMap::new(),
                steps: vec![],
                start_url: None,
                has_variables: false,
            },
            has_variables: false,
            prompt: None,
            raw_response: None,
            checkpoints: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn subscribers_receive_messages_in_publish_order() {
        let state = RunState::new(stored_plan(), None);
        let mut sub = state.subscribe().await;
        state.publish(json!({"type": "step_started", "stepId": "s1"})).await;
        state.publish(json!({"type": "step_completed", "stepId": "s1"})).await;

        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert_eq!(first["type"], "step_started");
        assert_eq!(second["type"], "step_completed");
    }

    #[tokio::test]
    async fn late_joiner_bootstraps_status_then_frame() {
        let state = RunState::new(stored_plan(), None);
        state
            .publish(json!({"type": "runner_status", "message": "started"}))
            .await;
        state
            .publish(json!({"type": "runner_frame", "frame": "png1"}))
            .await;
        state
            .publish(json!({"type": "runner_frame", "frame": "png2"}))
            .await;

        let mut sub = state.subscribe().await;
        let first = sub.receiver.recv().await.unwrap();
        let second = sub.receiver.recv().await.unwrap();
        assert_eq!(first["type"], "runner_status");
        assert_eq!(second["type"], "runner_frame");
        // Only the most recent frame is replayed, not older duplicates.
        assert_eq!(second["frame"], "png2");
    }

    #[tokio::test]
    async fn confirmation_is_single_slot() {
        let state = Arc::new(RunState::new(stored_plan(), None));

        let state_clone = Arc::clone(&state);
        let pending =
            tokio::spawn(async move { state_clone.request_confirmation(json!({})).await });
        // Give the first request time to claim the slot.
        tokio::task::yield_now().await;
        while state.inner.lock().await.pending_confirmation.is_none() {
            tokio::task::yield_now().await;
        }

        let second = state.request_confirmation(json!({})).await;
        assert!(second.is_err(), "second confirmation must fail fast");

        state.resolve_confirmation(true).await;
        assert!(pending.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn abort_fails_pending_variable_request() {
        let state = Arc::new(RunState::new(stored_plan(), None));
        let state_clone = Arc::clone(&state);
        let pending = tokio::spawn(async move { state_clone.request_variables(json!({})).await });
        while state.inner.lock().await.pending_variables.is_none() {
            tokio::task::yield_now().await;
        }

        state.request_abort().await;
        match pending.await.unwrap() {
            Err(RunnerError::AbortRequested) => {}
            other => panic!("expected AbortRequested, got {other:?}"),
        }
        assert!(state.is_aborted());
    }

    #[tokio::test]
    async fn finish_sets_completed_at_exactly_once() {
        let state = RunState::new(stored_plan(), None);
        state.finish(RunStatus::Completed).await;
        let first = state.completed_at().await.unwrap();
        state.finish(RunStatus::Failed).await;
        assert_eq!(state.completed_at().await.unwrap(), first);
        assert_eq!(state.status().await, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unsubscribe_drops_the_queue() {
        let state = RunState::new(stored_plan(), None);
        let sub = state.subscribe().await;
        assert_eq!(state.subscriber_count().await, 1);
        state.unsubscribe(sub.id).await;
        assert_eq!(state.subscriber_count().await, 0);
        // Publishing after unsubscribe is harmless.
        state.publish(json!({"type": "runner_status"})).await;
    }
}
