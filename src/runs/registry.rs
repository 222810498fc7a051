use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::RetentionConfig;
use crate::storage::StoredPlan;

use super::state::RunState;

/// Create/lookup/GC of runs. Finished runs stay queryable (last frame,
/// status) until the TTL expires; a background sweeper prunes them.
pub struct RunRegistry {
    retention: RetentionConfig,
    runs: Mutex<HashMap<String, Arc<RunState>>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RunRegistry {
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            retention,
            runs: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Insert a new run and make sure the sweeper is running.
    pub async fn create(
        self: &Arc<Self>,
        plan: Arc<StoredPlan>,
        start_url: Option<String>,
    ) -> Arc<RunState> {
        let state = Arc::new(RunState::new(plan, start_url));
        self.runs
            .lock()
            .await
            .insert(state.run_id.clone(), Arc::clone(&state));
        self.ensure_sweeper().await;
        state
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<RunState>> {
        self.runs.lock().await.get(run_id).map(Arc::clone)
    }

    pub async fn remove(&self, run_id: &str) {
        self.runs.lock().await.remove(run_id);
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }

    async fn ensure_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        let running = sweeper.as_ref().is_some_and(|task| !task.is_finished());
        if running {
            return;
        }
        let registry = Arc::downgrade(self);
        let interval = self.retention.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let removed = registry.sweep_once(Utc::now()).await;
                if removed > 0 {
                    tracing::debug!("Swept {} expired run(s)", removed);
                }
            }
        }));
    }

    /// Remove runs whose terminal timestamp is older than the TTL. Returns
    /// how many were dropped.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.retention.completed_run_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut runs = self.runs.lock().await;
        let mut expired = Vec::new();
        for (run_id, state) in runs.iter() {
            if let Some(completed_at) = state.completed_at().await {
                if now - completed_at > ttl {
                    expired.push(run_id.clone());
                }
            }
        }
        for run_id in &expired {
            runs.remove(run_id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Plan, VarMap};
    use crate::runs::RunStatus;
    use std::time::Duration;

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

    fn registry() -> Arc<RunRegistry> {
        Arc::new(RunRegistry::new(RetentionConfig {
            completed_run_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }))
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let registry = registry();
        let state = registry.create(stored_plan(), None).await;
        assert!(registry.get(&state.run_id).await.is_some());
        assert!(registry.get("nope").await.is_none());
        registry.remove(&state.run_id).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_keeps_active_and_fresh_runs() {
        let registry = registry();
        let active = registry.create(stored_plan(), None).await;
        let finished = registry.create(stored_plan(), None).await;
        finished.finish(RunStatus::Completed).await;

        // Fresh terminal run survives the sweep within the TTL.
        assert_eq!(registry.sweep_once(Utc::now()).await, 0);
        assert_eq!(registry.len().await, 2);

        // Past the TTL only the terminal run is removed.
        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(registry.sweep_once(later).await, 1);
        assert!(registry.get(&active.run_id).await.is_some());
        assert!(registry.get(&finished.run_id).await.is_none());
    }
}
