use std::sync::Arc;

use serde_json::{json, Value};

use crate::agent::{AgentObservation, ComputerUseAgent};
use crate::browser::{
    navigation::{ensure_scheme, wait_for_embedded_page},
    BrowserDriver, PageDriver,
};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::models::{Plan, PlanStep};
use crate::vars::{apply_plan_variables, coerce_variable, diagnose_missing, normalize_plan_variables};

use super::checkpoint::{best_match, checkpoint_fingerprints};
use super::hooks::{CursorHint, RunnerHooks};
use super::interpreter::apply_action;

/// Executes one plan inside an owned browser, delegating per-turn decisions
/// to the computer-use agent and reporting everything through the hooks.
pub struct PlanRunner {
    agent: Arc<ComputerUseAgent>,
    config: RunnerConfig,
}

impl PlanRunner {
    pub fn new(agent: Arc<ComputerUseAgent>, config: RunnerConfig) -> Self {
        Self { agent, config }
    }

    /// Run the plan to completion. The browser is closed on every exit path.
    pub async fn run(
        &self,
        plan: Plan,
        start_url: Option<String>,
        hooks: &dyn RunnerHooks,
    ) -> Result<(), RunnerError> {
        let mut driver = BrowserDriver::launch(self.config.viewport)
            .await
            .map_err(|e| RunnerError::failed(e.to_string()))?;
        let result = self
            .execute_with_browser(&driver, plan, start_url, hooks)
            .await;
        driver.close().await;
        result
    }

    async fn execute_with_browser(
        &self,
        driver: &BrowserDriver,
        plan: Plan,
        start_url: Option<String>,
        hooks: &dyn RunnerHooks,
    ) -> Result<(), RunnerError> {
        let page = driver
            .open_page(self.config.viewport)
            .await
            .map_err(|e| RunnerError::failed(e.to_string()))?;
        let result = self.drive(&page, plan, start_url, hooks).await;
        page.close().await;
        result
    }

    async fn drive(
        &self,
        page: &PageDriver,
        plan: Plan,
        start_url: Option<String>,
        hooks: &dyn RunnerHooks,
    ) -> Result<(), RunnerError> {
        hooks
            .publish_event(
                "runner_status",
                json!({"message": "browser_ready", "url": page.url().await}),
            )
            .await;

        if let Some(raw) = start_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let url = ensure_scheme(raw.trim());
            page.navigate(&url)
                .await
                .map_err(|e| RunnerError::failed(format!("Start url navigation failed: {e}")))?;
            wait_for_embedded_page(page, Some(&url), self.config.embedded_frame_timeout)
                .await
                .map_err(|e| RunnerError::failed(format!("Start url iframe not ready: {e}")))?;
            hooks
                .publish_event("navigate", json!({"kind": "start_url", "url": url}))
                .await;
        }

        self.emit_frame(hooks, page, None, None).await;

        let plan = self.prepare_plan_variables(plan, hooks).await?;

        let mut history: Vec<String> = Vec::new();
        for raw_step in &plan.steps {
            if hooks.is_aborted().await {
                return Err(RunnerError::AbortRequested);
            }
            let step = resolve_step(raw_step, &plan);
            hooks
                .publish_event(
                    "step_started",
                    json!({"stepId": step.id, "title": step.title}),
                )
                .await;
            if !step.instructions.trim().is_empty() {
                hooks
                    .publish_event(
                        "console",
                        json!({"role": "Plan instructions", "message": step.instructions}),
                    )
                    .await;
            }

            self.run_step(page, &plan, &step, &mut history, hooks).await?;

            hooks
                .publish_event("step_completed", json!({"stepId": step.id}))
                .await;
        }

        hooks
            .publish_event("run_completed", json!({"ok": true, "url": page.url().await}))
            .await;
        Ok(())
    }

    /// Resolve missing plan variables through the operator before any step
    /// runs. Replies are coerced; anything still missing afterwards fails the
    /// handshake.
    async fn prepare_plan_variables(
        &self,
        plan: Plan,
        hooks: &dyn RunnerHooks,
    ) -> Result<Plan, RunnerError> {
        let (plan, placeholders) = normalize_plan_variables(&plan);
        if placeholders.is_empty() {
            return Ok(plan);
        }
        let missing = diagnose_missing(&plan.vars, &placeholders);
        if missing.is_empty() {
            return Ok(plan);
        }

        hooks
            .publish_event(
                "console",
                json!({
                    "role": "Runner",
                    "message": format!("Awaiting variable values for: {}", missing.join(", ")),
                }),
            )
            .await;

        let payload = json!({
            "vars": missing
                .iter()
                .map(|name| {
                    let value = plan
                        .vars
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    json!({"name": name, "value": value})
                })
                .collect::<Vec<_>>()
        });

        if hooks.is_aborted().await {
            return Err(RunnerError::AbortRequested);
        }
        let provided = hooks.request_variables(payload).await?;
        if hooks.is_aborted().await {
            return Err(RunnerError::AbortRequested);
        }

        let mut sanitized = plan.vars.clone();
        let mut missing_after = Vec::new();
        for name in &missing {
            match provided.get(name).and_then(|raw| coerce_variable(raw)) {
                Some(value) => {
                    sanitized.insert(name.clone(), value);
                }
                None => missing_after.push(name.clone()),
            }
        }
        if !missing_after.is_empty() {
            missing_after.sort();
            return Err(RunnerError::VariableHandshake(format!(
                "Missing values for variables: {}",
                missing_after.join(", ")
            )));
        }

        let applied: serde_json::Map<String, Value> = missing
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    serde_json::to_value(&sanitized[name]).unwrap_or(Value::Null),
                )
            })
            .collect();
        let plan = plan.with_vars(sanitized);
        hooks
            .publish_event("variables_applied", json!({"vars": applied}))
            .await;
        Ok(plan)
    }

    /// The per-step decision loop: observe, decide, apply, and either finish
    /// immediately or keep going until the checkpoint matches or the turn
    /// budget runs out.
    async fn run_step(
        &self,
        page: &PageDriver,
        plan: &Plan,
        step: &PlanStep,
        history: &mut Vec<String>,
        hooks: &dyn RunnerHooks,
    ) -> Result<(), RunnerError> {
        let checkpoints = hooks.get_checkpoints(&step.id).await;
        let require_visual_match = !checkpoints.is_empty();
        let fingerprints = checkpoint_fingerprints(&checkpoints);

        for turn in 1..=self.config.max_turns_per_step {
            if hooks.is_aborted().await {
                return Err(RunnerError::AbortRequested);
            }

            let screenshot = page
                .screenshot_b64()
                .await
                .map_err(|e| RunnerError::failed(format!("Screenshot failed: {e}")))?;
            let observation = AgentObservation {
                goal: apply_plan_variables(&plan.name, &plan.vars),
                screenshot_b64: screenshot,
                url: page.url().await,
                turn,
                history: history.clone(),
                vars: plan.vars.clone(),
                step: step.clone(),
            };

            let decision = match self.agent.propose_actions(&observation).await {
                Ok(decision) => decision,
                Err(err) => {
                    if let RunnerError::AgentDecision {
                        prompt,
                        response_summary,
                        ..
                    } = &err
                    {
                        if let Some(prompt) = prompt {
                            hooks
                                .publish_event(
                                    "console",
                                    json!({"role": "ComputerUse prompt", "message": prompt}),
                                )
                                .await;
                        }
                        if let Some(summary) = response_summary {
                            hooks
                                .publish_event(
                                    "console",
                                    json!({"role": "ComputerUse response", "message": summary}),
                                )
                                .await;
                        }
                    }
                    return Err(err);
                }
            };

            hooks
                .publish_event(
                    "console",
                    json!({"role": "ComputerUse prompt", "message": decision.prompt}),
                )
                .await;
            hooks
                .publish_event(
                    "console",
                    json!({"role": "ComputerUse response", "message": decision.response_summary}),
                )
                .await;

            let mut turn_cursor: Option<CursorHint> = None;
            let mut action_failed = false;
            for action in &decision.actions {
                if action.safety_decision.as_deref() == Some("require_confirmation") {
                    let allowed = hooks
                        .request_confirmation(json!({
                            "stepId": step.id,
                            "action": action.name,
                            "args": action.args,
                        }))
                        .await?;
                    if !allowed {
                        return Err(RunnerError::failed("Action declined by operator"));
                    }
                }

                match apply_action(page, action, &self.config).await {
                    Ok(outcome) => {
                        turn_cursor = outcome.cursor.or(turn_cursor);
                        history.push(outcome.summary.clone());
                        hooks
                            .publish_event(
                                "action_executed",
                                json!({
                                    "stepId": step.id,
                                    "action": action.name,
                                    "args": action.args,
                                    "summary": outcome.summary,
                                }),
                            )
                            .await;
                        self.emit_frame(hooks, page, Some(&step.id), turn_cursor)
                            .await;
                    }
                    Err(RunnerError::Action(message)) => {
                        hooks
                            .publish_event(
                                "console",
                                json!({"role": "Runner", "message": format!("Action failed: {message}")}),
                            )
                            .await;
                        history.push(format!("error: {message}"));
                        action_failed = true;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }

            self.emit_frame(hooks, page, Some(&step.id), turn_cursor)
                .await;

            if action_failed {
                continue;
            }

            if !require_visual_match {
                // No checkpoint for this step: one successful turn completes it.
                return Ok(());
            }

            let latest = page
                .screenshot_b64()
                .await
                .map_err(|e| RunnerError::failed(format!("Screenshot failed: {e}")))?;
            let (score, label) = best_match(&latest, &fingerprints);
            let rounded = (score * 10_000.0).round() / 10_000.0;
            let mut evaluated = json!({
                "stepId": step.id,
                "score": rounded,
                "threshold": self.config.checkpoint_threshold,
            });
            if let Some(label) = &label {
                evaluated["label"] = json!(label);
            }
            hooks.publish_event("checkpoint_evaluated", evaluated).await;

            if score >= self.config.checkpoint_threshold {
                let mut matched = json!({"stepId": step.id, "score": rounded});
                if let Some(label) = &label {
                    matched["label"] = json!(label);
                }
                hooks.publish_event("checkpoint_matched", matched).await;
                return Ok(());
            }
        }

        Err(RunnerError::failed(format!(
            "Exceeded max turns for step {}",
            step.id
        )))
    }

    async fn emit_frame(
        &self,
        hooks: &dyn RunnerHooks,
        page: &PageDriver,
        step_id: Option<&str>,
        cursor: Option<CursorHint>,
    ) {
        match page.screenshot_b64().await {
            Ok(png) => hooks.publish_frame(png, step_id, cursor).await,
            Err(e) => tracing::debug!("Frame capture failed: {}", e),
        }
    }
}

/// Substitute plan variables into the step's visible text; unknown
/// placeholders stay verbatim.
fn resolve_step(step: &PlanStep, plan: &Plan) -> PlanStep {
    PlanStep {
        id: step.id.clone(),
        title: apply_plan_variables(&step.title, &plan.vars),
        instructions: apply_plan_variables(&step.instructions, &plan.vars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VarMap, VarValue};

    #[test]
    fn resolve_step_substitutes_title_and_instructions() {
        let mut vars = VarMap::new();
        vars.insert("person".to_string(), VarValue::text("Ada"));
        let plan = Plan {
            name: "Greet {person}".to_string(),
            vars,
            steps: vec![],
            start_url: None,
            has_variables: true,
        };
        let step = PlanStep {
            id: "s1".to_string(),
            title: "Greet {person}".to_string(),
            instructions: "Type hello {person} then {unknown}".to_string(),
        };
        let resolved = resolve_step(&step, &plan);
        assert_eq!(resolved.title, "Greet Ada");
        assert_eq!(resolved.instructions, "Type hello Ada then {unknown}");
    }
}
