//! Deterministic prompt construction and response parsing for the
//! computer-use agent. Kept free of the LLM client so both directions of the
//! contract are unit-testable.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::RunnerError;
use crate::models::{PlanStep, VarMap};

use super::{AgentAction, AgentDecision, AgentObservation};

/// Action names the interpreter understands.
pub const SUPPORTED_ACTIONS: [&str; 12] = [
    "navigate",
    "click_at",
    "type_text_at",
    "hover_at",
    "wait_5_seconds",
    "go_back",
    "go_forward",
    "search",
    "scroll_document",
    "scroll_at",
    "drag_and_drop",
    "key_combination",
];

fn alias_for(name: &str) -> Option<&'static str> {
    match name {
        "open_web_browser" | "open_url" => Some("navigate"),
        _ => None,
    }
}

fn is_supported(name: &str) -> bool {
    SUPPORTED_ACTIONS.contains(&name)
}

/// A raw structured function call as returned by the model, before
/// validation.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Build the turn prompt. Order is part of the contract: goal, URL, turn,
/// variables, step, instructions, then the last five history entries.
pub fn build_prompt(observation: &AgentObservation) -> String {
    let mut lines = vec![
        format!("Overall goal: {}", observation.goal),
        format!("Current URL: {}", observation.url),
        format!("Turn: {}", observation.turn),
        format!(
            "Plan variables: {}",
            serde_json::to_string(&observation.vars).unwrap_or_else(|_| "{}".to_string())
        ),
        format!(
            "Step JSON: {}",
            serde_json::to_string(&observation.step).unwrap_or_else(|_| "{}".to_string())
        ),
    ];
    if !observation.step.instructions.trim().is_empty() {
        lines.push(format!("Instructions: {}", observation.step.instructions));
    }
    if !observation.history.is_empty() {
        lines.push("Recent actions:".to_string());
        let start = observation.history.len().saturating_sub(5);
        for item in &observation.history[start..] {
            lines.push(format!("- {item}"));
        }
    }
    lines.join("\n")
}

fn url_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"https?://[^\s)]+").expect("absolute url pattern"),
            Regex::new(r"\b(?:www\.)?[A-Za-z0-9.-]+\.[A-Za-z]{2,}(?:/[^\s)]*)?")
                .expect("bare host pattern"),
        )
    })
}

/// Salvage a URL from free text: first an absolute `http(s)` URL, then a bare
/// `host.tld[/path]` prefixed with `http://`. Trailing punctuation is
/// trimmed.
pub fn extract_first_url(text: &str) -> Option<String> {
    let (absolute, bare) = url_patterns();
    if let Some(m) = absolute.find(text) {
        return Some(m.as_str().trim_end_matches(['.', ',', ')']).to_string());
    }
    if let Some(m) = bare.find(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ')']);
        if url.to_ascii_lowercase().starts_with("http") {
            return Some(url.to_string());
        }
        return Some(format!("http://{url}"));
    }
    None
}

fn summarize_calls(calls: &[FunctionCall]) -> String {
    let entries: Vec<Value> = calls
        .iter()
        .map(|call| json!({"name": call.name, "args": call.args}))
        .collect();
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

fn summarize_actions(actions: &[AgentAction]) -> String {
    let entries: Vec<Value> = actions
        .iter()
        .map(|action| {
            let mut entry = json!({"name": action.name, "args": action.args});
            if let Some(safety) = &action.safety_decision {
                entry["safety_decision"] = json!(safety);
            }
            entry
        })
        .collect();
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Validate and normalize the model's function calls into a decision.
///
/// Unsupported names are aliased where possible (`open_web_browser` /
/// `open_url` become `navigate`, with the URL salvaged from the step
/// instructions or `vars["url"]` when absent) and otherwise skipped. A
/// `safety_decision` key is lifted out of the args. An empty result after
/// filtering is an agent-decision failure carrying the prompt and a summary
/// of everything that was observed.
pub fn parse_decision(
    prompt: String,
    calls: Vec<FunctionCall>,
    step: &PlanStep,
    vars: &VarMap,
) -> Result<AgentDecision, RunnerError> {
    let mut actions = Vec::new();

    for call in &calls {
        let mut name = call.name.clone();
        let mut args = call.args.clone();

        if !is_supported(&name) {
            let Some(alias) = alias_for(&name) else {
                tracing::info!("Ignoring unsupported agent action '{}'", name);
                continue;
            };
            tracing::info!("Mapping agent action '{}' to '{}'", name, alias);
            name = alias.to_string();
            if name == "navigate" && !args.contains_key("url") {
                let salvaged = extract_first_url(&step.instructions).or_else(|| {
                    vars.get("url")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                });
                if let Some(url) = salvaged {
                    args.insert("url".to_string(), json!(url));
                }
            }
        }

        let safety_decision = match args.remove("safety_decision") {
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        };

        actions.push(AgentAction {
            name,
            args,
            safety_decision,
        });
    }

    if actions.is_empty() {
        return Err(RunnerError::AgentDecision {
            message: "Agent returned no supported actions".to_string(),
            prompt: Some(prompt),
            response_summary: Some(summarize_calls(&calls)),
        });
    }

    let response_summary = summarize_actions(&actions);
    Ok(AgentDecision {
        prompt,
        response_summary,
        actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VarValue;

    fn step(instructions: &str) -> PlanStep {
        PlanStep {
            id: "s1".to_string(),
            title: "Visit".to_string(),
            instructions: instructions.to_string(),
        }
    }

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            name: name.to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn prompt_contains_sections_in_order() {
        let observation = AgentObservation {
            goal: "Say hi to Ada".to_string(),
            screenshot_b64: String::new(),
            url: "https://example.com".to_string(),
            turn: 2,
            history: (1..=7).map(|i| format!("action {i}")).collect(),
            vars: VarMap::new(),
            step: step("Type hello"),
        };
        let prompt = build_prompt(&observation);
        let goal_pos = prompt.find("Overall goal:").unwrap();
        let url_pos = prompt.find("Current URL:").unwrap();
        let turn_pos = prompt.find("Turn: 2").unwrap();
        assert!(goal_pos < url_pos && url_pos < turn_pos);
        // Only the last five history lines survive.
        assert!(!prompt.contains("- action 2"));
        assert!(prompt.contains("- action 3"));
        assert!(prompt.contains("- action 7"));
    }

    #[test]
    fn url_extraction() {
        assert_eq!(
            extract_first_url("visit https://example.com/page."),
            Some("https://example.com/page".to_string())
        );
        assert_eq!(
            extract_first_url("open example.com/start then wait"),
            Some("http://example.com/start".to_string())
        );
        assert_eq!(extract_first_url("no links here"), None);
    }

    #[test]
    fn alias_maps_and_salvages_url_from_instructions() {
        let calls = vec![
            call("open_web_browser", json!({})),
            call("click_at", json!({"x": 500, "y": 500})),
        ];
        let decision = parse_decision(
            "p".to_string(),
            calls,
            &step("visit https://example.com"),
            &VarMap::new(),
        )
        .unwrap();
        assert_eq!(decision.actions.len(), 2);
        assert_eq!(decision.actions[0].name, "navigate");
        assert_eq!(
            decision.actions[0].args.get("url"),
            Some(&json!("https://example.com"))
        );
        assert_eq!(decision.actions[1].name, "click_at");
    }

    #[test]
    fn alias_falls_back_to_url_variable() {
        let mut vars = VarMap::new();
        vars.insert("url".to_string(), VarValue::text("https://fallback.dev"));
        let decision = parse_decision(
            "p".to_string(),
            vec![call("open_url", json!({}))],
            &step("no links"),
            &vars,
        )
        .unwrap();
        assert_eq!(
            decision.actions[0].args.get("url"),
            Some(&json!("https://fallback.dev"))
        );
    }

    #[test]
    fn safety_decision_is_lifted_out_of_args() {
        let decision = parse_decision(
            "p".to_string(),
            vec![call(
                "click_at",
                json!({"x": 1, "y": 2, "safety_decision": "require_confirmation"}),
            )],
            &step(""),
            &VarMap::new(),
        )
        .unwrap();
        let action = &decision.actions[0];
        assert_eq!(
            action.safety_decision.as_deref(),
            Some("require_confirmation")
        );
        assert!(!action.args.contains_key("safety_decision"));
        assert!(decision.response_summary.contains("require_confirmation"));
    }

    #[test]
    fn empty_decision_fails_with_candidate_summary() {
        let err = parse_decision(
            "the prompt".to_string(),
            vec![call("do_a_barrel_roll", json!({"speed": 9}))],
            &step(""),
            &VarMap::new(),
        )
        .unwrap_err();
        match err {
            RunnerError::AgentDecision {
                prompt,
                response_summary,
                ..
            } => {
                assert_eq!(prompt.as_deref(), Some("the prompt"));
                let summary = response_summary.unwrap();
                assert!(summary.contains("do_a_barrel_roll"));
                assert!(summary.contains("speed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
