//! Plan synthesis: recording bundle -> structured plan.
//!
//! The `PlanSynthesis` trait is the named interface the core consumes; the
//! default implementation summarizes the recorded interactions into cues,
//! asks a multimodal model for a JSON plan, and derives per-step visual
//! checkpoints from the recorded frames.

use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatRequest, ContentPart};
use genai::Client;
use serde_json::Value;

use crate::error::AppError;
use crate::models::{CheckpointMap, Plan, RecordingBundle};
use crate::runner::checkpoint::derive_step_checkpoints;
use crate::vars::normalize_plan_variables;

/// Caller-supplied knobs for one synthesis request.
#[derive(Debug, Default, Clone)]
pub struct SynthesisContext {
    pub plan_name: Option<String>,
    pub start_url: Option<String>,
    pub variable_hints: Option<String>,
}

/// What synthesis hands back: the plan, the exact prompt and raw response
/// for provenance, and derived checkpoints keyed by step id.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub plan: Plan,
    pub prompt: String,
    pub raw_response: String,
    pub checkpoints: CheckpointMap,
}

#[async_trait]
pub trait PlanSynthesis: Send + Sync {
    async fn synthesize(
        &self,
        bundle: &RecordingBundle,
        context: &SynthesisContext,
    ) -> Result<SynthesisOutcome, AppError>;
}

const MAX_EVENT_CUES: usize = 80;

/// Compress the raw event log into one-line interaction cues for the prompt.
/// Consecutive scrolls are folded into a single cue.
pub fn summarize_events(events: &[Value], limit: usize) -> Vec<String> {
    let mut cues = Vec::new();
    let mut scroll_dx = 0i64;
    let mut scroll_dy = 0i64;
    let mut scroll_count = 0usize;

    let locator = |ev: &Value| -> String {
        ev.get("selector")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .or_else(|| {
                ev.get("actionable")
                    .or_else(|| ev.get("element"))
                    .and_then(|el| el.get("name").or_else(|| el.get("cssPath")))
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "unknown target".to_string())
    };

    let flush_scroll = |cues: &mut Vec<String>,
                        scroll_dx: &mut i64,
                        scroll_dy: &mut i64,
                        scroll_count: &mut usize| {
        if *scroll_count > 0 {
            cues.push(format!(
                "scroll x{} (total dx={}, dy={})",
                scroll_count, scroll_dx, scroll_dy
            ));
            *scroll_dx = 0;
            *scroll_dy = 0;
            *scroll_count = 0;
        }
    };

    for ev in events {
        let kind = ev.get("kind").and_then(Value::as_str).unwrap_or("");
        match kind {
            "scroll" => {
                scroll_dx += ev.get("deltaX").and_then(Value::as_i64).unwrap_or(0);
                scroll_dy += ev.get("deltaY").and_then(Value::as_i64).unwrap_or(0);
                scroll_count += 1;
            }
            "click" => {
                flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
                let x = ev.get("x").and_then(Value::as_f64).unwrap_or(0.0);
                let y = ev.get("y").and_then(Value::as_f64).unwrap_or(0.0);
                cues.push(format!(
                    "click {} at ({}, {})",
                    locator(ev),
                    x as i64,
                    y as i64
                ));
            }
            "drag" => {
                flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
                cues.push(format!(
                    "drag from {} to {}",
                    ev.get("start").map(|v| v.to_string()).unwrap_or_default(),
                    ev.get("end").map(|v| v.to_string()).unwrap_or_default()
                ));
            }
            "keydown" => {
                flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
                if let Some(combo) = ev.get("combo").and_then(Value::as_str) {
                    cues.push(format!("press {combo}"));
                } else if let Some(key) = ev.get("key").and_then(Value::as_str) {
                    cues.push(format!("press {key}"));
                }
            }
            "key_hold" => {
                flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
                if let (Some(key), Some(duration)) = (
                    ev.get("key").and_then(Value::as_str),
                    ev.get("duration").and_then(Value::as_f64),
                ) {
                    if duration >= 0.5 {
                        cues.push(format!("hold {key} for {duration:.1}s"));
                    }
                }
            }
            "dom_probe" => {
                flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
                cues.push(format!("inspected {}", locator(ev)));
            }
            _ => {}
        }
        if cues.len() >= limit {
            break;
        }
    }
    flush_scroll(&mut cues, &mut scroll_dx, &mut scroll_dy, &mut scroll_count);
    cues.truncate(limit);
    cues
}

/// Deterministic synthesis prompt.
pub fn build_synthesis_prompt(
    bundle: &RecordingBundle,
    context: &SynthesisContext,
    cues: &[String],
) -> String {
    let mut lines = vec![
        "You are given a recorded browser demonstration. Produce an automation plan as pure JSON \
         with this shape:"
            .to_string(),
        r#"{"name": str, "startUrl": str|null, "vars": {name: value}, "steps": [{"id": str, "title": str, "instructions": str}]}"#
            .to_string(),
        "Rules: step ids are s1, s2, ... in order; instructions are natural-language guidance for \
         a browser agent; reusable values (names, search terms, amounts) become {placeholders} \
         referenced from vars. Respond with JSON only."
            .to_string(),
    ];
    if let Some(name) = &context.plan_name {
        lines.push(format!("Preferred plan name: {name}"));
    }
    if let Some(url) = &context.start_url {
        lines.push(format!("Start URL: {url}"));
    }
    if let Some(hints) = &context.variable_hints {
        lines.push(format!("Variable hints: {hints}"));
    }
    if let Some(transcript) = &bundle.transcript {
        lines.push(format!("Narration transcript: {transcript}"));
    }
    lines.push(format!(
        "Recording: {} frames, {} markers, {} events.",
        bundle.frames.len(),
        bundle.markers.len(),
        bundle.events.len()
    ));
    if !cues.is_empty() {
        lines.push("Recorded interactions:".to_string());
        for cue in cues {
            lines.push(format!("- {cue}"));
        }
    }
    lines.join("\n")
}

/// Pull a plan out of a model response that may be wrapped in code fences or
/// prose. Step ids are filled in when the model omits them.
pub fn parse_plan_payload(raw: &str) -> Result<Plan, AppError> {
    let trimmed = raw.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| AppError::Synthesis("response contains no JSON object".into()))?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| AppError::Synthesis("response contains no JSON object".into()))?;
    let mut plan: Plan = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| AppError::Synthesis(format!("could not parse plan JSON: {e}")))?;

    if plan.steps.is_empty() {
        return Err(AppError::Synthesis("plan has no steps".into()));
    }
    for (i, step) in plan.steps.iter_mut().enumerate() {
        if step.id.trim().is_empty() {
            step.id = format!("s{}", i + 1);
        }
    }
    Ok(plan)
}

/// Gemini-backed synthesizer. Sends the prompt plus the first and last
/// recorded frames for visual context.
pub struct GeminiPlanSynthesizer {
    client: Client,
    model: String,
    enabled: bool,
}

impl GeminiPlanSynthesizer {
    pub fn from_env() -> Self {
        let enabled = std::env::var("GEMINI_API_KEY")
            .map(|k| !k.is_empty())
            .unwrap_or(false);
        Self {
            client: Client::default(),
            model: std::env::var("SYNTHESIS_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-pro".to_string()),
            enabled,
        }
    }
}

#[async_trait]
impl PlanSynthesis for GeminiPlanSynthesizer {
    async fn synthesize(
        &self,
        bundle: &RecordingBundle,
        context: &SynthesisContext,
    ) -> Result<SynthesisOutcome, AppError> {
        if !self.enabled {
            return Err(AppError::Synthesis(
                "Plan synthesis requires GEMINI_API_KEY".into(),
            ));
        }
        if bundle.frames.is_empty() {
            return Err(AppError::BadRequest("Recording has no frames yet".into()));
        }

        let cues = summarize_events(&bundle.events, MAX_EVENT_CUES);
        let prompt = build_synthesis_prompt(bundle, context, &cues);

        let mut parts = vec![ContentPart::from_text(prompt.clone())];
        if let Some(first) = bundle.frames.first() {
            parts.push(ContentPart::from_binary_base64(
                "image/png",
                first.png.clone(),
                Some("first_frame.png".to_string()),
            ));
        }
        if bundle.frames.len() > 1 {
            let last = bundle.frames.last().unwrap();
            parts.push(ContentPart::from_binary_base64(
                "image/png",
                last.png.clone(),
                Some("last_frame.png".to_string()),
            ));
        }

        let request = ChatRequest::new(vec![ChatMessage::user(parts)]);
        let response = self
            .client
            .exec_chat(&self.model, request, None)
            .await
            .map_err(|e| AppError::Synthesis(format!("synthesis request failed: {e}")))?;
        let raw_response = response
            .first_text()
            .ok_or_else(|| AppError::Synthesis("no text in synthesis response".into()))?
            .to_string();

        let mut plan = parse_plan_payload(&raw_response)?;
        if plan.start_url.is_none() {
            plan.start_url = context.start_url.clone();
        }
        let (plan, _) = normalize_plan_variables(&plan);
        let checkpoints = derive_step_checkpoints(bundle, &plan);

        Ok(SynthesisOutcome {
            plan,
            prompt,
            raw_response,
            checkpoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_plan_json() {
        let raw = "Here you go:\n```json\n{\"name\": \"Order\", \"steps\": [{\"id\": \"\", \
                   \"title\": \"Open menu\", \"instructions\": \"click the menu\"}]}\n```";
        let plan = parse_plan_payload(raw).unwrap();
        assert_eq!(plan.name, "Order");
        assert_eq!(plan.steps[0].id, "s1", "blank step ids are filled in");
    }

    #[test]
    fn rejects_planless_responses() {
        assert!(parse_plan_payload("no json here").is_err());
        assert!(parse_plan_payload("{\"name\": \"x\", \"steps\": []}").is_err());
    }

    #[test]
    fn summarizes_and_folds_scrolls() {
        let events = vec![
            json!({"kind": "scroll", "deltaX": 0, "deltaY": 100}),
            json!({"kind": "scroll", "deltaX": 0, "deltaY": 150}),
            json!({"kind": "click", "x": 10.0, "y": 20.0, "selector": "#go"}),
            json!({"kind": "keydown", "key": "Enter", "combo": "Ctrl+Enter"}),
            json!({"kind": "key_hold", "key": "a", "duration": 0.1}),
        ];
        let cues = summarize_events(&events, 10);
        assert_eq!(cues.len(), 3);
        assert!(cues[0].starts_with("scroll x2"));
        assert_eq!(cues[1], "click #go at (10, 20)");
        assert_eq!(cues[2], "press Ctrl+Enter");
    }

    #[test]
    fn prompt_carries_hints_and_cues() {
        let bundle = RecordingBundle {
            transcript: Some("I open the menu".to_string()),
            ..Default::default()
        };
        let context = SynthesisContext {
            plan_name: Some("Lunch".to_string()),
            start_url: Some("https://example.com".to_string()),
            variable_hints: Some("person is a variable".to_string()),
        };
        let prompt = build_synthesis_prompt(&bundle, &context, &["click #go at (1, 2)".to_string()]);
        assert!(prompt.contains("Preferred plan name: Lunch"));
        assert!(prompt.contains("Variable hints"));
        assert!(prompt.contains("I open the menu"));
        assert!(prompt.contains("- click #go at (1, 2)"));
    }
}
