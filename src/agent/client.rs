use genai::chat::{ChatMessage, ChatRequest, ContentPart, Tool};
use genai::Client;
use serde_json::json;

use crate::config::AgentConfig;
use crate::error::RunnerError;

use super::parser::{build_prompt, parse_decision, FunctionCall};
use super::{AgentDecision, AgentObservation};

const SYSTEM_PROMPT: &str = "\
You control a Chromium browser. Execute ONLY the current plan step and emit \
at most two actions per turn.\n\
Available tools (call exactly with the spelled names):\n\
- navigate(url)\n\
- wait_5_seconds()\n\
- go_back()\n\
- go_forward()\n\
- search()\n\
- click_at(x, y)\n\
- hover_at(x, y)\n\
- type_text_at(x, y, text, press_enter = false, clear_before_typing = true)\n\
- key_combination(keys)\n\
- scroll_document(direction)\n\
- scroll_at(x, y, direction, magnitude = 800)\n\
- drag_and_drop(x, y, destination_x, destination_y)\n\
Coordinate arguments use a 0-999 grid mapped to the viewport.\n\
Favor the tool that best matches the plan step. Avoid redundant browser \
launches or waits unless explicitly helpful.";

fn coordinate_props() -> serde_json::Value {
    json!({
        "x": {"type": "integer", "description": "Horizontal position on the 0-999 grid"},
        "y": {"type": "integer", "description": "Vertical position on the 0-999 grid"}
    })
}

fn build_tools() -> Vec<Tool> {
    let mut tools = Vec::new();

    tools.push(
        Tool::new("navigate")
            .with_description("Navigate the browser to a URL")
            .with_schema(json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"]
            })),
    );
    for (name, description) in [
        ("wait_5_seconds", "Pause for five seconds"),
        ("go_back", "Navigate back in history"),
        ("go_forward", "Navigate forward in history"),
        ("search", "Open the default search page"),
    ] {
        tools.push(
            Tool::new(name)
                .with_description(description)
                .with_schema(json!({"type": "object", "properties": {}})),
        );
    }
    tools.push(
        Tool::new("click_at")
            .with_description("Click at a grid position")
            .with_schema(json!({
                "type": "object",
                "properties": coordinate_props(),
                "required": ["x", "y"]
            })),
    );
    tools.push(
        Tool::new("hover_at")
            .with_description("Move the pointer to a grid position")
            .with_schema(json!({
                "type": "object",
                "properties": coordinate_props(),
                "required": ["x", "y"]
            })),
    );
    let mut type_props = coordinate_props();
    type_props["text"] = json!({"type": "string"});
    type_props["press_enter"] = json!({"type": "boolean", "default": false});
    type_props["clear_before_typing"] = json!({"type": "boolean", "default": true});
    tools.push(
        Tool::new("type_text_at")
            .with_description("Click a field and type text into it")
            .with_schema(json!({
                "type": "object",
                "properties": type_props,
                "required": ["x", "y", "text"]
            })),
    );
    tools.push(
        Tool::new("key_combination")
            .with_description("Press a key or combo such as Ctrl+Enter")
            .with_schema(json!({
                "type": "object",
                "properties": {"keys": {"type": "string"}},
                "required": ["keys"]
            })),
    );
    tools.push(
        Tool::new("scroll_document")
            .with_description("Scroll the whole document")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["up", "down", "left", "right"]},
                    "magnitude": {"type": "integer"}
                }
            })),
    );
    let mut scroll_at_props = coordinate_props();
    scroll_at_props["direction"] = json!({"type": "string", "enum": ["up", "down", "left", "right"]});
    scroll_at_props["magnitude"] = json!({"type": "integer", "default": 800});
    tools.push(
        Tool::new("scroll_at")
            .with_description("Scroll the element under a grid position")
            .with_schema(json!({
                "type": "object",
                "properties": scroll_at_props,
                "required": ["x", "y"]
            })),
    );
    let mut drag_props = coordinate_props();
    drag_props["destination_x"] = json!({"type": "integer"});
    drag_props["destination_y"] = json!({"type": "integer"});
    tools.push(
        Tool::new("drag_and_drop")
            .with_description("Drag from one grid position to another")
            .with_schema(json!({
                "type": "object",
                "properties": drag_props,
                "required": ["x", "y", "destination_x", "destination_y"]
            })),
    );
    tools
}

/// Client for the external computer-use model: turns an observation into a
/// validated decision.
pub struct ComputerUseAgent {
    client: Client,
    config: AgentConfig,
}

impl ComputerUseAgent {
    pub fn new(config: AgentConfig) -> Self {
        // genai reads provider keys from the environment.
        if let Some(key) = &config.api_key {
            std::env::set_var("GEMINI_API_KEY", key);
        }
        Self {
            client: Client::default(),
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Ask the model for the next action(s) for this turn.
    pub async fn propose_actions(
        &self,
        observation: &AgentObservation,
    ) -> Result<AgentDecision, RunnerError> {
        if !self.config.enabled {
            return Err(RunnerError::AgentDecision {
                message:
                    "Computer-use agent disabled. Set GEMINI_API_KEY and COMPUTER_USE_ENABLED=1."
                        .to_string(),
                prompt: None,
                response_summary: None,
            });
        }

        let prompt = build_prompt(observation);
        if self.config.debug {
            let preview: String = prompt.chars().take(2000).collect();
            tracing::info!(
                turn = observation.turn,
                step = %observation.step.id,
                "Agent prompt: {}",
                preview
            );
        }

        let parts = vec![
            ContentPart::from_text(prompt.clone()),
            ContentPart::from_binary_base64(
                "image/png",
                observation.screenshot_b64.clone(),
                Some("screenshot.png".to_string()),
            ),
        ];
        let request = ChatRequest::new(vec![ChatMessage::system(SYSTEM_PROMPT)])
            .with_tools(build_tools())
            .append_message(ChatMessage::user(parts));

        let response = self
            .client
            .exec_chat(&self.config.model, request, None)
            .await
            .map_err(|e| RunnerError::AgentDecision {
                message: format!("Agent request failed: {e}"),
                prompt: Some(prompt.clone()),
                response_summary: None,
            })?;

        let calls: Vec<FunctionCall> = response
            .into_tool_calls()
            .into_iter()
            .map(|call| FunctionCall {
                name: call.fn_name,
                args: call
                    .fn_arguments
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        let decision = parse_decision(prompt, calls, &observation.step, &observation.vars)?;
        if self.config.debug {
            tracing::info!("Agent proposed actions: {}", decision.response_summary);
        }
        Ok(decision)
    }
}
