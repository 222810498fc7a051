mod client;
mod parser;

pub use client::ComputerUseAgent;
pub use parser::{
    build_prompt, extract_first_url, parse_decision, FunctionCall, SUPPORTED_ACTIONS,
};

use serde_json::{Map, Value};

use crate::models::{PlanStep, VarMap};

/// Everything the agent sees for one turn.
#[derive(Debug, Clone)]
pub struct AgentObservation {
    /// Plan name after variable substitution.
    pub goal: String,
    /// Base64 PNG of the current viewport.
    pub screenshot_b64: String,
    pub url: String,
    pub turn: u32,
    pub history: Vec<String>,
    pub vars: VarMap,
    pub step: PlanStep,
}

/// One validated action proposed by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentAction {
    pub name: String,
    pub args: Map<String, Value>,
    pub safety_decision: Option<String>,
}

impl AgentAction {
    /// Float argument with a 0.0 fallback, mirroring the agent's loose typing.
    pub fn arg_f64(&self, key: &str) -> f64 {
        match self.args.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn arg_bool(&self, key: &str, default: bool) -> bool {
        self.args.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

/// The agent's answer for a turn: the prompt it was shown, a JSON summary of
/// its response, and the validated actions to apply in order.
#[derive(Debug, Clone)]
pub struct AgentDecision {
    pub prompt: String,
    pub response_summary: String,
    pub actions: Vec<AgentAction>,
}
