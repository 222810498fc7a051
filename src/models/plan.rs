use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A plan variable value: free text or a number, as produced by synthesis or
/// supplied by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Number(f64),
    Text(String),
}

impl VarValue {
    pub fn text(value: impl Into<String>) -> Self {
        VarValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::Text(s) => Some(s),
            VarValue::Number(_) => None,
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Text(s) => f.write_str(s),
            // Whole numbers render without a trailing ".0" so substitution
            // into step text reads naturally.
            VarValue::Number(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            VarValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Text(value.to_string())
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Number(value)
    }
}

pub type VarMap = HashMap<String, VarValue>;

/// One plan unit: a stable id, a human title, and natural-language guidance
/// for the action agent. Steps are processed strictly in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
}

/// A named automation: ordered steps, an optional start URL, and the variable
/// map backing `{name}` / `{{ name }}` placeholders in any of its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub vars: VarMap,
    pub steps: Vec<PlanStep>,
    #[serde(default, rename = "startUrl", skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(default, rename = "hasVariables")]
    pub has_variables: bool,
}

impl Plan {
    pub fn with_vars(&self, vars: VarMap) -> Plan {
        Plan {
            vars,
            ..self.clone()
        }
    }
}

/// Reference screenshot anchored to a step, gating step completion by
/// perceptual similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "png_base64")]
    pub png_base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Per-step checkpoint references, keyed by step id.
pub type CheckpointMap = HashMap<String, Vec<Checkpoint>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_value_display() {
        assert_eq!(VarValue::text("Ada").to_string(), "Ada");
        assert_eq!(VarValue::Number(7.0).to_string(), "7");
        assert_eq!(VarValue::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn var_value_untagged_roundtrip() {
        let v: VarValue = serde_json::from_str("\"5\"").unwrap();
        assert_eq!(v, VarValue::text("5"));
        let v: VarValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, VarValue::Number(5.0));
    }

    #[test]
    fn plan_wire_aliases() {
        let json = serde_json::json!({
            "name": "Order lunch",
            "steps": [{"id": "s1", "title": "Open menu"}],
            "startUrl": "https://example.com",
            "hasVariables": false
        });
        let plan: Plan = serde_json::from_value(json).unwrap();
        assert_eq!(plan.start_url.as_deref(), Some("https://example.com"));
        assert_eq!(plan.steps[0].instructions, "");
    }
}
