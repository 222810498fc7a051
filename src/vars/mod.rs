//! Plan placeholder engine.
//!
//! Placeholders appear in a plan's name and in step titles/instructions as
//! `{name}` (single braces, no nested braces) or `{{ name }}` (double braces,
//! whitespace-trimmed). Substitution only touches placeholders whose name is
//! present in the variable map; unknown placeholders pass through verbatim.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::{Plan, VarMap, VarValue};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*(?P<double>[^{}\s][^{}]*?)\s*\}\}|\{(?P<single>[^{}]+)\}")
            .expect("placeholder pattern is valid")
    })
}

fn extract_placeholder(caps: &Captures<'_>) -> Option<String> {
    let raw = caps
        .name("double")
        .or_else(|| caps.name("single"))?
        .as_str()
        .trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Scan the plan name and every step title/instructions for placeholders.
pub fn collect_placeholders(plan: &Plan) -> BTreeSet<String> {
    let mut placeholders = BTreeSet::new();
    let mut scan = |text: &str| {
        for caps in placeholder_pattern().captures_iter(text) {
            if let Some(name) = extract_placeholder(&caps) {
                placeholders.insert(name);
            }
        }
    };
    scan(&plan.name);
    for step in &plan.steps {
        scan(&step.title);
        scan(&step.instructions);
    }
    placeholders
}

/// Ensure every placeholder has a key in `vars` (empty string when missing)
/// and recompute `has_variables`. Returns the normalized plan plus the
/// placeholder set.
pub fn normalize_plan_variables(plan: &Plan) -> (Plan, BTreeSet<String>) {
    let placeholders = collect_placeholders(plan);
    let mut normalized = plan.clone();
    for name in &placeholders {
        normalized
            .vars
            .entry(name.clone())
            .or_insert_with(|| VarValue::text(""));
    }
    normalized.has_variables = !placeholders.is_empty();
    (normalized, placeholders)
}

/// Substitute placeholders present in `vars`; leave unknown ones verbatim.
pub fn apply_plan_variables(text: &str, vars: &VarMap) -> String {
    placeholder_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            match extract_placeholder(caps).and_then(|name| vars.get(&name).cloned()) {
                Some(value) => value.to_string(),
                None => caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string(),
            }
        })
        .into_owned()
}

/// Coerce an operator- or API-supplied JSON value into a usable variable
/// value. Booleans become "true"/"false", numbers pass through, everything
/// else is stringified and trimmed; null and blank strings count as missing.
pub fn coerce_variable(value: &Value) -> Option<VarValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(VarValue::text(if *b { "true" } else { "false" })),
        Value::Number(n) => n.as_f64().map(VarValue::Number),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(VarValue::text(trimmed))
            }
        }
        other => {
            let text = other.to_string();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(VarValue::text(trimmed))
            }
        }
    }
}

/// Placeholder names still unusable with the given variable map: absent, or
/// mapped to a string that is empty after trimming.
pub fn diagnose_missing(vars: &VarMap, placeholders: &BTreeSet<String>) -> Vec<String> {
    let mut missing = Vec::new();
    for name in placeholders {
        match vars.get(name) {
            None => missing.push(name.clone()),
            Some(VarValue::Text(s)) if s.trim().is_empty() => missing.push(name.clone()),
            Some(_) => {}
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanStep;

    fn plan(name: &str, steps: &[(&str, &str, &str)]) -> Plan {
        Plan {
            name: name.to_string(),
            vars: VarMap::new(),
            steps: steps
                .iter()
                .map(|(id, title, instructions)| PlanStep {
                    id: id.to_string(),
                    title: title.to_string(),
                    instructions: instructions.to_string(),
                })
                .collect(),
            start_url: None,
            has_variables: false,
        }
    }

    #[test]
    fn collects_single_and_double_brace_placeholders() {
        let p = plan(
            "Say hi to {person}",
            &[("s1", "Greet {{ person }}", "Type hello {person} in {field}")],
        );
        let names = collect_placeholders(&p);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["field".to_string(), "person".to_string()]
        );
    }

    #[test]
    fn normalize_inserts_empty_values_and_flags() {
        let p = plan("Say hi to {person}", &[("s1", "Greet", "hello")]);
        let (normalized, placeholders) = normalize_plan_variables(&p);
        assert!(normalized.has_variables);
        assert_eq!(normalized.vars.get("person"), Some(&VarValue::text("")));
        // Every placeholder is now a key of the variable map.
        for name in &placeholders {
            assert!(normalized.vars.contains_key(name));
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let p = plan("Open {site}", &[("s1", "Go", "visit {site}")]);
        let (once, _) = normalize_plan_variables(&p);
        let (twice, _) = normalize_plan_variables(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn apply_substitutes_known_and_keeps_unknown() {
        let mut vars = VarMap::new();
        vars.insert("person".to_string(), VarValue::text("Ada"));
        assert_eq!(
            apply_plan_variables("hello {person}, open {site}", &vars),
            "hello Ada, open {site}"
        );
        assert_eq!(
            apply_plan_variables("hello {{ person }}", &vars),
            "hello Ada"
        );
    }

    #[test]
    fn apply_is_identity_without_placeholders() {
        let vars = VarMap::new();
        assert_eq!(apply_plan_variables("plain text", &vars), "plain text");
    }

    #[test]
    fn numeric_substitution_renders_naturally() {
        let mut vars = VarMap::new();
        vars.insert("count".to_string(), VarValue::Number(3.0));
        assert_eq!(apply_plan_variables("buy {count} items", &vars), "buy 3 items");
    }

    #[test]
    fn coerce_variable_rules() {
        assert_eq!(coerce_variable(&Value::Null), None);
        assert_eq!(
            coerce_variable(&Value::Bool(true)),
            Some(VarValue::text("true"))
        );
        assert_eq!(
            coerce_variable(&serde_json::json!(4.5)),
            Some(VarValue::Number(4.5))
        );
        assert_eq!(
            coerce_variable(&Value::String("  padded  ".into())),
            Some(VarValue::text("padded"))
        );
        assert_eq!(coerce_variable(&Value::String("   ".into())), None);
    }

    #[test]
    fn diagnose_missing_flags_blank_strings() {
        let p = plan("{a} and {b}", &[]);
        let (normalized, placeholders) = normalize_plan_variables(&p);
        let mut vars = normalized.vars.clone();
        vars.insert("a".to_string(), VarValue::text("set"));
        assert_eq!(diagnose_missing(&vars, &placeholders), vec!["b".to_string()]);
    }
}
