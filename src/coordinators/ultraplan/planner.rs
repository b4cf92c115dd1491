//! Planner output parsing
//!
//! The planner agent prints a JSON plan, usually inside a ```json fenced
//! block. Parsing never retries: a malformed plan is surfaced to the user,
//! who can edit a plan manually or stop the session.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::domain::{PlanError, PlanSpec, PlannedTask};

/// Why planner output failed to become a plan
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanParseError {
    #[error("no JSON object found in planner output")]
    NoJson,

    #[error("invalid plan JSON: {0}")]
    Json(String),

    #[error("invalid plan: {0}")]
    Invalid(#[from] PlanError),
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    summary: String,
    tasks: Vec<PlannedTask>,
}

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Extract the JSON payload from raw planner output
fn extract_json(output: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON_RE.captures(output) {
        return Some(caps.get(1).unwrap().as_str());
    }
    // Fall back to the outermost brace span
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (end > start).then(|| &output[start..=end])
}

/// Parse planner output into a validated plan with its execution order
pub fn parse_plan_output(output: &str) -> Result<PlanSpec, PlanParseError> {
    let json = extract_json(output).ok_or(PlanParseError::NoJson)?;
    let parsed: PlannerOutput = serde_json::from_str(json).map_err(|e| PlanParseError::Json(e.to_string()))?;
    Ok(PlanSpec::new(parsed.summary, parsed.tasks)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FENCED: &str = r#"
Here is the plan you asked for:

```json
{
  "summary": "two step plan",
  "tasks": [
    {"id": "t1", "title": "first", "description": "do first", "depends_on": [], "priority": 1},
    {"id": "t2", "title": "second", "description": "do second", "depends_on": ["t1"], "est_complexity": "high"}
  ]
}
```

Good luck!
"#;

    #[test]
    fn test_parse_fenced_block() {
        let plan = parse_plan_output(FENCED).unwrap();
        assert_eq!(plan.summary, "two step plan");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.execution_order, vec![vec!["t1"], vec!["t2"]]);
        assert_eq!(plan.tasks[1].est_complexity, crate::domain::Complexity::High);
    }

    #[test]
    fn test_parse_bare_json() {
        let output = r#"{"summary": "s", "tasks": [{"id": "a", "title": "a", "description": ""}]}"#;
        let plan = parse_plan_output(output).unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.execution_order, vec![vec!["a"]]);
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let output = format!("preamble text {} trailing notes", r#"{"summary": "s", "tasks": []}"#);
        let plan = parse_plan_output(&output).unwrap();
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(matches!(parse_plan_output("no plan here"), Err(PlanParseError::NoJson)));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            parse_plan_output("{\"summary\": \"s\", \"tasks\": [oops]}"),
            Err(PlanParseError::Json(_))
        ));
    }

    #[test]
    fn test_cyclic_plan_is_error() {
        let output = r#"{"summary": "s", "tasks": [
            {"id": "a", "title": "a", "description": "", "depends_on": ["b"]},
            {"id": "b", "title": "b", "description": "", "depends_on": ["a"]}
        ]}"#;
        assert!(matches!(parse_plan_output(output), Err(PlanParseError::Invalid(_))));
    }

    #[test]
    fn test_unknown_dependency_is_error() {
        let output = r#"{"summary": "s", "tasks": [
            {"id": "a", "title": "a", "description": "", "depends_on": ["ghost"]}
        ]}"#;
        assert!(matches!(parse_plan_output(output), Err(PlanParseError::Invalid(_))));
    }
}
