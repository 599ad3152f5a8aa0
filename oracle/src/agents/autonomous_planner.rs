//! Structured plan generation for the autonomous flow.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::AutonomousPlan;
use crate::io::llm::{Completion, CompletionRequest};
use crate::io::prompt::Prompts;

use super::coder::strip_code_fences;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 800;

pub struct AutonomousPlanner<'a> {
    llm: &'a dyn Completion,
}

impl<'a> AutonomousPlanner<'a> {
    pub fn new(llm: &'a dyn Completion) -> Self {
        Self { llm }
    }

    #[instrument(skip_all)]
    pub fn generate_plan(&self, idea: &str) -> Result<AutonomousPlan> {
        let prompt = Prompts::new().plan(idea)?;
        let reply = self
            .llm
            .complete(&CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS))
            .context("generate plan")?;
        let plan = parse_plan(&reply)?;
        debug!(
            project = %plan.project_name,
            complexity = plan.complexity.as_str(),
            files = plan.file_structure.len(),
            "plan generated"
        );
        Ok(plan)
    }
}

/// Parse and schema-check a plan reply.
pub fn parse_plan(reply: &str) -> Result<AutonomousPlan> {
    let cleaned = strip_code_fences(reply);
    let value: Value =
        serde_json::from_str(cleaned).context("planner did not return valid JSON")?;
    validate_plan(&value)?;
    serde_json::from_value(value).context("decode plan")
}

fn validate_plan(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("plan schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Complexity;
    use crate::test_support::ScriptedCompletion;

    const PLAN: &str = r#"{
        "project_name": "Todo API",
        "complexity": "medium",
        "phases": [{"phase_name": "Models", "description": "data types"}],
        "file_structure": ["src/main.rs", "src/models.rs"],
        "requires_features_input": false,
        "requires_tech_stack_input": true
    }"#;

    #[test]
    fn parses_fenced_plan() {
        let llm = ScriptedCompletion::new([format!("```json\n{PLAN}\n```")]);
        let plan = AutonomousPlanner::new(&llm)
            .generate_plan("a todo api")
            .expect("plan");
        assert_eq!(plan.project_name, "Todo API");
        assert_eq!(plan.complexity, Complexity::Medium);
        assert_eq!(plan.file_structure, ["src/main.rs", "src/models.rs"]);
        assert!(plan.requires_tech_stack_input);
        assert_eq!(llm.requests()[0].max_tokens, 800);
    }

    #[test]
    fn simple_plans_may_omit_phases() {
        let plan = parse_plan(
            r#"{"project_name":"hello","complexity":"simple","file_structure":["hello.py"]}"#,
        )
        .expect("plan");
        assert!(plan.phases.is_empty());
    }

    #[test]
    fn rejects_non_json_and_schema_violations() {
        let err = parse_plan("Sure! Here is a plan").unwrap_err();
        assert!(format!("{err:#}").contains("valid JSON"));

        let err = parse_plan(
            r#"{"project_name":"x","complexity":"huge","file_structure":["a.py"]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));

        let err = parse_plan(r#"{"project_name":"x","complexity":"simple","file_structure":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }
}
