//! Prompt templates for every generation call.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::ProjectBrief;

const PHASES_TEMPLATE: &str = include_str!("prompts/phases.md");
const TASKS_TEMPLATE: &str = include_str!("prompts/tasks.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const FILE_JSON_TEMPLATE: &str = include_str!("prompts/file_json.md");
const FILE_RAW_TEMPLATE: &str = include_str!("prompts/file_raw.md");

/// Inputs for task generation of one phase.
#[derive(Debug, Clone)]
pub struct TaskPromptInputs<'a> {
    pub phase_name: &'a str,
    pub brief: &'a ProjectBrief,
    pub file_tree: Option<&'a str>,
    pub diff: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompts {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("phases", PHASES_TEMPLATE)
            .expect("phases template should be valid");
        env.add_template("tasks", TASKS_TEMPLATE)
            .expect("tasks template should be valid");
        env.add_template("judge", JUDGE_TEMPLATE)
            .expect("judge template should be valid");
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("file_json", FILE_JSON_TEMPLATE)
            .expect("file_json template should be valid");
        env.add_template("file_raw", FILE_RAW_TEMPLATE)
            .expect("file_raw template should be valid");
        Self { env }
    }

    pub fn phases(&self, brief: &ProjectBrief) -> Result<String> {
        let template = self.env.get_template("phases")?;
        Ok(template.render(context! { brief => brief })?)
    }

    pub fn tasks(&self, input: &TaskPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("tasks")?;
        let rendered = template.render(context! {
            phase_name => input.phase_name.trim(),
            brief => input.brief,
            file_tree => input.file_tree.map(str::trim).filter(|s| !s.is_empty()),
            diff => input.diff.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn judge(&self, phase_number: usize, commit_message: &str, diff: &str) -> Result<String> {
        let template = self.env.get_template("judge")?;
        let rendered = template.render(context! {
            phase_number => phase_number,
            commit_message => commit_message.trim(),
            diff => diff,
        })?;
        Ok(rendered)
    }

    pub fn plan(&self, idea: &str) -> Result<String> {
        let template = self.env.get_template("plan")?;
        Ok(template.render(context! { idea => idea.trim() })?)
    }

    /// Strict-JSON file generation prompt.
    pub fn file_json(&self, project: &str, file_path: &str) -> Result<String> {
        let template = self.env.get_template("file_json")?;
        Ok(template.render(context! { project => project, file_path => file_path })?)
    }

    /// Raw-content fallback prompt.
    pub fn file_raw(&self, project: &str, file_path: &str) -> Result<String> {
        let template = self.env.get_template("file_raw")?;
        Ok(template.render(context! { project => project, file_path => file_path })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::brief;

    #[test]
    fn phases_prompt_lists_the_brief() {
        let prompt = Prompts::new().phases(&brief()).expect("render");
        assert!(prompt.starts_with("Return ONLY execution phases."));
        assert!(prompt.contains("Project: Todo\n"));
        assert!(prompt.contains("Platform: cli"));
    }

    #[test]
    fn tasks_prompt_includes_context_only_when_present() {
        let prompts = Prompts::new();
        let b = brief();
        let bare = prompts
            .tasks(&TaskPromptInputs {
                phase_name: "Phase 1: Setup",
                brief: &b,
                file_tree: None,
                diff: Some("  "),
            })
            .expect("render");
        assert!(bare.contains("Phase: Phase 1: Setup"));
        assert!(!bare.contains("Current project structure"));
        assert!(!bare.contains("Recent code changes"));

        let full = prompts
            .tasks(&TaskPromptInputs {
                phase_name: "Phase 1: Setup",
                brief: &b,
                file_tree: Some("app/\n    main.rs\n"),
                diff: Some("+fn main() {}"),
            })
            .expect("render");
        assert!(full.contains("Current project structure:\napp/\n    main.rs"));
        assert!(full.contains("Recent code changes (git diff):\n+fn main() {}"));
    }

    #[test]
    fn file_prompts_name_the_target() {
        let prompts = Prompts::new();
        let json = prompts.file_json("a todo cli", "src/main.rs").expect("render");
        assert!(json.contains("\"file_path\": \"src/main.rs\""));
        let raw = prompts.file_raw("a todo cli", "src/main.rs").expect("render");
        assert!(raw.contains("Target file:\nsrc/main.rs"));
    }

    #[test]
    fn judge_prompt_carries_commit_and_diff() {
        let prompt = Prompts::new()
            .judge(2, "phase-2: api complete", "+pub fn api() {}")
            .expect("render");
        assert!(prompt.contains("goals for Phase 2."));
        assert!(prompt.contains("Commit message: phase-2: api complete"));
        assert!(prompt.contains("+pub fn api() {}"));
    }
}
