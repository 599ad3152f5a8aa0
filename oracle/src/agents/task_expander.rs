//! Task list generation for one phase.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::phase_label::{PhaseLabel, expected_commit_message};
use crate::core::types::ProjectBrief;
use crate::io::llm::{Completion, CompletionRequest};
use crate::io::prompt::{Prompts, TaskPromptInputs};
use crate::io::repo_context::RepoContext;

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 300;

#[derive(Debug, Clone)]
pub struct PhaseTaskRequest<'a> {
    /// Plan line as shown to the operator.
    pub phase_line: &'a str,
    pub label: &'a PhaseLabel,
    pub brief: &'a ProjectBrief,
    pub context: &'a RepoContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTasks {
    pub tasks: Vec<String>,
    pub expected_commit: String,
}

#[instrument(skip_all, fields(phase = request.label.number))]
pub fn expand_phase(llm: &dyn Completion, request: &PhaseTaskRequest<'_>) -> Result<PhaseTasks> {
    let prompt = Prompts::new().tasks(&TaskPromptInputs {
        phase_name: request.phase_line,
        brief: request.brief,
        file_tree: Some(request.context.file_tree.as_str()),
        diff: request.context.diff.as_deref(),
    })?;
    let reply = llm
        .complete(&CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS))
        .with_context(|| format!("generate tasks for phase {}", request.label.number))?;
    let tasks = parse_tasks(&reply);
    debug!(count = tasks.len(), "tasks generated");
    Ok(PhaseTasks {
        tasks,
        expected_commit: expected_commit_message(request.label),
    })
}

/// One task per meaningful line; headings starting with "phase" are skipped.
pub fn parse_tasks(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.to_lowercase().starts_with("phase"))
        .map(strip_bullet)
        .filter(|task| !task.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return rest.trim_start();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = line[digits..].strip_prefix(['.', ')'])
    {
        return rest.trim_start();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedCompletion, brief};

    #[test]
    fn strips_bullets_and_phase_headings() {
        let tasks = parse_tasks(
            "Phase 2: API\n- Create router\n* Add handlers\n\n3. Write tests\n4) Document\n\
             phase notes\n2024 roadmap\n-\n",
        );
        assert_eq!(
            tasks,
            [
                "Create router",
                "Add handlers",
                "Write tests",
                "Document",
                "2024 roadmap"
            ]
        );
    }

    #[test]
    fn expected_commit_follows_label() {
        let llm = ScriptedCompletion::new(["Create router\nAdd handlers"]);
        let label = PhaseLabel {
            number: 2,
            name: "Build API".to_string(),
        };
        let b = brief();
        let context = RepoContext {
            file_tree: "app/\n".to_string(),
            diff: Some("+x".to_string()),
        };
        let out = expand_phase(
            &llm,
            &PhaseTaskRequest {
                phase_line: "Phase 2: Build API",
                label: &label,
                brief: &b,
                context: &context,
            },
        )
        .expect("expand");

        assert_eq!(out.tasks, ["Create router", "Add handlers"]);
        assert_eq!(out.expected_commit, "phase-2: build api complete");
        let prompt = &llm.requests()[0].prompt;
        assert!(prompt.contains("Phase: Phase 2: Build API"));
        assert!(prompt.contains("app/"));
        assert!(prompt.contains("+x"));
    }
}
