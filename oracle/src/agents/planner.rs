//! Phase plan generation for the interactive flow.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::phase_label::is_phase_line;
use crate::core::types::ProjectBrief;
use crate::io::llm::{Completion, CompletionRequest};
use crate::io::prompt::Prompts;

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 200;

/// Ask for an ordered list of `"Phase N: Name"` lines.
///
/// Lines that do not look like phases are dropped, so the result may be empty.
#[instrument(skip_all, fields(project = %brief.project))]
pub fn generate_phases(llm: &dyn Completion, brief: &ProjectBrief) -> Result<Vec<String>> {
    let prompt = Prompts::new().phases(brief)?;
    let reply = llm
        .complete(&CompletionRequest::new(prompt, TEMPERATURE, MAX_TOKENS))
        .context("generate phases")?;
    let phases = parse_phases(&reply);
    debug!(count = phases.len(), "phases generated");
    Ok(phases)
}

fn parse_phases(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| is_phase_line(line))
        .map(str::to_string)
        .collect()
}
