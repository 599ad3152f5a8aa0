//! File content generation for the autonomous flow.
//!
//! Each file is requested as strict JSON `{file_path, content}` up to a
//! configured number of times, then once more as raw content.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::llm::{Completion, CompletionRequest};
use crate::io::prompt::Prompts;

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 2000;

pub struct Coder<'a> {
    llm: &'a dyn Completion,
    max_retries: u32,
}

impl<'a> Coder<'a> {
    pub fn new(llm: &'a dyn Completion, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    /// Generate the full content of `file_path` for the described project.
    #[instrument(skip_all, fields(file = file_path))]
    pub fn generate_file_code(&self, project: &str, file_path: &str) -> Result<String> {
        let prompts = Prompts::new();
        let strict = prompts.file_json(project, file_path)?;
        for attempt in 1..=self.max_retries {
            match self
                .llm
                .complete(&CompletionRequest::new(strict.clone(), TEMPERATURE, MAX_TOKENS))
            {
                Ok(reply) => {
                    if let Some(content) = extract_content(&reply) {
                        debug!(attempt, bytes = content.len(), "structured reply accepted");
                        return Ok(content);
                    }
                    debug!(attempt, "reply was not usable JSON");
                }
                Err(err) => warn!(attempt, error = %err, "file generation failed"),
            }
        }

        warn!("falling back to raw content");
        let raw = prompts.file_raw(project, file_path)?;
        let reply = self
            .llm
            .complete(&CompletionRequest::new(raw, TEMPERATURE, MAX_TOKENS))
            .with_context(|| format!("generate {file_path} after all fallbacks"))?;
        Ok(strip_code_fences(&reply).to_string())
    }
}

/// Pull `content` out of a JSON reply, directly or from its first `{...}` block.
pub fn extract_content(reply: &str) -> Option<String> {
    static JSON_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

    let cleaned = strip_code_fences(reply);
    if let Some(content) = content_field(cleaned) {
        return Some(content);
    }
    JSON_BLOCK_RE
        .find(cleaned)
        .and_then(|block| content_field(block.as_str()))
}

fn content_field(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("content")?.as_str().map(str::to_string)
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`, `rust`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::llm::CompletionError;
    use crate::test_support::ScriptedCompletion;

    #[test]
    fn strips_fences_with_info_string() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
        assert_eq!(strip_code_fences("```\nfn main() {}\n```\n"), "fn main() {}");
    }

    #[test]
    fn content_from_direct_or_embedded_json() {
        assert_eq!(
            extract_content(r#"{"file_path":"a.py","content":"print(1)\n"}"#).as_deref(),
            Some("print(1)\n")
        );
        assert_eq!(
            extract_content("Here you go: {\"content\": \"x = 1\"} enjoy").as_deref(),
            Some("x = 1")
        );
        assert_eq!(extract_content(r#"{"file_path":"a.py"}"#), None);
        assert_eq!(extract_content("no json"), None);
    }

    #[test]
    fn retries_then_falls_back_to_raw() {
        let llm = ScriptedCompletion::with_results([
            Ok("not json".to_string()),
            Err(CompletionError::Empty),
            Ok("```python\nprint('hi')\n```".to_string()),
        ]);
        let code = Coder::new(&llm, 2)
            .generate_file_code("hello script", "hello.py")
            .expect("code");
        assert_eq!(code, "print('hi')");

        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].prompt.contains("Return ONLY valid JSON."));
        assert!(requests[2].prompt.contains("Return ONLY the raw file content."));
    }

    #[test]
    fn first_valid_reply_wins() {
        let llm = ScriptedCompletion::new([r#"{"file_path":"a.rs","content":"fn a() {}"}"#]);
        let code = Coder::new(&llm, 3).generate_file_code("x", "a.rs").expect("code");
        assert_eq!(code, "fn a() {}");
        assert_eq!(llm.remaining(), 0);
        assert_eq!(llm.requests().len(), 1);
    }

    #[test]
    fn exhausted_backend_is_an_error() {
        let llm = ScriptedCompletion::new(Vec::<String>::new());
        assert!(Coder::new(&llm, 1).generate_file_code("x", "a.rs").is_err());
    }
}
