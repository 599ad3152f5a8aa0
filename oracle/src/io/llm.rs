//! Text-generation collaborator.
//!
//! The [`Completion`] trait decouples the agents from the HTTP backend. Tests
//! use scripted completions that return predetermined replies.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::OracleConfig;

/// One single-turn generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response could not be decoded: {0}")]
    Decode(String),
    #[error("completion response had no content")]
    Empty,
}

/// Abstraction over text-generation backends.
pub trait Completion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(cfg: &OracleConfig, api_key: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: cfg.model_name.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl Completion for ChatClient {
    #[instrument(skip_all, fields(model = %self.model, max_tokens = request.max_tokens))]
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatBody {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        debug!(prompt_bytes = request.prompt.len(), "sending completion request");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| CompletionError::Transport(err.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| CompletionError::Transport(err.without_url().to_string()))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "completion API error");
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: snippet(&text),
            });
        }
        parse_chat_response(&text)
    }
}

/// Extract the first choice's message content.
pub fn parse_chat_response(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|err| CompletionError::Decode(err.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(CompletionError::Empty)?;
    debug!(reply_bytes = content.len(), "completion received");
    Ok(content)
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    let cut: String = trimmed.chars().take(300).collect();
    if cut.len() < trimmed.len() {
        format!("{cut}...")
    } else {
        cut
    }
}
