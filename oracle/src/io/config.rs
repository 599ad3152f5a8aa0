//! Tool configuration stored under `.oracle_data/config.toml`, plus the
//! credentials read from the environment.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::io::atomic::write_atomic;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const MODEL_NAME: &str = "MODEL_NAME";

/// Tool configuration (TOML).
///
/// Meant to be edited by hand. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Chat model used for every generation call.
    pub model_name: String,

    /// OpenAI-compatible API root (`/chat/completions` is appended).
    pub api_base: String,

    pub github_api_base: String,

    /// Per-request timeout for HTTP collaborators.
    pub http_timeout_secs: u64,

    /// Wall-clock limit for a single git subprocess.
    pub git_timeout_secs: u64,

    /// Truncate captured git stdout/stderr beyond this many bytes.
    pub git_output_limit_bytes: usize,

    /// Diff text passed to task generation is cut to this many bytes.
    pub diff_context_limit_bytes: usize,

    /// Diff text passed to the semantic judge is cut to this many bytes.
    pub verification_diff_limit_bytes: usize,

    /// Ask the model whether the latest commit plausibly completes the phase.
    pub semantic_verification: bool,

    /// Verification attempts allowed per phase. Unset means unlimited.
    pub max_verification_attempts: Option<u32>,

    /// Strict-JSON attempts before the raw-code fallback.
    pub coder_max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            api_base: "https://api.groq.com/openai/v1".to_string(),
            github_api_base: "https://api.github.com".to_string(),
            http_timeout_secs: 60,
            git_timeout_secs: 300,
            git_output_limit_bytes: 1_000_000,
            diff_context_limit_bytes: 2000,
            verification_diff_limit_bytes: 5000,
            semantic_verification: true,
            max_verification_attempts: None,
            coder_max_retries: 3,
        }
    }
}

impl OracleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(anyhow!("model_name must not be empty"));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow!("http_timeout_secs must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.git_output_limit_bytes == 0 {
            return Err(anyhow!("git_output_limit_bytes must be > 0"));
        }
        if self.diff_context_limit_bytes == 0 {
            return Err(anyhow!("diff_context_limit_bytes must be > 0"));
        }
        if self.verification_diff_limit_bytes == 0 {
            return Err(anyhow!("verification_diff_limit_bytes must be > 0"));
        }
        if self.max_verification_attempts == Some(0) {
            return Err(anyhow!("max_verification_attempts must be > 0 when set"));
        }
        if self.coder_max_retries == 0 {
            return Err(anyhow!("coder_max_retries must be > 0"));
        }
        Ok(())
    }

    /// Apply `MODEL_NAME` from the environment, if present.
    pub fn with_model_override(mut self, credentials: &Credentials) -> Self {
        if let Some(model) = &credentials.model_override {
            self.model_name = model.clone();
        }
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OracleConfig::default()`.
pub fn load_config(path: &Path) -> Result<OracleConfig> {
    if !path.exists() {
        let cfg = OracleConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OracleConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    debug!(path = %path.display(), model = %cfg.model_name, "config loaded");
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OracleConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing credential: set {0} in the environment or in .env")]
    MissingCredential(&'static str),
}

/// Secrets and overrides taken from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub groq_api_key: String,
    pub github_token: Option<String>,
    pub model_override: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("groq_api_key", &"<redacted>")
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("model_override", &self.model_override)
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment after loading `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable .env"),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build credentials from an arbitrary variable lookup. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let groq_api_key = read(GROQ_API_KEY).ok_or(ConfigError::MissingCredential(GROQ_API_KEY))?;
        Ok(Self {
            groq_api_key,
            github_token: read(GITHUB_TOKEN),
            model_override: read(MODEL_NAME),
        })
    }
}
