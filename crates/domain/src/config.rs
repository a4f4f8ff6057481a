//! TOML-backed configuration for the scheduling core.
//!
//! Every section has serde defaults so an empty file (or no file at all)
//! yields a working configuration.  Validation is advisory: `validate()`
//! returns severity-tagged issues and lets the caller decide what to do
//! with warnings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.scheduling.working_hours_start >= self.scheduling.working_hours_end {
            issues.push(ConfigIssue::error(
                "scheduling.working_hours_start",
                "working hours start must be before end",
            ));
        }
        if self.scheduling.working_hours_end > 24 {
            issues.push(ConfigIssue::error(
                "scheduling.working_hours_end",
                "hour must be 0-24",
            ));
        }
        if self.scheduling.default_duration_minutes == 0 {
            issues.push(ConfigIssue::error(
                "scheduling.default_duration_minutes",
                "duration must be positive",
            ));
        }
        if self.orchestrator.max_tool_rounds == 0 || self.orchestrator.max_tool_rounds > 32 {
            issues.push(ConfigIssue::error(
                "orchestrator.max_tool_rounds",
                "round bound must be between 1 and 32",
            ));
        }
        if self.orchestrator.persist_retries > 10 {
            issues.push(ConfigIssue::warning(
                "orchestrator.persist_retries",
                "more than 10 persistence retries is rarely useful",
            ));
        }
        if self.llm.base_url.is_empty() {
            issues.push(ConfigIssue::error("llm.base_url", "base URL is required"));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Language-model endpoint settings (OpenAI-compatible wire contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Timeout for one model round, in seconds.
    #[serde(default = "d_round_timeout")]
    pub round_timeout_secs: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            model: d_model(),
            round_timeout_secs: d_round_timeout(),
            temperature: d_temperature(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_api_key_env() -> String {
    "STINA_API_KEY".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_round_timeout() -> u64 {
    60
}
fn d_temperature() -> f32 {
    0.2
}

/// Default scheduling policy, applied when a requester has no stored
/// preferences of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "d_wh_start")]
    pub working_hours_start: u8,
    #[serde(default = "d_wh_end")]
    pub working_hours_end: u8,
    /// IANA timezone name for interpreting working hours.
    #[serde(default = "d_timezone")]
    pub timezone: String,
    /// Buffer applied when checking adjacency to existing events.
    #[serde(default = "d_buffer")]
    pub buffer_minutes: u32,
    #[serde(default = "d_duration")]
    pub default_duration_minutes: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            working_hours_start: d_wh_start(),
            working_hours_end: d_wh_end(),
            timezone: d_timezone(),
            buffer_minutes: d_buffer(),
            default_duration_minutes: d_duration(),
        }
    }
}

fn d_wh_start() -> u8 {
    9
}
fn d_wh_end() -> u8 {
    17
}
fn d_timezone() -> String {
    "UTC".into()
}
fn d_buffer() -> u32 {
    15
}
fn d_duration() -> u32 {
    30
}

/// Bounds on the planning loop and on terminal-decision persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "d_max_rounds")]
    pub max_tool_rounds: u32,
    /// Timeout for one tool execution, in seconds.
    #[serde(default = "d_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "d_persist_retries")]
    pub persist_retries: u32,
    /// Initial backoff between persistence retries; doubles per attempt.
    #[serde(default = "d_persist_backoff")]
    pub persist_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: d_max_rounds(),
            tool_timeout_secs: d_tool_timeout(),
            persist_retries: d_persist_retries(),
            persist_backoff_ms: d_persist_backoff(),
        }
    }
}

fn d_max_rounds() -> u32 {
    8
}
fn d_tool_timeout() -> u64 {
    30
}
fn d_persist_retries() -> u32 {
    3
}
fn d_persist_backoff() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Timeout for one extraction attempt, in seconds.
    #[serde(default = "d_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_extraction_timeout(),
        }
    }
}

fn d_extraction_timeout() -> u64 {
    45
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}
