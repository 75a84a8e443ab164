use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FormError, Result};
use crate::types::{Field, SubmissionAction};

/// Top-level formflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub form: FormConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// The questionnaire itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// What happens when a condition expression fails to parse.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    /// Treat a malformed condition as true.
    #[default]
    FailOpen,
    /// Treat a malformed condition as false.
    FailClosed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Run eligible actions concurrently instead of in order.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub condition_policy: ConditionPolicy,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub actions: Vec<SubmissionAction>,
    /// Attached to the payload of actions with `include_metadata`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Backoff between attempts of a failing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Length of one backoff time unit. Attempt n waits 2^n units.
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Scale each delay by a random factor in 0.8..1.2.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_unit_ms: default_backoff_unit(),
            max_backoff_ms: default_max_backoff(),
            jitter: false,
        }
    }
}

fn default_backoff_unit() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 { 30 }
fn default_user_agent() -> String { format!("formflow/{}", env!("CARGO_PKG_VERSION")) }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "formflow=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML (or `.json`) file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FormError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&expanded).map_err(|e| FormError::Config(e.to_string()))
        } else {
            toml::from_str(&expanded).map_err(|e| FormError::Config(e.to_string()))
        }
    }

    /// Render the resolved config back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FormError::Config(e.to_string()))
    }
}

/// Substitute `${NAME}` with the environment variable `NAME`.
///
/// Only names made of ASCII letters, digits and `_` are looked up, so a
/// `${ ... }` inside a condition or template stays as written. `$${` is a
/// literal `${`. Unset variables and unterminated references are kept.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let (before, reference) = rest.split_at(start);
        if let Some(kept) = before.strip_suffix('$') {
            out.push_str(kept);
            out.push_str("${");
            rest = &reference[2..];
            continue;
        }
        out.push_str(before);
        rest = reference;

        let Some(close) = reference.find('}') else {
            break;
        };
        let name = &reference[2..close];
        let value = is_env_name(name).then(|| std::env::var(name).ok()).flatten();
        match value {
            Some(value) => out.push_str(&value),
            None => out.push_str(&reference[..=close]),
        }
        rest = &reference[close + 1..];
    }
    out.push_str(rest);
    out
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
