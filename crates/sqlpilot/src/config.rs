//! Client configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`SQLPILOT_*`)
//! 3. Built-in defaults (backend on `localhost:8001`, local provider)

use std::env;
use std::time::Duration;

use orchestration::{Provider, RunRequest};

use crate::error::ClientError;

/// Default backend base URL.
const DEFAULT_API_BASE: &str = "http://localhost:8001";
/// Retry budget sent with every auto-execute request.
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Non-streaming calls only; the auto-execute stream has no overall deadline.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_DISPLAY_ROWS: usize = 50;

const ENV_API_BASE: &str = "SQLPILOT_API_BASE";
const ENV_PROVIDER: &str = "SQLPILOT_PROVIDER";
const ENV_MODEL_ID: &str = "SQLPILOT_MODEL_ID";
const ENV_MAX_RETRIES: &str = "SQLPILOT_MAX_RETRIES";
const ENV_CONNECT_TIMEOUT: &str = "SQLPILOT_CONNECT_TIMEOUT_SECS";
const ENV_REQUEST_TIMEOUT: &str = "SQLPILOT_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, without a trailing slash.
    pub api_base: String,
    pub provider: Provider,
    /// Model override passed through to the backend.
    pub model_id: Option<String>,
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Rows printed before the result table is truncated.
    pub max_display_rows: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            provider: Provider::Local,
            model_id: None,
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_display_rows: DEFAULT_MAX_DISPLAY_ROWS,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `SQLPILOT_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base) = lookup(ENV_API_BASE) {
            config.api_base = base;
        }
        if let Some(provider) = lookup(ENV_PROVIDER) {
            config.provider = provider.parse().map_err(ClientError::Configuration)?;
        }
        config.model_id = lookup(ENV_MODEL_ID).filter(|m| !m.trim().is_empty());
        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = parse_number(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT) {
            config.connect_timeout = Duration::from_secs(parse_number(ENV_CONNECT_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = Duration::from_secs(parse_number(ENV_REQUEST_TIMEOUT, &v)?);
        }

        config.api_base = config.api_base.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ClientError::Configuration(format!(
                "api_base must be an http(s) URL, got '{}'",
                self.api_base
            )));
        }
        if self.max_retries == 0 {
            return Err(ClientError::Configuration(
                "max_retries must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Full URL for an API path such as `/api/execute`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// A run request for `query` using the configured provider, model and budget.
    pub fn run_request(&self, query: impl Into<String>) -> RunRequest {
        let mut request = RunRequest::new(query)
            .with_provider(self.provider)
            .with_max_retries(self.max_retries);
        request.model_id = self.model_id.clone();
        request
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ClientError> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::Configuration(format!("{key} must be a number, got '{value}'")))
}
