use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Runtime configuration for the TaskMate API client.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub api_url: Url,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_retry_wait_secs: u64,
    pub toast_debounce_secs: u64,
    pub dealership_id: Option<u64>,
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: v }),
        _ => Ok(None),
    }
}

// Trailing slash so relative joins keep the path prefix.
fn base_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(&format!("{}/", raw.trim_end_matches('/'))).map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

impl Config {
    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - TASKMATE_TOKEN [required]
    /// - TASKMATE_API_URL (default: http://localhost:8000/api/v1)
    /// - TASKMATE_HTTP_TIMEOUT_SECS (default: 30)
    /// - TASKMATE_MAX_RETRIES (default: 3)
    /// - TASKMATE_MAX_RETRY_WAIT_SECS (default: 60); longer Retry-After waits fail fast
    /// - TASKMATE_TOAST_DEBOUNCE_SECS (default: 5)
    /// - TASKMATE_USER_AGENT (default: taskmate/<version>)
    /// - TASKMATE_DEALERSHIP_ID (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = env::var("TASKMATE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let raw_url = env::var("TASKMATE_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string());
        let api_url = base_url("TASKMATE_API_URL", &raw_url)?;

        let timeout_secs = parse_var("TASKMATE_HTTP_TIMEOUT_SECS")?.unwrap_or(30);
        let max_retries = parse_var("TASKMATE_MAX_RETRIES")?.unwrap_or(3);
        let max_retry_wait_secs = parse_var("TASKMATE_MAX_RETRY_WAIT_SECS")?.unwrap_or(60);
        let toast_debounce_secs = parse_var("TASKMATE_TOAST_DEBOUNCE_SECS")?.unwrap_or(5);
        let dealership_id = parse_var("TASKMATE_DEALERSHIP_ID")?;
        let user_agent = env::var("TASKMATE_USER_AGENT")
            .unwrap_or_else(|_| format!("taskmate/{}", env!("CARGO_PKG_VERSION")));

        Ok(Self {
            token,
            api_url,
            user_agent,
            timeout_secs,
            max_retries,
            max_retry_wait_secs,
            toast_debounce_secs,
            dealership_id,
        })
    }

    pub fn toast_debounce(&self) -> Duration {
        Duration::from_secs(self.toast_debounce_secs)
    }

    /// Config pointing at `api_url` with defaults for everything else.
    pub fn for_base_url(api_url: &str, token: &str) -> Result<Self, ConfigError> {
        let api_url = base_url("api_url", api_url)?;
        Ok(Self {
            token: token.to_string(),
            api_url,
            user_agent: format!("taskmate/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_retries: 3,
            max_retry_wait_secs: 60,
            toast_debounce_secs: 5,
            dealership_id: None,
        })
    }
}
