use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GenerationError, Result};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";
pub const BASE_URL_ENV: &str = "DASHSCOPE_BASE_URL";
pub const OUTPUT_DIR_ENV: &str = "FUNART_OUTPUT_DIR";

/// What to do with a multi-frame image batch handed in as a reference image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Encode the first frame and log a warning about the dropped frames.
    FirstFrame,
    /// Refuse the request with a validation error.
    Reject,
}

/// Per-invocation settings. Built once at the start of a request and threaded through
/// every call; nothing here is process-global.
#[derive(Clone)]
pub struct ApiConfig {
    api_key: String,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub request_timeout: Duration,
    pub image_download_timeout: Duration,
    pub video_download_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_interval_step: Duration,
    pub poll_interval_max: Duration,
    pub poll_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
    pub batch_policy: BatchPolicy,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("output_dir", &self.output_dir)
            .field("request_timeout", &self.request_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .field("transport_retries", &self.transport_retries)
            .field("batch_policy", &self.batch_policy)
            .finish()
    }
}

impl ApiConfig {
    pub fn new(api_key: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: output_dir.into(),
            request_timeout: Duration::from_secs(60),
            image_download_timeout: Duration::from_secs(30),
            video_download_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            poll_interval_step: Duration::from_secs(1),
            poll_interval_max: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(1800),
            transport_retries: 2,
            retry_backoff: Duration::from_secs(1),
            batch_policy: BatchPolicy::FirstFrame,
        }
    }

    /// Resolve settings from an explicit credential and the process environment.
    pub fn resolve(explicit_api_key: Option<&str>) -> Result<Self> {
        Self::resolve_with(explicit_api_key, non_empty_env)
    }

    /// Same as [`ApiConfig::resolve`] with an injectable environment lookup.
    pub fn resolve_with<F>(explicit_api_key: Option<&str>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = resolve_credential(explicit_api_key, &lookup)?;
        let output_dir = match lookup(OUTPUT_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir()?.join("output"),
        };
        let mut config = Self::new(api_key, output_dir);
        if let Some(base_url) = lookup(BASE_URL_ENV) {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let raw = base_url.into();
        let trimmed = raw.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.base_url = trimmed.to_string();
        }
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_request_timeout(mut self, seconds: f64) -> Self {
        self.request_timeout = clamp_secs(seconds, 5.0, 300.0);
        self
    }

    pub fn with_poll_interval(mut self, initial_s: f64, step_s: f64, max_s: f64) -> Self {
        self.poll_interval = clamp_secs(initial_s, 0.0, 60.0);
        self.poll_interval_step = clamp_secs(step_s, 0.0, 60.0);
        self.poll_interval_max = clamp_secs(max_s, 0.0, 120.0).max(self.poll_interval);
        self
    }

    pub fn with_poll_timeout(mut self, seconds: f64) -> Self {
        self.poll_timeout = clamp_secs(seconds, 10.0, 7200.0);
        self
    }

    pub fn with_transport_retries(mut self, retries: usize, backoff_s: f64) -> Self {
        self.transport_retries = retries.min(4);
        self.retry_backoff = clamp_secs(backoff_s, 0.0, 10.0);
        self
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn task_url(&self, task_id: &str) -> String {
        self.endpoint_url(&format!("tasks/{}", task_id.trim()))
    }

    /// Poll delay before poll number `attempt` (zero-based).
    pub fn poll_delay(&self, attempt: u32) -> Duration {
        let grown = self.poll_interval + self.poll_interval_step * attempt;
        grown.min(self.poll_interval_max)
    }
}

/// Explicit value wins; otherwise the environment; otherwise a configuration error.
pub fn resolve_credential<F>(explicit: Option<&str>, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(value.to_string());
    }
    lookup(API_KEY_ENV).ok_or_else(|| {
        GenerationError::configuration(format!(
            "no DashScope API key: pass one explicitly or set {API_KEY_ENV}"
        ))
    })
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn clamp_secs(value: f64, min: f64, max: f64) -> Duration {
    let value = if value.is_finite() { value } else { min };
    Duration::from_secs_f64(value.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{resolve_credential, ApiConfig, API_KEY_ENV, BASE_URL_ENV, OUTPUT_DIR_ENV};
    use crate::error::ErrorKind;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_credential_wins_over_environment() -> anyhow::Result<()> {
        let key = resolve_credential(Some("  sk-explicit "), env_of(&[(API_KEY_ENV, "sk-env")]))?;
        assert_eq!(key, "sk-explicit");
        Ok(())
    }

    #[test]
    fn blank_explicit_credential_falls_back_to_environment() -> anyhow::Result<()> {
        let key = resolve_credential(Some("   "), env_of(&[(API_KEY_ENV, "sk-env")]))?;
        assert_eq!(key, "sk-env");
        Ok(())
    }

    #[test]
    fn missing_credential_is_a_configuration_error() {
        let err = resolve_credential(None, env_of(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn resolve_reads_base_url_and_output_dir() -> anyhow::Result<()> {
        let config = ApiConfig::resolve_with(
            None,
            env_of(&[
                (API_KEY_ENV, "sk-env"),
                (BASE_URL_ENV, "https://dashscope-intl.aliyuncs.com/api/v1/"),
                (OUTPUT_DIR_ENV, "/tmp/funart-out"),
            ]),
        )?;
        assert_eq!(config.api_key(), "sk-env");
        assert_eq!(config.base_url, "https://dashscope-intl.aliyuncs.com/api/v1");
        assert_eq!(config.output_dir.to_string_lossy(), "/tmp/funart-out");
        assert_eq!(
            config.task_url("abc123"),
            "https://dashscope-intl.aliyuncs.com/api/v1/tasks/abc123"
        );
        Ok(())
    }

    #[test]
    fn poll_delay_grows_linearly_up_to_the_cap() {
        let config = ApiConfig::new("sk", "/tmp").with_poll_interval(1.0, 1.0, 3.0);
        assert_eq!(config.poll_delay(0), Duration::from_secs(1));
        assert_eq!(config.poll_delay(1), Duration::from_secs(2));
        assert_eq!(config.poll_delay(5), Duration::from_secs(3));
    }

    #[test]
    fn knobs_are_clamped() {
        let config = ApiConfig::new("sk", "/tmp")
            .with_poll_timeout(1.0)
            .with_transport_retries(9, 50.0)
            .with_request_timeout(f64::NAN);
        assert_eq!(config.poll_timeout, Duration::from_secs(10));
        assert_eq!(config.transport_retries, 4);
        assert_eq!(config.retry_backoff, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn debug_output_redacts_the_credential() {
        let rendered = format!("{:?}", ApiConfig::new("sk-secret", "/tmp"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
