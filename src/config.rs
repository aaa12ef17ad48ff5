use serde::{Deserialize, Serialize};

use crate::error::{Result, TidepoolError};

/// Main configuration for a tidepool session context
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub endpoints: EndpointConfig,
    pub redirect: RedirectConfig,
    pub channel: ChannelConfig,
    pub retry: RetryConfig,
    pub submission: SubmissionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// GET endpoint returning the current session (401 when none).
    #[serde(default = "default_session_endpoint")]
    pub session_url: String,
    /// POST endpoint invalidating the server-side session.
    #[serde(default = "default_sign_out_endpoint")]
    pub sign_out_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    /// Path the redirect guard navigates to on loss of session.
    #[serde(default = "default_sign_in_path")]
    pub sign_in_path: String,
    /// Paths under this prefix never trigger a redirect (already on an
    /// auth screen).
    #[serde(default = "default_auth_path_prefix")]
    pub auth_path_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Automatic retries after a failed session fetch before the outage
    /// becomes terminal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on each consecutive failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmissionConfig {
    /// A key re-registered within this window is rejected as a duplicate.
    #[serde(default = "default_submission_window_ms")]
    pub window_ms: u64,
    /// Registry size that triggers a lazy sweep of stale keys.
    #[serde(default = "default_submission_capacity")]
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            redirect: RedirectConfig::default(),
            channel: ChannelConfig::default(),
            retry: RetryConfig::default(),
            submission: SubmissionConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            session_url: default_session_endpoint(),
            sign_out_url: default_sign_out_endpoint(),
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            sign_in_path: default_sign_in_path(),
            auth_path_prefix: default_auth_path_prefix(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_submission_window_ms(),
            capacity: default_submission_capacity(),
        }
    }
}

fn default_session_endpoint() -> String {
    "http://localhost:3000/api/auth/session".to_string()
}

fn default_sign_out_endpoint() -> String {
    "http://localhost:3000/api/auth/sign-out".to_string()
}

fn default_sign_in_path() -> String {
    "/auth/sign-in".to_string()
}

fn default_auth_path_prefix() -> String {
    "/auth".to_string()
}

fn default_channel_name() -> String {
    "tidepool.session".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_submission_window_ms() -> u64 {
    5000
}

fn default_submission_capacity() -> usize {
    500
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_session_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.session_url = url.into();
        self
    }

    pub fn with_sign_out_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.sign_out_url = url.into();
        self
    }

    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.config.redirect.sign_in_path = path.into();
        self
    }

    pub fn with_auth_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.redirect.auth_path_prefix = prefix.into();
        self
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.config.channel.name = name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.retry.base_delay_ms = delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.retry.max_delay_ms = delay_ms;
        self
    }

    pub fn with_submission_window_ms(mut self, window_ms: u64) -> Self {
        self.config.submission.window_ms = window_ms;
        self
    }

    pub fn with_submission_capacity(mut self, capacity: usize) -> Self {
        self.config.submission.capacity = capacity;
        self
    }

    /// Apply overrides from `TIDEPOOL_*` environment variables
    ///
    /// Recognized: `TIDEPOOL_SESSION_URL`, `TIDEPOOL_SIGN_OUT_URL`,
    /// `TIDEPOOL_SIGN_IN_PATH`, `TIDEPOOL_CHANNEL_NAME`,
    /// `TIDEPOOL_MAX_RETRIES`, `TIDEPOOL_BASE_DELAY_MS`,
    /// `TIDEPOOL_MAX_DELAY_MS`.
    pub fn from_env(mut self) -> Self {
        if let Ok(url) = std::env::var("TIDEPOOL_SESSION_URL") {
            self.config.endpoints.session_url = url;
        }
        if let Ok(url) = std::env::var("TIDEPOOL_SIGN_OUT_URL") {
            self.config.endpoints.sign_out_url = url;
        }
        if let Ok(path) = std::env::var("TIDEPOOL_SIGN_IN_PATH") {
            self.config.redirect.sign_in_path = path;
        }
        if let Ok(name) = std::env::var("TIDEPOOL_CHANNEL_NAME") {
            self.config.channel.name = name;
        }
        if let Ok(v) = std::env::var("TIDEPOOL_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.config.retry.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("TIDEPOOL_BASE_DELAY_MS") {
            if let Ok(parsed) = v.parse() {
                self.config.retry.base_delay_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("TIDEPOOL_MAX_DELAY_MS") {
            if let Ok(parsed) = v.parse() {
                self.config.retry.max_delay_ms = parsed;
            }
        }
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.config.retry.base_delay_ms == 0 {
            return Err(TidepoolError::config("base_delay_ms must be non-zero"));
        }
        if self.config.retry.max_delay_ms < self.config.retry.base_delay_ms {
            return Err(TidepoolError::config(
                "max_delay_ms must be >= base_delay_ms",
            ));
        }
        if !self.config.redirect.sign_in_path.starts_with('/') {
            return Err(TidepoolError::config("sign_in_path must be absolute"));
        }
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
