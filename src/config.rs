//! Persisted client settings.
//!
//! The base URL of the model server and the probe tunables live in a single
//! [`Settings`] object, stored as TOML under the platform config directory.
//! Settings are constructed explicitly and passed into every HTTP-issuing
//! component; there is no module-level mutable state. Changing the base URL
//! goes through [`Settings::update_base_url`], which commits the new value
//! only after the candidate endpoint answers a live probe.

use crate::error::{ChatError, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default model server address (Ollama's loopback port).
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Client settings, persisted across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the model server.
    pub base_url: String,
    /// Hard deadline for a single health probe, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Probe attempts per check before settling into a failed state.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between probe attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Interval between unconditional background probes, in seconds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Treat a pull stream that closes without a terminal status as aborted
    /// instead of successful.
    #[serde(default)]
    pub strict_stream_end: bool,
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_probe_interval_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            strict_stream_end: false,
        }
    }
}

impl Settings {
    /// Create settings for a specific base URL, defaults elsewhere.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the probe timeout in milliseconds.
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the probe attempt count.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the delay between probe attempts in milliseconds.
    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the background probe interval in seconds.
    pub fn with_probe_interval_secs(mut self, secs: u64) -> Self {
        self.probe_interval_secs = secs;
        self
    }

    /// Enable or disable strict stream-end handling.
    pub fn with_strict_stream_end(mut self, strict: bool) -> Self {
        self.strict_stream_end = strict;
        self
    }

    /// Probe timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Background probe interval as a [`Duration`].
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Default on-disk location: `<config_dir>/wren/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wren").join("settings.toml"))
    }

    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ChatError::Config(format!(
                    "failed to read settings ({}): {e}",
                    path.display()
                )));
            }
        };

        let settings: Self = toml::from_str(&raw).map_err(|e| {
            ChatError::Config(format!("invalid settings ({}): {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings as TOML, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| ChatError::Config(format!("failed to serialize settings: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Update the base URL after verifying the candidate endpoint is live.
    ///
    /// Probes `{url}/api/tags` with the configured timeout and commits the
    /// new URL only on a 2xx answer. On failure the previous URL is kept and
    /// the classified error is returned.
    pub async fn update_base_url(&mut self, url: impl Into<String>) -> Result<()> {
        let candidate = normalize_base_url(url.into())?;
        probe_tags_endpoint(&candidate, self.connect_timeout()).await?;
        self.base_url = candidate;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ChatError::Config("base_url is empty".to_owned()));
        }
        if self.retry_attempts == 0 {
            return Err(ChatError::Config(
                "retry_attempts must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Trim and sanity-check a candidate base URL.
fn normalize_base_url(url: String) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ChatError::Config("base URL is empty".to_owned()));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ChatError::Config(format!(
            "base URL must start with http:// or https://: {trimmed}"
        )));
    }
    Ok(trimmed.to_owned())
}

/// One bounded probe of `{base}/api/tags`, used to vet a candidate URL.
async fn probe_tags_endpoint(base_url: &str, timeout: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|_| ChatError::Server(ErrorKind::NetworkUnreachable))?;

    let url = format!("{base_url}/api/tags");
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ChatError::Server(ErrorKind::from_reqwest(&e)))?;

    if !resp.status().is_success() {
        return Err(ChatError::Server(ErrorKind::HttpStatus(
            resp.status().as_u16(),
        )));
    }
    Ok(())
}
