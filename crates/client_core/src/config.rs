use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

pub const SETTINGS_FILE: &str = "promptica.toml";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
    pub reveal_interval_ms: u64,
    pub reveal_chars_per_step: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            auth_token: None,
            request_timeout_secs: 60,
            reveal_interval_ms: 15,
            reveal_chars_per_step: 1,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }

    pub fn base_url(&self) -> Result<Url> {
        let normalized = normalize_base_url(&self.api_base_url);
        Url::parse(&normalized).with_context(|| format!("invalid api base url '{normalized}'"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    api_base_url: Option<String>,
    auth_token: Option<String>,
    request_timeout_secs: Option<u64>,
    reveal_interval_ms: Option<u64>,
    reveal_chars_per_step: Option<usize>,
}

/// Defaults, then `promptica.toml` in the working directory, then environment.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        match apply_file(&mut settings, &raw) {
            Ok(()) => {}
            Err(err) => tracing::warn!("ignoring malformed {SETTINGS_FILE}: {err:#}"),
        }
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn load_settings_from(path: &Path) -> Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let mut settings = ClientSettings::default();
    apply_file(&mut settings, &raw)?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, raw: &str) -> Result<()> {
    let file: SettingsFile = toml::from_str(raw).context("failed to parse settings toml")?;
    if let Some(v) = file.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file.auth_token {
        settings.auth_token = Some(v);
    }
    if let Some(v) = file.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file.reveal_interval_ms {
        settings.reveal_interval_ms = v;
    }
    if let Some(v) = file.reveal_chars_per_step {
        settings.reveal_chars_per_step = v.max(1);
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut ClientSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("PROMPTICA_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("PROMPTICA_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Some(v) = env("APP__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = env("APP__REVEAL_INTERVAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reveal_interval_ms = parsed;
        }
    }
    if let Some(v) = env("APP__REVEAL_CHARS_PER_STEP") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.reveal_chars_per_step = parsed.max(1);
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return DEFAULT_API_BASE_URL.to_string();
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    // Url::join drops the last path segment unless the base ends with '/'.
    if with_scheme.ends_with('/') {
        with_scheme
    } else {
        format!("{with_scheme}/")
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
