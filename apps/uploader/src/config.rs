use std::{fs, path::Path, time::Duration};

use shared::domain::DEFAULT_FOLDER;
use toml::{Table, Value};
use upload_core::{transport::DEFAULT_UPLOAD_PATH, HttpTransportOptions};

pub const SETTINGS_FILE: &str = "uploader.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub upload_path: String,
    pub default_folder: String,
    pub auth_token: Option<String>,
    pub progress_clear_ms: u64,
    pub request_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".into(),
            upload_path: DEFAULT_UPLOAD_PATH.into(),
            default_folder: DEFAULT_FOLDER.into(),
            auth_token: None,
            progress_clear_ms: 1000,
            request_timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn transport_options(&self) -> HttpTransportOptions {
        HttpTransportOptions {
            server_url: self.server_url.clone(),
            upload_path: Some(self.upload_path.clone()),
            auth_token: self.auth_token.clone(),
            timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn progress_clear_delay(&self) -> Duration {
        Duration::from_millis(self.progress_clear_ms)
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then environment variables.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<Table>(&raw) {
            apply_file(&mut settings, &file_cfg);
        }
    }

    if let Some(v) = env("UPLOADER_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("APP__UPLOAD_PATH") {
        settings.upload_path = v;
    }

    if let Some(v) = env("APP__DEFAULT_FOLDER") {
        settings.default_folder = v;
    }

    if let Some(v) = env("UPLOADER_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Some(v) = env("APP__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    if let Some(v) = env("APP__PROGRESS_CLEAR_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.progress_clear_ms = parsed;
        }
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = Some(parsed);
        }
    }

    settings.auth_token = settings.auth_token.filter(|token| !token.trim().is_empty());
    settings
}

fn apply_file(settings: &mut Settings, file_cfg: &Table) {
    if let Some(v) = file_cfg.get("server_url").and_then(Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("upload_path").and_then(Value::as_str) {
        settings.upload_path = v.to_string();
    }
    if let Some(v) = file_cfg.get("default_folder").and_then(Value::as_str) {
        settings.default_folder = v.to_string();
    }
    if let Some(v) = file_cfg.get("auth_token").and_then(Value::as_str) {
        settings.auth_token = Some(v.to_string());
    }
    if let Some(v) = file_cfg.get("progress_clear_ms").and_then(non_negative) {
        settings.progress_clear_ms = v;
    }
    if let Some(v) = file_cfg.get("request_timeout_secs").and_then(non_negative) {
        settings.request_timeout_secs = Some(v);
    }
}

fn non_negative(value: &Value) -> Option<u64> {
    value.as_integer().and_then(|v| u64::try_from(v).ok())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
