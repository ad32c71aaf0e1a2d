use std::{fs, path::Path};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub workspace_id: Option<i64>,
    pub session_token: Option<String>,
    /// Where the loopback listener waits for the backend's redirect. Must
    /// match the backend's `frontend_redirect_url` host and port.
    pub callback_bind: String,
    pub open_browser: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8443".into(),
            workspace_id: None,
            session_token: None,
            callback_bind: "127.0.0.1:8790".into(),
            open_browser: true,
        }
    }
}

/// Shape of `accounts.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend_url: Option<String>,
    workspace_id: Option<i64>,
    session_token: Option<String>,
    callback_bind: Option<String>,
    open_browser: Option<bool>,
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring malformed settings file")
            }
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file_cfg.workspace_id {
        settings.workspace_id = Some(v);
    }
    if let Some(v) = file_cfg.session_token {
        settings.session_token = Some(v);
    }
    if let Some(v) = file_cfg.callback_bind {
        settings.callback_bind = v;
    }
    if let Some(v) = file_cfg.open_browser {
        settings.open_browser = v;
    }
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("BACKEND_URL").or_else(|| env("APP__BACKEND_URL")) {
        settings.backend_url = v;
    }
    if let Some(v) = env("WORKSPACE_ID").or_else(|| env("APP__WORKSPACE_ID")) {
        match v.trim().parse::<i64>() {
            Ok(id) => settings.workspace_id = Some(id),
            Err(error) => tracing::warn!(value = %v, %error, "ignoring invalid workspace id"),
        }
    }
    if let Some(v) = env("SESSION_TOKEN").or_else(|| env("APP__SESSION_TOKEN")) {
        settings.session_token = Some(v).filter(|token| !token.trim().is_empty());
    }
    if let Some(v) = env("APP__CALLBACK_BIND") {
        settings.callback_bind = v;
    }
    if let Some(v) = env("APP__OPEN_BROWSER") {
        settings.open_browser =
            matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
