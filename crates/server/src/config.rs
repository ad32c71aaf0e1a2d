use std::{collections::HashMap, fs, str::FromStr};

use anyhow::Context;
use serde::Deserialize;
use shared::domain::Platform;

/// Only accepted while `dev_mode` is on.
const DEV_STATE_SECRET: &str = "dev-state-secret";

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub public_base_url: String,
    pub frontend_redirect_url: String,
    pub state_secret: String,
    pub state_ttl_seconds: i64,
    pub dev_mode: bool,
    /// Delay before a freshly exchanged credential is written; reproduces the
    /// lag between the redirect and the status endpoint seeing the account.
    pub credential_write_delay_ms: u64,
    pub providers: HashMap<Platform, ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/server.db".into(),
            public_base_url: "http://127.0.0.1:8443".into(),
            frontend_redirect_url: "http://127.0.0.1:8790/accounts".into(),
            state_secret: DEV_STATE_SECRET.into(),
            state_ttl_seconds: 600,
            dev_mode: false,
            credential_write_delay_ms: 0,
            providers: HashMap::new(),
        }
    }
}

impl Settings {
    /// Refuses to sign real OAuth state with the built-in secret.
    pub fn validate(&self) -> anyhow::Result<()> {
        let secret = self.state_secret.trim();
        if !self.dev_mode && (secret.is_empty() || secret == DEV_STATE_SECRET) {
            anyhow::bail!(
                "state_secret must be set (APP__STATE_SECRET or server.toml) unless dev_mode is enabled"
            );
        }
        if !(1..=86_400).contains(&self.state_ttl_seconds) {
            anyhow::bail!("state_ttl_seconds must be between 1 and 86400");
        }
        Ok(())
    }
}

/// Shape of `server.toml`. Every key is optional; unset keys keep defaults.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    public_base_url: Option<String>,
    frontend_redirect_url: Option<String>,
    state_secret: Option<String>,
    state_ttl_seconds: Option<i64>,
    dev_mode: Option<bool>,
    credential_write_delay_ms: Option<u64>,
    #[serde(default)]
    providers: HashMap<String, ProviderSettings>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(error) => tracing::warn!(%error, "ignoring malformed server.toml"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.public_base_url {
        settings.public_base_url = v;
    }
    if let Some(v) = file_cfg.frontend_redirect_url {
        settings.frontend_redirect_url = v;
    }
    if let Some(v) = file_cfg.state_secret {
        settings.state_secret = v;
    }
    if let Some(v) = file_cfg.state_ttl_seconds {
        settings.state_ttl_seconds = v;
    }
    if let Some(v) = file_cfg.dev_mode {
        settings.dev_mode = v;
    }
    if let Some(v) = file_cfg.credential_write_delay_ms {
        settings.credential_write_delay_ms = v;
    }
    for (name, provider) in file_cfg.providers {
        match Platform::from_str(&name) {
            Ok(platform) => {
                settings.providers.insert(platform, provider);
            }
            Err(error) => tracing::warn!(%error, "ignoring provider section"),
        }
    }
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("SERVER_BIND").or_else(|| env("APP__BIND_ADDR")) {
        settings.server_bind = v;
    }
    if let Some(v) = env("DATABASE_URL").or_else(|| env("APP__DATABASE_URL")) {
        settings.database_url = v;
    }
    if let Some(v) = env("PUBLIC_BASE_URL").or_else(|| env("APP__PUBLIC_BASE_URL")) {
        settings.public_base_url = v;
    }
    if let Some(v) = env("FRONTEND_REDIRECT_URL").or_else(|| env("APP__FRONTEND_REDIRECT_URL")) {
        settings.frontend_redirect_url = v;
    }
    if let Some(v) = env("APP__STATE_SECRET") {
        settings.state_secret = v;
    }
    if let Some(parsed) = env("APP__STATE_TTL_SECONDS").and_then(|v| v.parse::<i64>().ok()) {
        settings.state_ttl_seconds = parsed;
    }
    if let Some(v) = env("APP__DEV_MODE") {
        settings.dev_mode = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Some(parsed) =
        env("APP__CREDENTIAL_WRITE_DELAY_MS").and_then(|v| v.parse::<u64>().ok())
    {
        settings.credential_write_delay_ms = parsed;
    }

    for platform in Platform::ALL {
        let prefix = format!("APP__{}", platform.as_str().to_ascii_uppercase());
        let client_id = env(&format!("{prefix}_CLIENT_ID"));
        let client_secret = env(&format!("{prefix}_CLIENT_SECRET"));
        if let (Some(client_id), Some(client_secret)) = (client_id, client_secret) {
            settings.providers.insert(
                platform,
                ProviderSettings {
                    client_id,
                    client_secret,
                },
            );
        }
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.replace('\\', "/");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .filter(|rest| !rest.starts_with(":memory:"))
        .and_then(|rest| rest.split('?').next())
        .filter(|rest| !rest.is_empty())
    else {
        return Ok(());
    };

    let Some(parent) = std::path::Path::new(path).parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
