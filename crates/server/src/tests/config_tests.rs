use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn keeps_existing_sqlite_urls() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite://./data/a.db?mode=rwc"),
        "sqlite://./data/a.db?mode=rwc"
    );
}

#[test]
fn blank_database_url_falls_back_to_default() {
    assert_eq!(
        normalize_database_url("   "),
        Settings::default().database_url
    );
}

#[test]
fn creates_parent_dir_for_sqlite_url() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("postpilot_server_test_{suffix}"));
    let db_path = temp_root.join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.join("data").exists());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn file_settings_parse_provider_tables() {
    let raw = r#"
        bind_addr = "0.0.0.0:9000"
        dev_mode = true
        credential_write_delay_ms = 2500

        [providers.linkedin]
        client_id = "li-id"
        client_secret = "li-secret"

        [providers.myspace]
        client_id = "x"
        client_secret = "y"
    "#;
    let file_cfg: FileSettings = toml::from_str(raw).expect("toml");
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, file_cfg);

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert!(settings.dev_mode);
    assert_eq!(settings.credential_write_delay_ms, 2500);
    assert_eq!(settings.providers.len(), 1);
    assert_eq!(
        settings.providers[&Platform::Linkedin].client_id,
        "li-id"
    );
}

#[test]
fn env_overrides_take_precedence() {
    let vars: HashMap<&str, &str> = [
        ("APP__BIND_ADDR", "127.0.0.1:1234"),
        ("APP__DEV_MODE", "true"),
        ("APP__TWITTER_CLIENT_ID", "tw-id"),
        ("APP__TWITTER_CLIENT_SECRET", "tw-secret"),
        ("APP__TIKTOK_CLIENT_ID", "only-id"),
    ]
    .into_iter()
    .collect();

    let mut settings = Settings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_bind, "127.0.0.1:1234");
    assert!(settings.dev_mode);
    assert_eq!(settings.providers[&Platform::Twitter].client_secret, "tw-secret");
    assert!(!settings.providers.contains_key(&Platform::Tiktok));
}

#[test]
fn defaults_refuse_to_start_without_a_state_secret() {
    let settings = Settings::default();
    assert!(!settings.dev_mode);
    assert!(settings.validate().is_err());

    let dev = Settings {
        dev_mode: true,
        ..Settings::default()
    };
    dev.validate().expect("dev mode may use the built-in secret");

    let configured = Settings {
        state_secret: "a-long-random-secret".into(),
        ..Settings::default()
    };
    configured.validate().expect("configured secret");

    let bad_ttl = Settings {
        state_ttl_seconds: 0,
        ..configured
    };
    assert!(bad_ttl.validate().is_err());
}
