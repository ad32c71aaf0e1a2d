use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn file_values_replace_defaults() {
    let file_cfg: FileSettings = toml::from_str(
        r#"
        backend_url = "https://api.example.test"
        workspace_id = 12
        open_browser = false
        "#,
    )
    .expect("parse");

    let mut settings = Settings::default();
    apply_file_settings(&mut settings, file_cfg);

    assert_eq!(settings.backend_url, "https://api.example.test");
    assert_eq!(settings.workspace_id, Some(12));
    assert!(!settings.open_browser);
    assert_eq!(settings.callback_bind, Settings::default().callback_bind);
}

#[test]
fn short_env_names_win_over_prefixed_ones() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("BACKEND_URL", "http://short.test"),
            ("APP__BACKEND_URL", "http://prefixed.test"),
            ("APP__WORKSPACE_ID", "7"),
            ("SESSION_TOKEN", "tok"),
        ]),
    );

    assert_eq!(settings.backend_url, "http://short.test");
    assert_eq!(settings.workspace_id, Some(7));
    assert_eq!(settings.session_token.as_deref(), Some("tok"));
}

#[test]
fn invalid_workspace_id_and_blank_token_are_ignored() {
    let mut settings = Settings {
        workspace_id: Some(3),
        ..Settings::default()
    };
    apply_env_overrides(
        &mut settings,
        env_from(&[("WORKSPACE_ID", "abc"), ("SESSION_TOKEN", "  ")]),
    );

    assert_eq!(settings.workspace_id, Some(3));
    assert_eq!(settings.session_token, None);
}

#[test]
fn missing_file_keeps_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("postpilot_accounts_missing_{suffix}.toml"));

    let settings = load_settings(&path);
    assert_eq!(settings.callback_bind, "127.0.0.1:8790");
}
