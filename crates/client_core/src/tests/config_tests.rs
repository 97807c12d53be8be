use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_bare_host_to_http_url_with_trailing_slash() {
    assert_eq!(normalize_base_url("localhost:8000"), "http://localhost:8000/");
}

#[test]
fn keeps_trailing_slash_and_scheme() {
    assert_eq!(
        normalize_base_url("https://promtica.applikuapp.com/"),
        "https://promtica.applikuapp.com/"
    );
}

#[test]
fn empty_base_url_falls_back_to_default() {
    assert_eq!(normalize_base_url("   "), DEFAULT_API_BASE_URL);
}

#[test]
fn base_url_joins_api_paths_under_prefix() {
    let settings = ClientSettings {
        api_base_url: "http://example.test/api".into(),
        ..ClientSettings::default()
    };
    let joined = settings
        .base_url()
        .expect("base url")
        .join("conversations/user/")
        .expect("join");
    assert_eq!(joined.as_str(), "http://example.test/api/conversations/user/");
}

#[test]
fn file_values_override_defaults() {
    let mut settings = ClientSettings::default();
    apply_file(
        &mut settings,
        r#"
api_base_url = "https://chat.example"
auth_token = "abc"
reveal_interval_ms = 0
reveal_chars_per_step = 0
"#,
    )
    .expect("apply file");

    assert_eq!(settings.api_base_url, "https://chat.example");
    assert_eq!(settings.auth_token.as_deref(), Some("abc"));
    assert_eq!(settings.reveal_interval_ms, 0);
    assert_eq!(settings.reveal_chars_per_step, 1);
    assert_eq!(settings.request_timeout_secs, 60);
}

#[test]
fn app_prefixed_env_wins_over_short_alias() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("PROMPTICA_API_URL", "http://alias"),
        ("APP__API_BASE_URL", "http://app"),
        ("APP__REVEAL_INTERVAL_MS", "40"),
        ("APP__REQUEST_TIMEOUT_SECS", "not-a-number"),
    ]);
    let mut settings = ClientSettings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.api_base_url, "http://app");
    assert_eq!(settings.reveal_interval_ms, 40);
    assert_eq!(settings.request_timeout_secs, 60);
}

#[test]
fn load_settings_from_reports_missing_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("promptica_missing_{suffix}.toml"));

    let err = load_settings_from(&path).expect_err("missing file");
    assert!(err.to_string().contains("failed to read settings file"));
}

#[test]
fn load_settings_from_reads_toml_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("promptica_settings_{suffix}.toml"));
    std::fs::write(&path, "request_timeout_secs = 5\n").expect("write settings");

    let settings = load_settings_from(&path).expect("load settings");
    assert_eq!(settings.request_timeout_secs, 5);

    std::fs::remove_file(path).expect("cleanup");
}
