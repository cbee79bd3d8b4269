use super::{load_settings_from, Settings};

use std::{
    collections::HashMap,
    env, fs,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn no_env(_key: &str) -> Option<String> {
    None
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

fn write_settings_file(label: &str, contents: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("uploader_config_{label}_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("uploader.toml");
    fs::write(&path, contents).expect("write settings");
    path
}

#[test]
fn missing_file_keeps_defaults() {
    let settings = load_settings_from(Path::new("/nonexistent/uploader.toml"), no_env);
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.upload_path, "/api/upload");
    assert_eq!(settings.default_folder, "classwork");
    assert_eq!(settings.progress_clear_delay(), Duration::from_secs(1));
    assert!(settings.transport_options().timeout.is_none());
}

#[test]
fn file_values_override_defaults() {
    let path = write_settings_file(
        "file_values",
        r#"
server_url = "https://lms.example.edu"
default_folder = "submissions"
progress_clear_ms = 250
request_timeout_secs = 30
"#,
    );

    let settings = load_settings_from(&path, no_env);

    assert_eq!(settings.server_url, "https://lms.example.edu");
    assert_eq!(settings.default_folder, "submissions");
    assert_eq!(settings.progress_clear_ms, 250);
    assert_eq!(
        settings.transport_options().timeout,
        Some(Duration::from_secs(30))
    );

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn environment_wins_over_file() {
    let path = write_settings_file(
        "env_wins",
        "server_url = \"https://from-file.test\"\nauth_token = \"file-token\"\n",
    );

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("UPLOADER_SERVER_URL", "https://legacy.test"),
            ("APP__SERVER_URL", "https://from-env.test"),
            ("APP__AUTH_TOKEN", "env-token"),
            ("APP__PROGRESS_CLEAR_MS", "not-a-number"),
        ]),
    );

    assert_eq!(settings.server_url, "https://from-env.test");
    assert_eq!(settings.auth_token.as_deref(), Some("env-token"));
    assert_eq!(settings.progress_clear_ms, 1000);

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn blank_token_means_no_auth() {
    let settings = load_settings_from(
        Path::new("/nonexistent/uploader.toml"),
        env_from(&[("UPLOADER_TOKEN", "  ")]),
    );
    assert!(settings.auth_token.is_none());
}

#[test]
fn malformed_file_is_ignored() {
    let path = write_settings_file("malformed", "server_url = [unterminated");

    let settings = load_settings_from(&path, no_env);
    assert_eq!(settings, Settings::default());

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}
