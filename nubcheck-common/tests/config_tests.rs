//! Unit tests for configuration loading
//!
//! Covers:
//! - Missing config files fall back to defaults
//! - TOML values override defaults, ENV overrides TOML
//! - Malformed TOML is a hard error
//!
//! Tests that touch real process environment variables are marked #[serial].

use nubcheck_common::config::{AppConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::collections::HashMap;
use std::path::PathBuf;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = AppConfig::default();

    assert_eq!(config.server.listen, "127.0.0.1:5780");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.payments.signature_tolerance_secs, 300);
    assert_eq!(config.images.url_ttl_secs, 86_400);
    assert_eq!(config.images.max_bytes, 10 * 1024 * 1024);
    assert!(config.review.auto_resolve_confidence.is_none());
    assert!(config.admin.token.is_none());
    assert!(config.database_path().ends_with("nubcheck.db"));
}

#[test]
fn test_partial_toml_keeps_defaults_for_missing_keys() {
    let config = AppConfig::from_toml_str(
        r#"
        [server]
        public_base_url = "https://nub.example"

        [review]
        auto_resolve_confidence = 95.0

        [database]
        path = "/var/lib/nubcheck/test.db"
        "#,
    )
    .unwrap();

    assert_eq!(config.server.public_base_url, "https://nub.example");
    assert_eq!(config.server.listen, "127.0.0.1:5780");
    assert_eq!(config.review.auto_resolve_confidence, Some(95.0));
    assert_eq!(
        config.database_path(),
        PathBuf::from("/var/lib/nubcheck/test.db")
    );
    assert_eq!(config.jobs.max_attempts, 8);
}

#[test]
fn test_malformed_toml_is_error() {
    assert!(AppConfig::from_toml_str("[server\nlisten = ").is_err());
    assert!(AppConfig::from_toml_str("[jobs]\nmax_attempts = \"many\"").is_err());
}

#[test]
fn test_env_overrides_toml() {
    let mut config = AppConfig::from_toml_str(
        r#"
        [payments]
        stripe_webhook_secret = "whsec_from_toml"
        "#,
    )
    .unwrap();

    config.apply_env(env_from(&[
        ("NUBCHECK_PAYMENTS_STRIPE_WEBHOOK_SECRET", "whsec_from_env"),
        ("NUBCHECK_SERVER_LISTEN", "0.0.0.0:8080"),
        ("NUBCHECK_JOBS_MAX_ATTEMPTS", "3"),
        ("NUBCHECK_REVIEW_AUTO_RESOLVE_CONFIDENCE", "97.5"),
    ]));

    assert_eq!(
        config.payments.stripe_webhook_secret.as_deref(),
        Some("whsec_from_env")
    );
    assert_eq!(config.server.listen, "0.0.0.0:8080");
    assert_eq!(config.jobs.max_attempts, 3);
    assert_eq!(config.review.auto_resolve_confidence, Some(97.5));
}

#[test]
fn test_unparsable_env_values_are_ignored() {
    let mut config = AppConfig::default();
    config.apply_env(env_from(&[
        ("NUBCHECK_JOBS_MAX_ATTEMPTS", "lots"),
        ("NUBCHECK_REVIEW_AUTO_RESOLVE_CONFIDENCE", "high"),
        ("NUBCHECK_ADMIN_TOKEN", "   "),
    ]));

    assert_eq!(config.jobs.max_attempts, 8);
    assert!(config.review.auto_resolve_confidence.is_none());
    assert!(config.admin.token.is_none());
}

#[test]
fn test_explicit_missing_file_is_error() {
    let result = AppConfig::load(
        Some(std::path::Path::new("/nonexistent/nubcheck.toml")),
        env_from(&[]),
    );
    assert!(result.is_err());
}

#[test]
fn test_load_from_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[admin]\ntoken = \"s3cret\"\n").unwrap();

    let config = AppConfig::load(Some(&path), env_from(&[])).unwrap();
    assert_eq!(config.admin.token.as_deref(), Some("s3cret"));
}

#[test]
fn test_validate_reports_missing_secrets() {
    let warnings = AppConfig::default().validate();
    assert!(warnings.iter().any(|w| w.contains("stripe_webhook_secret")));
    assert!(warnings.iter().any(|w| w.contains("telegram_webhook_secret")));

    let mut config = AppConfig::default();
    config.review.auto_resolve_confidence = Some(150.0);
    assert!(config.validate().iter().any(|w| w.contains("outside 0-100")));
}

#[test]
#[serial]
fn test_config_path_from_real_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("from-env.toml");
    std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

    std::env::set_var(CONFIG_ENV_VAR, &path);
    let config = AppConfig::load(None, |key| std::env::var(key).ok()).unwrap();
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.logging.level, "debug");
}
