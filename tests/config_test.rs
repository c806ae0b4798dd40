use std::time::Duration;

use serial_test::serial;
use vivavoce::config::{Config, Settings};

#[test]
#[serial]
fn config_from_env_loads_required_fields() {
    // Set required env vars for test
    unsafe {
        std::env::set_var("DATABASE_URL", "sqlite://viva-test.db");
        std::env::set_var("SCORER_URL", "http://localhost:9090/score");
        std::env::set_var("SCORER_API_KEY", "sk-test-key");
        std::env::remove_var("MEDIA_ROOT");
        std::env::remove_var("LOG_LEVEL");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.scorer_url, "http://localhost:9090/score");
    assert_eq!(config.media_root, "media");
    assert_eq!(config.log_level, "info");

    // Clean up
    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("SCORER_URL");
        std::env::remove_var("SCORER_API_KEY");
    }
}

#[test]
#[serial]
fn config_from_env_fails_without_required() {
    unsafe {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("SCORER_URL");
        std::env::remove_var("SCORER_API_KEY");
    }

    let result = Config::from_env();
    assert!(result.is_err());
}

#[test]
fn settings_defaults_are_complete() {
    let settings = Settings::default();

    let queue = settings.queue_config();
    assert_eq!(queue.poll_interval, Duration::from_secs(5));
    assert_eq!(queue.max_concurrent, 3);
    assert_eq!(queue.max_retries, 5);
    assert_eq!(queue.retry.max_retries, 3);
    assert_eq!(queue.retry.base_delay, Duration::from_millis(1000));
    assert_eq!(queue.retry.max_delay, Duration::from_millis(30_000));

    let monitor = settings.monitor_config();
    assert_eq!(monitor.check_interval, Duration::from_secs(60));
    assert_eq!(monitor.stale_after, Duration::from_secs(600));
    assert_eq!(monitor.warning_backlog, 50);
    assert_eq!(monitor.critical_backlog, 200);

    assert_eq!(settings.request_timeout(), Duration::from_secs(300));
}

#[test]
fn partial_settings_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("viva.toml");
    std::fs::write(
        &path,
        "[queue]\nmax_concurrent = 8\n\n[monitor]\nwarning_backlog = 10\n",
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.queue.max_concurrent, 8);
    assert_eq!(settings.queue.max_retries, 5);
    assert_eq!(settings.monitor.warning_backlog, 10);
    assert_eq!(settings.monitor.critical_backlog, 200);
    assert_eq!(settings.scorer.request_timeout_secs, 300);
}

#[test]
fn malformed_settings_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("viva.toml");
    std::fs::write(&path, "queue = \"not a table\"").unwrap();

    assert!(Settings::load(&path).is_err());
}

#[test]
fn missing_settings_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist.toml");

    assert!(Settings::load(&path).is_err());
}
