use std::io::Write;

use vantage_config::WorkerConfig;

#[test]
fn defaults_are_usable_without_any_file() {
    let config = WorkerConfig::default();
    assert!(config.redis_url.starts_with("redis://"));
    assert!(config.database_url.starts_with("postgres://"));
    assert_eq!(config.reclaim.stale_after_secs, 30 * 60);
    assert!(config.worker.module_concurrency >= 1);
    assert!(config.credentials.shodan_api_key.is_none());
}

#[test]
fn partial_toml_overrides_keep_remaining_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("tempfile");
    write!(
        file,
        r#"
redis_url = "redis://queue.internal:6379"

[worker]
module_concurrency = 4

[reclaim]
stale_after_secs = 600
"#
    )
    .expect("write config");

    let config = WorkerConfig::load_from_path(&file.path().to_path_buf())
        .expect("load toml");
    assert_eq!(config.redis_url, "redis://queue.internal:6379");
    assert_eq!(config.worker.module_concurrency, 4);
    assert_eq!(config.reclaim.stale_after_secs, 600);
    // Untouched sections fall back to defaults.
    assert_eq!(config.reclaim.sweep_interval_secs, 60);
    assert_eq!(config.worker.http_timeout_secs, 20);
}

#[test]
fn json_files_parse_by_extension() {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("tempfile");
    write!(
        file,
        r#"{{
            "database_url": "postgres://scan@db.internal/vantage",
            "credentials": {{ "shodan_api_key": "test-key" }}
        }}"#
    )
    .expect("write config");

    let config = WorkerConfig::load_from_path(&file.path().to_path_buf())
        .expect("load json");
    assert_eq!(
        config.database_url,
        "postgres://scan@db.internal/vantage"
    );
    assert_eq!(
        config.credentials.shodan_api_key.as_deref(),
        Some("test-key")
    );
}

#[test]
fn garbage_files_are_rejected_with_context() {
    let mut file = tempfile::Builder::new()
        .suffix(".cfg")
        .tempfile()
        .expect("tempfile");
    file.write_all(b"= definitely not structured data =")
        .expect("write");

    let err = WorkerConfig::load_from_path(&file.path().to_path_buf())
        .expect_err("unparseable file must fail");
    assert!(err.to_string().contains("neither valid TOML"));
}
