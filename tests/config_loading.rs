use std::io::Write;

use hintbridge::config::save_config;
use hintbridge::{load_config, HintbridgeConfig};
use hintbridge_core_types::ResourceType;

#[tokio::test]
async fn partial_yaml_keeps_defaults_for_the_rest() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "tap:\n  resource_types: [main_frame, script]\n  suppress_when_panel: false\nconnector:\n  snapshot_timeout_ms: 250\n"
    )
    .expect("write config");

    let path = file.path().to_path_buf();
    let loaded = load_config(Some(&path)).await.expect("config loads");
    assert_eq!(loaded.path, path);

    let config = loaded.config;
    assert!(config.tap.tracks(ResourceType::Script));
    assert!(!config.tap.tracks(ResourceType::Image));
    assert!(!config.tap.suppress_when_panel);
    assert_eq!(config.tap.request_ttl_ms, 5 * 60 * 1000);
    assert_eq!(config.connector.snapshot_timeout_ms, Some(250));
    assert_eq!(config.bridge.injection_attempts, 3);
}

#[tokio::test]
async fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    let loaded = load_config(Some(&path)).await.expect("defaults");
    assert_eq!(loaded.config.bridge, HintbridgeConfig::default().bridge);
    assert!(loaded.config.tap.suppress_when_panel);
}

#[tokio::test]
async fn malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "tap: [not, a, map]").expect("write config");
    let path = file.path().to_path_buf();
    let err = load_config(Some(&path)).await.err().expect("parse error");
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[tokio::test]
async fn saved_defaults_load_back() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("config.yaml");
    save_config(&path, &HintbridgeConfig::default())
        .await
        .expect("save");
    let loaded = load_config(Some(&path)).await.expect("load");
    assert_eq!(loaded.config.bridge.content_script, "content-script/webhint.js");
    assert_eq!(loaded.config.tap.maintenance_interval_ms, 30_000);
    assert_eq!(loaded.config.connector.wait_for_ms, 1_000);
}
