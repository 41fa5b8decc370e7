use std::path::PathBuf;

use nova_config::{ConfigError, WorkspaceModelConfig};
use pretty_assertions::assert_eq;

#[test]
fn loads_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nova.toml");
    std::fs::write(
        &path,
        r#"
top_level_text_threshold = 128
version_cache_capacity = 3

[storage]
directory = "/tmp/nova-spill"
compression_threshold = 16

[memory]
total_budget_bytes = 4096

[logging]
level = "nova.cache=debug,info"
json = true
"#,
    )
    .unwrap();

    let config = WorkspaceModelConfig::load_from_path(&path).unwrap();
    assert_eq!(config.top_level_text_threshold, 128);
    assert_eq!(config.version_cache_capacity, 3);
    assert_eq!(
        config.storage.directory,
        Some(PathBuf::from("/tmp/nova-spill"))
    );
    assert_eq!(config.storage.compression_threshold, 16);
    assert_eq!(config.memory.budget().total, 4096);
    assert!(config.logging.json);
    assert!(config.logging.stderr);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    match WorkspaceModelConfig::load_from_path(&path).unwrap_err() {
        ConfigError::Io { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parse_errors_carry_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "version_cache_capacity = \"two\"\n").unwrap();

    match WorkspaceModelConfig::load_from_path(&path).unwrap_err() {
        ConfigError::Toml { path: reported, .. } => assert_eq!(reported, Some(path)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn serialized_config_loads_back() {
    let mut config = WorkspaceModelConfig::default();
    config.top_level_text_threshold = 512;
    config.storage.directory = Some(PathBuf::from("spill"));
    config.memory.total_budget_bytes = Some(1 << 20);

    let text = config.to_toml_string().unwrap();
    assert_eq!(WorkspaceModelConfig::load_from_str(&text).unwrap(), config);
}
