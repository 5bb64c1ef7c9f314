use arbor_config::{EngineConfig, EnvLoader, Validate};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_toml_file_keeps_defaults_for_missing_keys() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "engine.toml",
        r#"
[router]
help_keyword = "info"

[deploy]
root = "/srv/bundles"
debounce_ms = 500
"#,
    );

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.router.help_keyword, "info");
    assert_eq!(config.router.max_forwards, 16);
    assert_eq!(config.deploy.root, PathBuf::from("/srv/bundles"));
    assert_eq!(config.deploy.debounce(), Duration::from_millis(500));
    assert_eq!(config.deploy.descriptor, "bundle.toml");
    assert!(config.validate().is_ok());
}

#[test]
fn test_json_and_env_files() {
    let dir = TempDir::new().unwrap();
    let json = write(&dir, "engine.json", r#"{ "log": { "level": "debug" } }"#);
    let config = EngineConfig::from_file(&json).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.format, "json");

    let env = write(
        &dir,
        ".env",
        "ARBOR_DEPLOY_ENABLED=false\nARBOR_ROUTER_MAX_FORWARDS=4\nUNRELATED=1\n",
    );
    let config = EngineConfig::from_file(&env).unwrap();
    assert!(!config.deploy.enabled);
    assert_eq!(config.router.max_forwards, 4);
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "engine.yaml", "router: {}");
    assert!(EngineConfig::from_file(&path).is_err());
}

#[test]
fn test_overrides_apply_after_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "engine.toml", "[router]\nmax_forwards = 8\n");
    let file = EngineConfig::from_file(&path).unwrap();

    let loader = EnvLoader::new("ARBOR_TEST");
    let pairs: BTreeMap<String, String> = loader.collect([
        ("ARBOR_TEST_ROUTER_MAX_FORWARDS", "32"),
        ("ARBOR_TEST_LOG_FORMAT", "pretty"),
    ]);
    let config = file.with_pairs(pairs).unwrap();
    assert_eq!(config.router.max_forwards, 32);
    assert_eq!(config.log.format, "pretty");
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_reports_bad_values() {
    let mut config = EngineConfig::default();
    config.deploy.debounce_ms = 0;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.log.format = "xml".to_string();
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.deploy.library_dir = String::new();
    assert!(config.validate().is_err());
}
