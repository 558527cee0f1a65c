use std::time::Duration;
use std::{env, fs};

use authkeep_client::config::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("authkeep.toml");

    let toml_content = r#"
[http]
request_timeout = "30s"

[store]
path = "/var/lib/authkeep/tokens.json"
cipher = "SymmetricKeyCipher"
key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
retention = "30days"
reap_lock_timeout = "2s"

[client]
expiry_buffer_secs = 30

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.http.request_timeout, Duration::from_secs(30));
    assert_eq!(
        cfg.store.path.as_deref(),
        Some(std::path::Path::new("/var/lib/authkeep/tokens.json"))
    );
    assert_eq!(cfg.store.cipher.as_deref(), Some("SymmetricKeyCipher"));
    assert_eq!(cfg.store.retention, Duration::from_secs(30 * 86_400));
    assert_eq!(cfg.store.reap_lock_timeout, Duration::from_secs(2));
    assert_eq!(cfg.client.expiry_buffer_secs, 30);
    assert_eq!(cfg.logging.level, "debug");
    assert!(!format!("{:?}", cfg.store).contains("0d0e0f"));

    // 2) Env override should win over file
    unsafe {
        env::set_var("AUTHKEEP__CLIENT__EXPIRY_BUFFER_SECS", "45");
    }
    let cfg_env = load_config(Some(&path)).expect("should parse config with env overrides");
    assert_eq!(cfg_env.client.expiry_buffer_secs, 45);
    unsafe {
        env::remove_var("AUTHKEEP__CLIENT__EXPIRY_BUFFER_SECS");
    }

    // 3) A cipher without a key is rejected
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[store]
cipher = "SymmetricKeyCipher"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(Some(&invalid_path)).expect_err("expected validation error");
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("store.key is required"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let cfg = load_config(Some(&dir.path().join("absent.toml"))).expect("defaults");
    assert!(cfg.store.path.is_none());
    assert!(cfg.store.cipher.is_none());
    assert_eq!(cfg.http.request_timeout, Duration::from_secs(10));
}
