use std::time::Duration;

use control_plane::{ConfigError, SystemConfigLoader};

#[test]
fn config_loader_accepts_valid_keys() {
    let input = r#"
[server]
listen = "0.0.0.0:9000"
[storage]
sqlite_path = "authz.sqlite"
[replication]
interval_ms = 250
[cache]
fail_open = true
"#;
    let config = SystemConfigLoader::from_str(input).expect("config");
    assert_eq!(config.get_string("server.listen"), "0.0.0.0:9000");
    assert_eq!(config.get_string("storage.sqlite_path"), "authz.sqlite");
    assert_eq!(config.get_millis("replication.interval_ms"), Duration::from_millis(250));
    assert!(config.get_bool("cache.fail_open"));
}

#[test]
fn config_falls_back_to_defaults() {
    let config = SystemConfigLoader::from_str("").expect("config");
    assert_eq!(config.get_string("auth.audience"), "iam.authz");
    assert_eq!(config.get_number("replication.alert_after_failures"), 3);
    assert_eq!(config.get_seconds("cache.revocation_ttl_seconds"), Duration::from_secs(86400));
    assert!(!config.get_bool("cache.fail_open"));
    assert!(config.get_bool("audit.enabled"));
    assert!(config.get_optional_string("replication.endpoint").is_none());
    assert!(config.keys().is_empty());
}

#[test]
fn config_loader_rejects_unknown_key() {
    let input = r#"
unknown = { value = "x" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::UnknownKey(key) => assert_eq!(key, "unknown.value"),
        _ => panic!("expected unknown key error"),
    }
}

#[test]
fn config_loader_rejects_type_mismatch() {
    let input = r#"
replication = { interval_ms = "fast" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::TypeMismatch(key, _) => assert_eq!(key, "replication.interval_ms"),
        _ => panic!("expected type mismatch"),
    }
}

#[test]
fn config_loader_rejects_floats() {
    let err = SystemConfigLoader::from_str("shutdown = { grace_ms = 1.5 }").expect_err("error");
    assert!(matches!(err, ConfigError::TypeMismatch(_, _)));
}

#[test]
fn default_template_parses_back() {
    let template = SystemConfigLoader::default_template();
    assert!(template.contains("[replication]"));
    let config = SystemConfigLoader::from_str(&template).expect("template");
    assert_eq!(config.get_number("shutdown.grace_ms"), 5000);
    assert_eq!(config.get_string("storage.sqlite_path"), "iam.sqlite");
}
