use std::sync::Arc;

use control_plane::{
    load_from_system_config, ControlPlaneBundle, InMemorySecretRepository, ReplicationSource,
    Secret, SystemConfigLoader,
};

#[tokio::test]
async fn local_sqlite_source_when_no_endpoint() {
    let config = SystemConfigLoader::from_str(
        r#"
[storage]
sqlite_path = ":memory:"
"#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    assert!(bundle.local_source.is_some());
    assert!(bundle.audit_worker.is_none());
    assert!(!bundle.cache.is_primed());

    let secrets = bundle.source.list_secrets().await.expect("secrets");
    assert_eq!(secrets.version, 0);
    assert!(secrets.items.is_empty());
}

#[tokio::test]
async fn remote_endpoint_has_no_local_source() {
    let config = SystemConfigLoader::from_str(
        r#"
[replication]
endpoint = "http://127.0.0.1:1"
timeout_ms = 100
"#,
    )
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    assert!(bundle.local_source.is_none());
    assert!(bundle.source.list_secrets().await.is_err());
}

#[tokio::test]
async fn in_memory_bundle_replicates_writes() {
    let repo = InMemorySecretRepository::shared();
    let bundle = ControlPlaneBundle::in_memory(repo);
    let local = bundle.local_source.clone().expect("local source");
    local
        .upsert_secret(&Secret::active("S1", "key", "tenantA"))
        .expect("upsert");

    let source: Arc<dyn ReplicationSource> = bundle.source.clone();
    bundle.cache.refresh(source.as_ref()).await.expect("refresh");
    assert_eq!(bundle.cache.version(), Some(1));
    assert!(bundle.cache.lookup_secret("S1").is_some());
}

#[tokio::test]
async fn seed_file_populates_empty_repository() {
    let dir = std::env::temp_dir().join(format!("authz-seed-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("dir");
    let seed_path = dir.join("seed.json");
    let seed = serde_json::json!({
        "revision": 0,
        "secrets": [{"id": "S1", "signing_key": "key", "owner": "tenantA", "status": "active"}],
        "policies": []
    });
    std::fs::write(&seed_path, seed.to_string()).expect("write seed");

    let config = SystemConfigLoader::from_str(&format!(
        "[storage]\nsqlite_path = \":memory:\"\nseed_path = \"{}\"\n",
        seed_path.display()
    ))
    .expect("config");
    let bundle = load_from_system_config(&config).expect("bundle");
    let secrets = bundle.source.list_secrets().await.expect("secrets");
    assert_eq!(secrets.version, 1);
    assert_eq!(secrets.items[0].id, "S1");

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
