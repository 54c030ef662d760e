use control_plane::{
    Effect, Matcher, Policy, PolicyDocument, Secret, SecretPolicyRepository, SecretStatus,
    SqliteSecretRepository, Statement,
};

fn repo() -> SqliteSecretRepository {
    let repo = SqliteSecretRepository::open(":memory:").expect("open");
    repo.ensure_schema().expect("schema");
    repo
}

#[test]
fn sqlite_repository_roundtrip() {
    let repo = repo();
    let mut secret = Secret::active("S1", "key", "tenantA");
    secret.description = Some("ci runner".to_string());
    secret.expires_at = Some(4_102_444_800);
    repo.upsert_secret(&secret).expect("upsert");

    let policy = Policy {
        id: "P1".to_string(),
        owner: "tenantA".to_string(),
        document: PolicyDocument {
            statements: vec![Statement {
                sid: Some("read-docs".to_string()),
                effect: Effect::Allow,
                actions: vec![Matcher::Exact("read".to_string())],
                resources: vec![Matcher::Prefix("docs/".to_string())],
                conditions: Vec::new(),
            }],
        },
    };
    repo.upsert_policy(&policy).expect("upsert");

    let loaded = repo.get_secret("S1").expect("get").expect("secret");
    assert_eq!(loaded, secret);
    assert_eq!(repo.list_policies().expect("list"), vec![policy]);
    assert_eq!(repo.revision().expect("revision"), 2);
}

#[test]
fn sqlite_update_replaces_body() {
    let repo = repo();
    let mut secret = Secret::active("S1", "key", "tenantA");
    repo.upsert_secret(&secret).expect("upsert");
    secret.status = SecretStatus::Disabled;
    repo.upsert_secret(&secret).expect("upsert");

    let secrets = repo.list_secrets().expect("list");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].status, SecretStatus::Disabled);

    let snapshot = repo.load_snapshot().expect("snapshot");
    assert_eq!(snapshot.revision, 2);
}

#[test]
fn sqlite_schema_is_idempotent() {
    let repo = repo();
    repo.upsert_secret(&Secret::active("S1", "key", "tenantA"))
        .expect("upsert");
    repo.ensure_schema().expect("schema");
    assert!(repo.is_seeded().expect("seeded"));
    assert_eq!(repo.delete_secret("missing").expect("delete"), 1);
}
