use control_plane::{
    seed_if_empty, Effect, InMemorySecretRepository, Matcher, Policy, PolicyDocument,
    RepositorySnapshot, Secret, SecretPolicyRepository, Statement,
};

fn sample_policy(id: &str, owner: &str) -> Policy {
    Policy {
        id: id.to_string(),
        owner: owner.to_string(),
        document: PolicyDocument {
            statements: vec![Statement {
                sid: None,
                effect: Effect::Allow,
                actions: vec![Matcher::Any],
                resources: vec![Matcher::Any],
                conditions: Vec::new(),
            }],
        },
    }
}

#[test]
fn writes_bump_revision() {
    let repo = InMemorySecretRepository::new();
    assert_eq!(repo.revision().expect("revision"), 0);
    assert!(!repo.is_seeded().expect("seeded"));

    let rev = repo
        .upsert_secret(&Secret::active("S1", "key", "tenantA"))
        .expect("upsert");
    assert_eq!(rev, 1);
    let rev = repo.upsert_policy(&sample_policy("P1", "tenantA")).expect("upsert");
    assert_eq!(rev, 2);

    let snapshot = repo.load_snapshot().expect("snapshot");
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.secrets.len(), 1);
    assert_eq!(snapshot.policies.len(), 1);
}

#[test]
fn deleting_missing_rows_keeps_revision() {
    let repo = InMemorySecretRepository::new();
    repo.upsert_secret(&Secret::active("S1", "key", "tenantA"))
        .expect("upsert");
    assert_eq!(repo.delete_secret("nope").expect("delete"), 1);
    assert_eq!(repo.delete_policy("nope").expect("delete"), 1);
    assert_eq!(repo.delete_secret("S1").expect("delete"), 2);
    assert!(repo.get_secret("S1").expect("get").is_none());
}

#[test]
fn seed_runs_once() {
    let repo = InMemorySecretRepository::new();
    let seed = RepositorySnapshot {
        revision: 0,
        secrets: vec![Secret::active("S1", "key", "tenantA")],
        policies: vec![sample_policy("P1", "tenantA")],
    };
    assert!(seed_if_empty(&repo, &seed).expect("seed"));
    assert!(!seed_if_empty(&repo, &seed).expect("seed"));
    assert_eq!(repo.list_secrets().expect("list").len(), 1);
    assert_eq!(repo.revision().expect("revision"), 2);
}
