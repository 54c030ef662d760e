use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use control_plane::{
    unix_now, CacheSnapshot, Condition, Effect, InMemoryAuditSink, InMemoryRevocationCache,
    LocalCache, Matcher, Policy, PolicyDocument, RequestContext, RevocationCache,
    RevocationError, Secret, SecretStatus, Statement,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use kernel::{AuthConfig, AuthFailure, AuthzError, Kernel, KernelConfig};
use serde_json::{json, Value};

const KEY: &str = "s1-signing-key";

fn token_for(kid: &str, key: &str, claims: Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    let token = encode(&header, &claims, &EncodingKey::from_secret(key.as_bytes())).expect("token");
    format!("Bearer {token}")
}

fn valid_token() -> String {
    token_for(
        "S1",
        KEY,
        json!({"sub": "svc-a", "aud": "iam.authz", "exp": unix_now() + 3600}),
    )
}

fn p1() -> Policy {
    Policy {
        id: "P1".to_string(),
        owner: "tenantA".to_string(),
        document: PolicyDocument {
            statements: vec![Statement {
                sid: None,
                effect: Effect::Allow,
                actions: vec![Matcher::Exact("read".to_string())],
                resources: vec![Matcher::Exact("doc1".to_string())],
                conditions: Vec::new(),
            }],
        },
    }
}

fn p2() -> Policy {
    Policy {
        id: "P2".to_string(),
        owner: "tenantA".to_string(),
        document: PolicyDocument {
            statements: vec![Statement {
                sid: Some("untrusted".to_string()),
                effect: Effect::Deny,
                actions: vec![Matcher::Exact("read".to_string())],
                resources: vec![Matcher::Exact("doc1".to_string())],
                conditions: vec![Condition::NotEquals {
                    key: "ip".to_string(),
                    value: "trusted".to_string(),
                }],
            }],
        },
    }
}

struct Fixture {
    cache: Arc<LocalCache>,
    revocations: Arc<InMemoryRevocationCache>,
    audit: Arc<InMemoryAuditSink>,
    kernel: Kernel,
}

fn fixture_with(config: KernelConfig, secrets: Vec<Secret>, policies: Vec<Policy>) -> Fixture {
    let cache = LocalCache::shared();
    cache.install(CacheSnapshot::new(1, secrets, policies));
    let revocations = InMemoryRevocationCache::shared();
    let audit = InMemoryAuditSink::shared();
    let kernel = Kernel::new(config, cache.clone(), revocations.clone(), audit.clone());
    Fixture {
        cache,
        revocations,
        audit,
        kernel,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        KernelConfig::default(),
        vec![Secret::active("S1", KEY, "tenantA")],
        vec![p1()],
    )
}

fn context(pairs: &[(&str, Value)]) -> RequestContext {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn auth_failure(result: Result<kernel::Identity, AuthzError>) -> AuthFailure {
    match result {
        Err(AuthzError::AuthenticationFailed(failure)) => failure,
        other => panic!("expected authentication failure, got {other:?}"),
    }
}

#[tokio::test]
async fn valid_token_reads_allowed_document() {
    let fx = fixture();
    let identity = fx
        .kernel
        .authenticate(Some(&valid_token()))
        .await
        .expect("identity");
    assert_eq!(identity.owner, "tenantA");
    assert_eq!(identity.subject.as_deref(), Some("svc-a"));

    let decision = fx
        .kernel
        .authorize(&identity, "doc1", "read", RequestContext::new())
        .expect("decision");
    assert!(decision.allowed);

    let decision = fx
        .kernel
        .authorize(&identity, "doc1", "write", RequestContext::new())
        .expect("decision");
    assert!(!decision.allowed);

    let events = fx.audit.list();
    assert_eq!(events.len(), 2);
    assert!(events[0].allowed);
    assert_eq!(events[0].subject.as_deref(), Some("svc-a"));
    assert_eq!(events[1].action, "write");
}

#[tokio::test]
async fn audit_log_keeps_only_recent_decisions() {
    let cache = LocalCache::shared();
    cache.install(CacheSnapshot::new(
        1,
        vec![Secret::active("S1", KEY, "tenantA")],
        vec![p1()],
    ));
    let audit = Arc::new(InMemoryAuditSink::with_capacity(16));
    let kernel = Kernel::new(
        KernelConfig::default(),
        cache,
        InMemoryRevocationCache::shared(),
        audit.clone(),
    );
    let identity = kernel
        .authenticate(Some(&valid_token()))
        .await
        .expect("identity");
    for i in 0..5_000 {
        kernel
            .authorize(&identity, &format!("doc{i}"), "read", RequestContext::new())
            .expect("decision");
    }
    let events = audit.list();
    assert_eq!(events.len(), 16);
    assert_eq!(events[15].resource, "doc4999");
    assert_eq!(events[0].resource, "doc4984");
}

#[tokio::test]
async fn explicit_deny_overrides_allow() {
    let fx = fixture_with(
        KernelConfig::default(),
        vec![Secret::active("S1", KEY, "tenantA")],
        vec![p1(), p2()],
    );
    let identity = fx
        .kernel
        .authenticate(Some(&valid_token()))
        .await
        .expect("identity");

    let denied = fx
        .kernel
        .authorize(&identity, "doc1", "read", context(&[("ip", json!("untrusted"))]))
        .expect("decision");
    assert!(!denied.allowed);
    assert_eq!(denied.policy_id.as_deref(), Some("P2"));

    let allowed = fx
        .kernel
        .authorize(&identity, "doc1", "read", context(&[("ip", json!("trusted"))]))
        .expect("decision");
    assert!(allowed.allowed);
}

#[tokio::test]
async fn unprimed_cache_refuses_everything() {
    let cache = LocalCache::shared();
    let kernel = Kernel::new(
        KernelConfig::default(),
        cache,
        InMemoryRevocationCache::shared(),
        InMemoryAuditSink::shared(),
    );
    assert!(!kernel.is_primed());
    assert!(matches!(
        kernel.authenticate(Some(&valid_token())).await,
        Err(AuthzError::CacheNotPrimed)
    ));
    let identity = kernel::Identity {
        secret_id: "S1".to_string(),
        owner: "tenantA".to_string(),
        subject: None,
        expires_at: unix_now() + 60,
    };
    assert!(matches!(
        kernel.authorize(&identity, "doc1", "read", RequestContext::new()),
        Err(AuthzError::CacheNotPrimed)
    ));
}

#[tokio::test]
async fn token_problems_are_authentication_failures() {
    let fx = fixture();
    assert_eq!(auth_failure(fx.kernel.authenticate(None).await), AuthFailure::MissingToken);
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some("Bearer garbage")).await),
        AuthFailure::MalformedToken
    );

    let wrong_key = token_for(
        "S1",
        "other-key",
        json!({"aud": "iam.authz", "exp": unix_now() + 3600}),
    );
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&wrong_key)).await),
        AuthFailure::InvalidSignature
    );

    let unknown = token_for(
        "S9",
        KEY,
        json!({"aud": "iam.authz", "exp": unix_now() + 3600}),
    );
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&unknown)).await),
        AuthFailure::UnknownSecret
    );

    let expired = token_for(
        "S1",
        KEY,
        json!({"aud": "iam.authz", "exp": unix_now() - 3600}),
    );
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&expired)).await),
        AuthFailure::TokenExpired
    );

    let wrong_audience = token_for(
        "S1",
        KEY,
        json!({"aud": "someone-else", "exp": unix_now() + 3600}),
    );
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&wrong_audience)).await),
        AuthFailure::MalformedToken
    );
}

#[tokio::test]
async fn kid_claim_is_used_when_header_has_none() {
    let fx = fixture();
    let claims = json!({"kid": "S1", "aud": "iam.authz", "exp": unix_now() + 3600});
    let token = encode(
        &Header::new(Algorithm::HS384),
        &claims,
        &EncodingKey::from_secret(KEY.as_bytes()),
    )
    .expect("token");
    let identity = fx
        .kernel
        .authenticate(Some(&format!("Bearer {token}")))
        .await
        .expect("identity");
    assert_eq!(identity.secret_id, "S1");
}

#[tokio::test]
async fn disabled_or_expired_secret_rejected_despite_valid_signature() {
    let mut disabled = Secret::active("S1", KEY, "tenantA");
    disabled.status = SecretStatus::Disabled;
    let fx = fixture_with(KernelConfig::default(), vec![disabled], vec![p1()]);
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&valid_token())).await),
        AuthFailure::SecretDisabled
    );

    let mut expired = Secret::active("S1", KEY, "tenantA");
    expired.expires_at = Some(unix_now() - 1);
    let fx = fixture_with(KernelConfig::default(), vec![expired], vec![p1()]);
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&valid_token())).await),
        AuthFailure::SecretExpired
    );
}

#[tokio::test]
async fn revocation_rejects_even_with_stale_cache() {
    let fx = fixture();
    let token = valid_token();
    fx.kernel
        .authenticate(Some(&token))
        .await
        .expect("identity");

    // another node disabled S1 and wrote the marker; this node's snapshot
    // still says active and the token is memoized
    fx.revocations
        .revoke("S1", Duration::from_secs(60))
        .await
        .expect("revoke");
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&token)).await),
        AuthFailure::Revoked
    );
}

#[tokio::test]
async fn revoke_secret_writes_shared_marker() {
    let fx = fixture();
    fx.kernel.revoke_secret("S1").await.expect("revoke");
    assert!(fx.revocations.is_revoked("S1").await.expect("check"));
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&valid_token())).await),
        AuthFailure::Revoked
    );
}

#[tokio::test]
async fn revocation_ttl_beyond_clock_range_never_expires() {
    let config = KernelConfig {
        revocation_ttl: Duration::from_secs(i64::MAX as u64),
        ..KernelConfig::default()
    };
    let fx = fixture_with(config, vec![Secret::active("S1", KEY, "tenantA")], vec![p1()]);
    fx.kernel.revoke_secret("S1").await.expect("revoke");
    fx.revocations.evict_expired();
    assert!(fx.revocations.is_revoked("S1").await.expect("check"));
}

#[tokio::test]
async fn huge_memo_ttl_still_authenticates() {
    let config = KernelConfig {
        auth: AuthConfig {
            memo_ttl: Duration::from_secs(u64::MAX),
            ..AuthConfig::default()
        },
        ..KernelConfig::default()
    };
    let fx = fixture_with(config, vec![Secret::active("S1", KEY, "tenantA")], vec![p1()]);
    let far_future = token_for(
        "S1",
        KEY,
        json!({"aud": "iam.authz", "exp": i64::MAX}),
    );
    for _ in 0..2 {
        let identity = fx
            .kernel
            .authenticate(Some(&far_future))
            .await
            .expect("identity");
        assert_eq!(identity.secret_id, "S1");
    }
}

#[tokio::test]
async fn memoized_token_rechecks_new_snapshot() {
    let fx = fixture();
    let token = valid_token();
    fx.kernel
        .authenticate(Some(&token))
        .await
        .expect("identity");

    let mut disabled = Secret::active("S1", KEY, "tenantA");
    disabled.status = SecretStatus::Disabled;
    fx.cache
        .install(CacheSnapshot::new(2, vec![disabled], vec![p1()]));
    assert_eq!(
        auth_failure(fx.kernel.authenticate(Some(&token)).await),
        AuthFailure::SecretDisabled
    );
}

struct BrokenRevocations;

#[async_trait]
impl RevocationCache for BrokenRevocations {
    async fn is_revoked(&self, _secret_id: &str) -> Result<bool, RevocationError> {
        Err(RevocationError::Unavailable("connection refused".to_string()))
    }

    async fn revoke(&self, _secret_id: &str, _ttl: Duration) -> Result<(), RevocationError> {
        Err(RevocationError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self, _secret_id: &str) -> Result<(), RevocationError> {
        Ok(())
    }
}

struct HangingRevocations;

#[async_trait]
impl RevocationCache for HangingRevocations {
    async fn is_revoked(&self, _secret_id: &str) -> Result<bool, RevocationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(false)
    }

    async fn revoke(&self, _secret_id: &str, _ttl: Duration) -> Result<(), RevocationError> {
        Ok(())
    }

    async fn clear(&self, _secret_id: &str) -> Result<(), RevocationError> {
        Ok(())
    }
}

fn kernel_with_revocations(
    revocations: Arc<dyn RevocationCache>,
    fail_open: bool,
) -> Kernel {
    let cache = LocalCache::shared();
    cache.install(CacheSnapshot::new(
        1,
        vec![Secret::active("S1", KEY, "tenantA")],
        vec![p1()],
    ));
    let config = KernelConfig {
        auth: AuthConfig {
            revocation_timeout: Duration::from_millis(50),
            fail_open,
            ..AuthConfig::default()
        },
        ..KernelConfig::default()
    };
    Kernel::new(config, cache, revocations, InMemoryAuditSink::shared())
}

#[tokio::test]
async fn unavailable_revocation_cache_fails_closed() {
    let kernel = kernel_with_revocations(Arc::new(BrokenRevocations), false);
    assert!(matches!(
        kernel.authenticate(Some(&valid_token())).await,
        Err(AuthzError::RevocationCacheUnavailable(_))
    ));
    assert!(matches!(
        kernel.revoke_secret("S1").await,
        Err(AuthzError::RevocationCacheUnavailable(_))
    ));

    let kernel = kernel_with_revocations(Arc::new(HangingRevocations), false);
    assert!(matches!(
        kernel.authenticate(Some(&valid_token())).await,
        Err(AuthzError::RevocationCacheUnavailable(_))
    ));
}

#[tokio::test]
async fn fail_open_admits_when_revocation_cache_is_down() {
    let kernel = kernel_with_revocations(Arc::new(BrokenRevocations), true);
    let identity = kernel
        .authenticate(Some(&valid_token()))
        .await
        .expect("identity");
    assert_eq!(identity.secret_id, "S1");
}
