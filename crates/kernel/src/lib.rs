mod auth;
mod lifecycle;
mod refresher;
mod token;

pub use auth::{AuthConfig, Authenticator};
pub use lifecycle::{InFlight, RequestGate, ShutdownManager};
pub use refresher::{CacheRefresher, RefresherConfig};
pub use token::{extract_bearer, TokenClaims};

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use control_plane::{
    unix_now, AuditEvent, AuditSink, AuthzRequest, Decision, EvaluationError, LocalCache,
    PolicyEngine, RequestContext, RevocationCache, RevocationError, SystemConfig,
};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AuthFailure {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed bearer token")]
    MalformedToken,
    #[error("unknown secret")]
    UnknownSecret,
    #[error("secret disabled")]
    SecretDisabled,
    #[error("secret expired")]
    SecretExpired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    TokenExpired,
    #[error("secret revoked")]
    Revoked,
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthFailure),
    #[error("local cache not primed")]
    CacheNotPrimed,
    #[error("revocation cache unavailable: {0}")]
    RevocationCacheUnavailable(String),
    #[error("shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RevocationError> for AuthzError {
    fn from(err: RevocationError) -> Self {
        AuthzError::RevocationCacheUnavailable(err.to_string())
    }
}

/// Caller identity established by [`Kernel::authenticate`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub secret_id: String,
    pub owner: String,
    pub subject: Option<String>,
    /// Token `exp`, unix seconds.
    pub expires_at: i64,
}

#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub auth: AuthConfig,
    pub revocation_ttl: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            revocation_ttl: Duration::from_secs(86_400),
        }
    }
}

impl KernelConfig {
    pub fn from_system_config(config: &SystemConfig) -> Self {
        Self {
            auth: AuthConfig {
                audience: config.get_string("auth.audience"),
                memo_ttl: config.get_millis("auth.memo_ttl_ms"),
                revocation_timeout: config.get_millis("cache.timeout_ms"),
                fail_open: config.get_bool("cache.fail_open"),
            },
            revocation_ttl: config.get_seconds("cache.revocation_ttl_seconds"),
        }
    }
}

impl RefresherConfig {
    pub fn from_system_config(config: &SystemConfig) -> Self {
        Self {
            interval: config.get_millis("replication.interval_ms"),
            timeout: config.get_millis("replication.timeout_ms"),
            alert_after_failures: config.get_number("replication.alert_after_failures").max(1) as u32,
        }
    }
}

/// Request path of the authorization node: authenticate the caller, then
/// evaluate the owner's policies against the installed snapshot.
pub struct Kernel {
    config: KernelConfig,
    cache: Arc<LocalCache>,
    engine: PolicyEngine,
    authenticator: Authenticator,
    revocations: Arc<dyn RevocationCache>,
    audit: Arc<dyn AuditSink>,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        cache: Arc<LocalCache>,
        revocations: Arc<dyn RevocationCache>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let authenticator = Authenticator::new(cache.clone(), revocations.clone(), config.auth.clone());
        Self {
            config,
            cache,
            engine: PolicyEngine::new(),
            authenticator,
            revocations,
            audit,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.cache.is_primed()
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthzError> {
        self.authenticator.authenticate(authorization).await
    }

    pub fn authorize(
        &self,
        identity: &Identity,
        resource: &str,
        action: &str,
        context: RequestContext,
    ) -> Result<Decision, AuthzError> {
        let snapshot = self.cache.current_snapshot().ok_or(AuthzError::CacheNotPrimed)?;
        let request = AuthzRequest {
            secret_id: identity.secret_id.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
            context,
        };
        let request_id = Uuid::new_v4().to_string();

        let engine = &self.engine;
        let decision = evaluate_or_deny(&request_id, &identity.secret_id, snapshot.version(), || {
            engine.evaluate(&snapshot, &request)
        })?;

        debug!(
            %request_id,
            secret_id = %identity.secret_id,
            resource = %request.resource,
            action = %request.action,
            allowed = decision.allowed,
            reason = %decision.reason,
            "authorization decision"
        );
        self.audit.record(AuditEvent {
            request_id,
            timestamp: unix_now(),
            secret_id: identity.secret_id.clone(),
            owner: identity.owner.clone(),
            subject: identity.subject.clone(),
            resource: request.resource,
            action: request.action,
            allowed: decision.allowed,
            reason: decision.reason.clone(),
        });
        Ok(decision)
    }

    /// Marks `secret_id` revoked in the shared cache so every node rejects it
    /// before replication catches up.
    pub async fn revoke_secret(&self, secret_id: &str) -> Result<(), AuthzError> {
        self.revocations
            .revoke(secret_id, self.config.revocation_ttl)
            .await?;
        info!(%secret_id, ttl = ?self.config.revocation_ttl, "secret revoked");
        Ok(())
    }
}

/// Runs one policy evaluation. A panic inside the engine becomes a deny
/// rather than unwinding into the caller.
fn evaluate_or_deny<F>(
    request_id: &str,
    secret_id: &str,
    version: u64,
    evaluate: F,
) -> Result<Decision, AuthzError>
where
    F: FnOnce() -> Result<Decision, EvaluationError>,
{
    match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
        Ok(Ok(decision)) => Ok(decision),
        Ok(Err(EvaluationError::UnknownSecret(_))) => Err(AuthFailure::UnknownSecret.into()),
        Err(_) => {
            error!(%request_id, %secret_id, version, "policy evaluation panicked, denying");
            Ok(Decision::deny("evaluation failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicking_evaluation_is_denied() {
        let decision = evaluate_or_deny("req-1", "S1", 3, || panic!("matcher blew up"))
            .expect("decision");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "evaluation failed");
        assert!(decision.policy_id.is_none());
    }

    #[test]
    fn unknown_secret_during_evaluation_fails_authentication() {
        let err = evaluate_or_deny("req-2", "S9", 3, || {
            Err(EvaluationError::UnknownSecret("S9".to_string()))
        })
        .expect_err("error");
        assert!(matches!(
            err,
            AuthzError::AuthenticationFailed(AuthFailure::UnknownSecret)
        ));
    }

    #[test]
    fn successful_evaluation_passes_through() {
        let decision = evaluate_or_deny("req-3", "S1", 3, || Ok(Decision::deny("no policy")))
            .expect("decision");
        assert_eq!(decision.reason, "no policy");
    }
}
