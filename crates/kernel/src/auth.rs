use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use control_plane::{unix_now, CacheSnapshot, LocalCache, RevocationCache, Secret, SecretStatus};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::token;
use crate::{AuthFailure, AuthzError, Identity};

const MEMO_CAPACITY: usize = 10_000;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub audience: String,
    pub memo_ttl: Duration,
    pub revocation_timeout: Duration,
    pub fail_open: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            audience: "iam.authz".to_string(),
            memo_ttl: Duration::from_secs(2),
            revocation_timeout: Duration::from_millis(200),
            fail_open: false,
        }
    }
}

struct MemoEntry {
    identity: Identity,
    expires_at: Instant,
}

/// Positive validation results for the snapshot version they were computed
/// against.
#[derive(Default)]
struct ValidationMemo {
    version: u64,
    entries: HashMap<String, MemoEntry>,
}

impl ValidationMemo {
    fn get(&mut self, key: &str, version: u64) -> Option<Identity> {
        if self.version != version {
            self.version = version;
            self.entries.clear();
            return None;
        }
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            self.entries.remove(key);
            return None;
        }
        Some(entry.identity.clone())
    }

    fn put(&mut self, key: String, identity: Identity, version: u64, ttl: Duration) {
        if self.version != version {
            self.version = version;
            self.entries.clear();
        }
        let now = Instant::now();
        // a TTL past the clock's range is not worth memoizing
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };
        if self.entries.len() >= MEMO_CAPACITY {
            self.entries.retain(|_, entry| entry.expires_at > now);
            if self.entries.len() >= MEMO_CAPACITY {
                self.entries.clear();
            }
        }
        self.entries.insert(key, MemoEntry { identity, expires_at });
    }
}

/// Bearer-token authentication against the local cache and the shared
/// revocation cache.
///
/// A request moves through token extraction, secret resolution, signature
/// verification and the revocation check; the first failing step rejects
/// it. Signature verification is skipped for tokens seen recently under the
/// same snapshot version, but the secret's status and the revocation cache
/// are checked every time.
pub struct Authenticator {
    cache: Arc<LocalCache>,
    revocations: Arc<dyn RevocationCache>,
    config: AuthConfig,
    memo: Mutex<ValidationMemo>,
}

impl Authenticator {
    pub fn new(
        cache: Arc<LocalCache>,
        revocations: Arc<dyn RevocationCache>,
        config: AuthConfig,
    ) -> Self {
        Self {
            cache,
            revocations,
            config,
            memo: Mutex::new(ValidationMemo::default()),
        }
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthzError> {
        let snapshot = self.cache.current_snapshot().ok_or(AuthzError::CacheNotPrimed)?;
        let raw = token::extract_bearer(authorization)?;
        let memo_key = hex::encode(Sha256::digest(raw.as_bytes()));

        let memoized = self.memo.lock().get(&memo_key, snapshot.version());
        let identity = match memoized {
            Some(identity) => {
                usable_secret(&snapshot, &identity.secret_id)?;
                identity
            }
            None => {
                let identity = self.verify(&snapshot, raw)?;
                self.remember(memo_key, &identity, snapshot.version());
                identity
            }
        };

        self.check_revocation(&identity.secret_id).await?;
        debug!(secret_id = %identity.secret_id, owner = %identity.owner, "authenticated");
        Ok(identity)
    }

    fn verify(&self, snapshot: &CacheSnapshot, raw: &str) -> Result<Identity, AuthFailure> {
        let unverified = token::inspect(raw)?;
        let secret = usable_secret(snapshot, &unverified.secret_id)?;
        let claims = token::verify(&unverified, secret.signing_key_bytes(), &self.config.audience)?;
        Ok(Identity {
            secret_id: secret.id.clone(),
            owner: secret.owner.clone(),
            subject: claims.sub,
            expires_at: claims.exp,
        })
    }

    fn remember(&self, key: String, identity: &Identity, version: u64) {
        let remaining = identity.expires_at.saturating_sub(unix_now());
        if remaining <= 0 || self.config.memo_ttl.is_zero() {
            return;
        }
        let ttl = self
            .config
            .memo_ttl
            .min(Duration::from_secs(remaining as u64));
        self.memo.lock().put(key, identity.clone(), version, ttl);
    }

    async fn check_revocation(&self, secret_id: &str) -> Result<(), AuthzError> {
        let lookup = self.revocations.is_revoked(secret_id);
        match tokio::time::timeout(self.config.revocation_timeout, lookup).await {
            Ok(Ok(false)) => Ok(()),
            Ok(Ok(true)) => {
                debug!(%secret_id, "secret revoked");
                Err(AuthFailure::Revoked.into())
            }
            Ok(Err(err)) => self.revocation_unavailable(secret_id, err.to_string()),
            Err(_) => self.revocation_unavailable(secret_id, "lookup timed out".to_string()),
        }
    }

    fn revocation_unavailable(&self, secret_id: &str, reason: String) -> Result<(), AuthzError> {
        if self.config.fail_open {
            warn!(%secret_id, %reason, "revocation cache unavailable, failing open");
            return Ok(());
        }
        warn!(%secret_id, %reason, "revocation cache unavailable, rejecting");
        Err(AuthzError::RevocationCacheUnavailable(reason))
    }
}

fn usable_secret<'a>(snapshot: &'a CacheSnapshot, secret_id: &str) -> Result<&'a Secret, AuthFailure> {
    let secret = snapshot.secret(secret_id).ok_or(AuthFailure::UnknownSecret)?;
    if secret.status == SecretStatus::Disabled {
        return Err(AuthFailure::SecretDisabled);
    }
    if secret.is_expired(unix_now()) {
        return Err(AuthFailure::SecretExpired);
    }
    Ok(secret)
}
