use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("revocation cache unavailable: {0}")]
    Unavailable(String),
}

/// Shared denylist of secrets, consulted on every authentication.
#[async_trait]
pub trait RevocationCache: Send + Sync {
    async fn is_revoked(&self, secret_id: &str) -> Result<bool, RevocationError>;
    async fn revoke(&self, secret_id: &str, ttl: Duration) -> Result<(), RevocationError>;
    async fn clear(&self, secret_id: &str) -> Result<(), RevocationError>;
}

/// Node-local denylist. A marker whose TTL does not fit in an `Instant`
/// never expires; expired markers are dropped on every write.
#[derive(Clone, Default)]
pub struct InMemoryRevocationCache {
    entries: Arc<Mutex<HashMap<String, Option<Instant>>>>,
}

impl InMemoryRevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, expires_at| is_live(*expires_at, now));
    }

    /// Markers currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| at > now)
}

#[async_trait]
impl RevocationCache for InMemoryRevocationCache {
    async fn is_revoked(&self, secret_id: &str) -> Result<bool, RevocationError> {
        let mut entries = self.entries.lock();
        let Some(expires_at) = entries.get(secret_id).copied() else {
            return Ok(false);
        };
        if is_live(expires_at, Instant::now()) {
            return Ok(true);
        }
        entries.remove(secret_id);
        Ok(false)
    }

    async fn revoke(&self, secret_id: &str, ttl: Duration) -> Result<(), RevocationError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, expires_at| is_live(*expires_at, now));
        entries.insert(secret_id.to_string(), now.checked_add(ttl));
        Ok(())
    }

    async fn clear(&self, secret_id: &str) -> Result<(), RevocationError> {
        self.entries.lock().remove(secret_id);
        Ok(())
    }
}
