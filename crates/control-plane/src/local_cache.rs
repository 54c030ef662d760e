//! Node-local mirror of the replicated secrets and policies.
//!
//! The cache holds at most one immutable [`CacheSnapshot`] behind an `Arc`.
//! Refreshes build a complete new snapshot and swap the pointer, so a reader
//! that cloned the `Arc` keeps one consistent view for its whole request.
//! `None` means the node has never been primed, which is distinct from a
//! primed snapshot that happens to be empty.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::model::{Policy, Secret};
use crate::replication::{ReplicationError, ReplicationSource};

const CONVERGE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
    version: u64,
    secrets_by_id: HashMap<String, Secret>,
    policies_by_owner: HashMap<String, Vec<Policy>>,
}

impl CacheSnapshot {
    pub fn new(version: u64, secrets: Vec<Secret>, policies: Vec<Policy>) -> Self {
        let secrets_by_id = secrets
            .into_iter()
            .map(|secret| (secret.id.clone(), secret))
            .collect();
        let mut policies_by_owner: HashMap<String, Vec<Policy>> = HashMap::new();
        for policy in policies {
            policies_by_owner
                .entry(policy.owner.clone())
                .or_default()
                .push(policy);
        }
        Self {
            version,
            secrets_by_id,
            policies_by_owner,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn secret(&self, id: &str) -> Option<&Secret> {
        self.secrets_by_id.get(id)
    }

    pub fn policies_for(&self, owner: &str) -> &[Policy] {
        self.policies_by_owner
            .get(owner)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn secret_count(&self) -> usize {
        self.secrets_by_id.len()
    }

    pub fn policy_count(&self) -> usize {
        self.policies_by_owner.values().map(Vec::len).sum()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshOutcome {
    Installed { version: u64 },
    Unchanged { version: u64 },
}

#[derive(Default)]
pub struct LocalCache {
    current: RwLock<Option<Arc<CacheSnapshot>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn current_snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.current.read().clone()
    }

    pub fn is_primed(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn version(&self) -> Option<u64> {
        self.current.read().as_ref().map(|snapshot| snapshot.version)
    }

    pub fn lookup_secret(&self, id: &str) -> Option<Secret> {
        self.current_snapshot()?.secret(id).cloned()
    }

    pub fn lookup_policies(&self, owner: &str) -> Vec<Policy> {
        self.current_snapshot()
            .map(|snapshot| snapshot.policies_for(owner).to_vec())
            .unwrap_or_default()
    }

    /// Installs `snapshot` if it is newer than the current one. Returns
    /// whether the swap happened.
    pub fn install(&self, snapshot: CacheSnapshot) -> bool {
        let mut current = self.current.write();
        if let Some(existing) = current.as_ref() {
            if snapshot.version <= existing.version {
                return false;
            }
        }
        *current = Some(Arc::new(snapshot));
        true
    }

    /// Pulls both sets from `source` and installs them as one snapshot.
    ///
    /// The two list calls are separate round trips, so a write on the
    /// primary between them yields different versions. The pair is re-read
    /// until both sides agree, which keeps secrets and policies from
    /// different versions out of the same snapshot.
    pub async fn refresh(
        &self,
        source: &dyn ReplicationSource,
    ) -> Result<RefreshOutcome, ReplicationError> {
        let mut secrets = source.list_secrets().await?;
        let mut policies = source.list_policies().await?;
        let mut attempts = 1;
        while secrets.version != policies.version {
            if attempts >= CONVERGE_ATTEMPTS {
                return Err(ReplicationError::Inconsistent {
                    secrets: secrets.version,
                    policies: policies.version,
                });
            }
            attempts += 1;
            debug!(
                secrets = secrets.version,
                policies = policies.version,
                "replication versions diverged, re-reading"
            );
            if secrets.version < policies.version {
                secrets = source.list_secrets().await?;
            } else {
                policies = source.list_policies().await?;
            }
        }

        let version = secrets.version;
        if let Some(current) = self.version() {
            if version <= current {
                return Ok(RefreshOutcome::Unchanged { version: current });
            }
        }

        let snapshot = CacheSnapshot::new(version, secrets.items, policies.items);
        let secret_count = snapshot.secret_count();
        let policy_count = snapshot.policy_count();
        if self.install(snapshot) {
            info!(version, secret_count, policy_count, "installed cache snapshot");
            Ok(RefreshOutcome::Installed { version })
        } else {
            let current = self.version().unwrap_or(version);
            Ok(RefreshOutcome::Unchanged { version: current })
        }
    }
}
