use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{Policy, Secret};
use crate::repository::{RepositoryError, RepositorySnapshot, SecretPolicyRepository};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Payload tagged with the source revision it was read at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub items: T,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeNotice {
    SecretsChanged { version: u64 },
    PoliciesChanged { version: u64 },
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication transport error: {0}")]
    Transport(String),
    #[error("replication call timed out")]
    Timeout,
    #[error("malformed replication payload: {0}")]
    Malformed(String),
    #[error("secrets at version {secrets} and policies at version {policies} never converged")]
    Inconsistent { secrets: u64, policies: u64 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("repository worker failed: {0}")]
    Worker(String),
}

#[async_trait]
pub trait ReplicationSource: Send + Sync {
    async fn list_secrets(&self) -> Result<Versioned<Vec<Secret>>, ReplicationError>;
    async fn list_policies(&self) -> Result<Versioned<Vec<Policy>>, ReplicationError>;

    /// Push channel for sources that can announce mutations. Sources without
    /// one are only polled.
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        None
    }
}

/// Source co-located with the repository. Writes routed through it are
/// announced to every subscriber.
pub struct RepositoryReplicationSource {
    repo: Arc<dyn SecretPolicyRepository>,
    changes: broadcast::Sender<ChangeNotice>,
}

impl RepositoryReplicationSource {
    pub fn new(repo: Arc<dyn SecretPolicyRepository>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { repo, changes }
    }

    pub fn shared(repo: Arc<dyn SecretPolicyRepository>) -> Arc<Self> {
        Arc::new(Self::new(repo))
    }

    pub fn repository(&self) -> &Arc<dyn SecretPolicyRepository> {
        &self.repo
    }

    pub fn upsert_secret(&self, secret: &Secret) -> Result<u64, RepositoryError> {
        let version = self.repo.upsert_secret(secret)?;
        self.notify(ChangeNotice::SecretsChanged { version });
        Ok(version)
    }

    pub fn delete_secret(&self, id: &str) -> Result<u64, RepositoryError> {
        let version = self.repo.delete_secret(id)?;
        self.notify(ChangeNotice::SecretsChanged { version });
        Ok(version)
    }

    pub fn upsert_policy(&self, policy: &Policy) -> Result<u64, RepositoryError> {
        let version = self.repo.upsert_policy(policy)?;
        self.notify(ChangeNotice::PoliciesChanged { version });
        Ok(version)
    }

    pub fn delete_policy(&self, id: &str) -> Result<u64, RepositoryError> {
        let version = self.repo.delete_policy(id)?;
        self.notify(ChangeNotice::PoliciesChanged { version });
        Ok(version)
    }

    /// Reads the repository off the async workers; SQLite calls block.
    async fn load_snapshot(&self) -> Result<RepositorySnapshot, ReplicationError> {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || repo.load_snapshot())
            .await
            .map_err(|err| ReplicationError::Worker(err.to_string()))?
            .map_err(ReplicationError::from)
    }

    fn notify(&self, notice: ChangeNotice) {
        // no receivers is fine, nodes poll as well
        if self.changes.send(notice).is_err() {
            debug!(?notice, "change notice has no subscribers");
        }
    }
}

#[async_trait]
impl ReplicationSource for RepositoryReplicationSource {
    async fn list_secrets(&self) -> Result<Versioned<Vec<Secret>>, ReplicationError> {
        let snapshot = self.load_snapshot().await?;
        Ok(Versioned {
            version: snapshot.revision,
            items: snapshot.secrets,
        })
    }

    async fn list_policies(&self) -> Result<Versioned<Vec<Policy>>, ReplicationError> {
        let snapshot = self.load_snapshot().await?;
        Ok(Versioned {
            version: snapshot.revision,
            items: snapshot.policies,
        })
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        Some(self.changes.subscribe())
    }
}
