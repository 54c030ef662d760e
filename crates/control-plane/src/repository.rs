use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Policy, Secret};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub revision: u64,
    pub secrets: Vec<Secret>,
    pub policies: Vec<Policy>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable home of secrets and policies. Every write bumps `revision`.
pub trait SecretPolicyRepository: Send + Sync {
    fn list_secrets(&self) -> Result<Vec<Secret>, RepositoryError>;
    fn list_policies(&self) -> Result<Vec<Policy>, RepositoryError>;
    fn get_secret(&self, id: &str) -> Result<Option<Secret>, RepositoryError>;
    fn revision(&self) -> Result<u64, RepositoryError>;
    fn load_snapshot(&self) -> Result<RepositorySnapshot, RepositoryError>;
    fn upsert_secret(&self, secret: &Secret) -> Result<u64, RepositoryError>;
    fn delete_secret(&self, id: &str) -> Result<u64, RepositoryError>;
    fn upsert_policy(&self, policy: &Policy) -> Result<u64, RepositoryError>;
    fn delete_policy(&self, id: &str) -> Result<u64, RepositoryError>;
    fn is_seeded(&self) -> Result<bool, RepositoryError>;
}

#[derive(Default)]
struct RepoState {
    revision: u64,
    secrets: BTreeMap<String, Secret>,
    policies: BTreeMap<String, Policy>,
}

#[derive(Clone, Default)]
pub struct InMemorySecretRepository {
    state: Arc<RwLock<RepoState>>,
}

impl InMemorySecretRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SecretPolicyRepository for InMemorySecretRepository {
    fn list_secrets(&self) -> Result<Vec<Secret>, RepositoryError> {
        Ok(self.state.read().secrets.values().cloned().collect())
    }

    fn list_policies(&self) -> Result<Vec<Policy>, RepositoryError> {
        Ok(self.state.read().policies.values().cloned().collect())
    }

    fn get_secret(&self, id: &str) -> Result<Option<Secret>, RepositoryError> {
        Ok(self.state.read().secrets.get(id).cloned())
    }

    fn revision(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.read().revision)
    }

    fn load_snapshot(&self) -> Result<RepositorySnapshot, RepositoryError> {
        let state = self.state.read();
        Ok(RepositorySnapshot {
            revision: state.revision,
            secrets: state.secrets.values().cloned().collect(),
            policies: state.policies.values().cloned().collect(),
        })
    }

    fn upsert_secret(&self, secret: &Secret) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        state.secrets.insert(secret.id.clone(), secret.clone());
        state.revision += 1;
        Ok(state.revision)
    }

    fn delete_secret(&self, id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        if state.secrets.remove(id).is_some() {
            state.revision += 1;
        }
        Ok(state.revision)
    }

    fn upsert_policy(&self, policy: &Policy) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        state.policies.insert(policy.id.clone(), policy.clone());
        state.revision += 1;
        Ok(state.revision)
    }

    fn delete_policy(&self, id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        if state.policies.remove(id).is_some() {
            state.revision += 1;
        }
        Ok(state.revision)
    }

    fn is_seeded(&self) -> Result<bool, RepositoryError> {
        Ok(self.state.read().revision > 0)
    }
}

pub fn seed_if_empty(
    repo: &dyn SecretPolicyRepository,
    seed: &RepositorySnapshot,
) -> Result<bool, RepositoryError> {
    if repo.is_seeded()? {
        return Ok(false);
    }
    for secret in &seed.secrets {
        repo.upsert_secret(secret)?;
    }
    for policy in &seed.policies {
        repo.upsert_policy(policy)?;
    }
    Ok(true)
}
