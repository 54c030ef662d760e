use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditSink, InMemoryAuditSink, NoopAuditSink};
use crate::config::SystemConfig;
use crate::local_cache::LocalCache;
use crate::redis_store::{RedisAuditSink, RedisRevocationCache, RedisStoreConfig};
use crate::replication::{ReplicationError, ReplicationSource, RepositoryReplicationSource};
use crate::replication_client::{HttpReplicationClient, HttpReplicationConfig};
use crate::repository::{
    seed_if_empty, RepositoryError, RepositorySnapshot, SecretPolicyRepository,
};
use crate::revocation::{InMemoryRevocationCache, RevocationCache};
use crate::sqlite_repository::SqliteSecretRepository;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error("shared cache error: {0}")]
    SharedCache(String),
    #[error("seed error: {0}")]
    Seed(String),
}

/// Background audit writer that must be flushed on shutdown.
pub struct AuditWorker {
    sink: Arc<RedisAuditSink>,
    worker: JoinHandle<()>,
}

impl AuditWorker {
    pub async fn close(self, grace: Duration) {
        self.sink.close();
        if tokio::time::timeout(grace, self.worker).await.is_err() {
            warn!("audit worker did not drain within {:?}", grace);
        }
    }
}

pub struct ControlPlaneBundle {
    pub cache: Arc<LocalCache>,
    pub source: Arc<dyn ReplicationSource>,
    /// Set when this node owns the repository and can serve replication to
    /// other nodes.
    pub local_source: Option<Arc<RepositoryReplicationSource>>,
    pub revocations: Arc<dyn RevocationCache>,
    pub audit: Arc<dyn AuditSink>,
    pub audit_worker: Option<AuditWorker>,
}

impl ControlPlaneBundle {
    /// Everything in process: repository-backed source, node-local revocation
    /// cache and an in-memory audit sink.
    pub fn in_memory(repo: Arc<dyn SecretPolicyRepository>) -> Self {
        let local_source = RepositoryReplicationSource::shared(repo);
        Self {
            cache: LocalCache::shared(),
            source: local_source.clone(),
            local_source: Some(local_source),
            revocations: InMemoryRevocationCache::shared(),
            audit: InMemoryAuditSink::shared(),
            audit_worker: None,
        }
    }
}

/// Builds the bundle described by `config`. Must run inside a tokio runtime
/// because the shared audit sink spawns its writer task.
pub fn load_from_system_config(config: &SystemConfig) -> Result<ControlPlaneBundle, BootstrapError> {
    let (source, local_source) = resolve_source(config)?;
    let (revocations, audit, audit_worker) = resolve_shared_cache(config)?;
    Ok(ControlPlaneBundle {
        cache: LocalCache::shared(),
        source,
        local_source,
        revocations,
        audit,
        audit_worker,
    })
}

type ResolvedSource = (
    Arc<dyn ReplicationSource>,
    Option<Arc<RepositoryReplicationSource>>,
);

fn resolve_source(config: &SystemConfig) -> Result<ResolvedSource, BootstrapError> {
    match config.get_optional_string("replication.endpoint") {
        Some(endpoint) => {
            info!(%endpoint, "replicating from remote primary");
            let client = HttpReplicationClient::new(HttpReplicationConfig {
                endpoint,
                token: config.get_optional_string("replication.token"),
                timeout: config.get_millis("replication.timeout_ms"),
            })?;
            let source: Arc<dyn ReplicationSource> = Arc::new(client);
            Ok((source, None))
        }
        None => {
            let path = config.get_string("storage.sqlite_path");
            info!(%path, "replicating from local repository");
            let repo = SqliteSecretRepository::open(&path)?;
            repo.ensure_schema()?;
            if let Some(seed_path) = config.get_optional_string("storage.seed_path") {
                seed_from_file(&repo, &seed_path)?;
            }
            let local = RepositoryReplicationSource::shared(Arc::new(repo));
            let source: Arc<dyn ReplicationSource> = local.clone();
            Ok((source, Some(local)))
        }
    }
}

fn seed_from_file(repo: &dyn SecretPolicyRepository, path: &str) -> Result<(), BootstrapError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| BootstrapError::Seed(format!("{path}: {err}")))?;
    let seed: RepositorySnapshot = serde_json::from_str(&raw)
        .map_err(|err| BootstrapError::Seed(format!("{path}: {err}")))?;
    if seed_if_empty(repo, &seed)? {
        info!(
            %path,
            secrets = seed.secrets.len(),
            policies = seed.policies.len(),
            "seeded empty repository"
        );
    }
    Ok(())
}

type SharedCache = (
    Arc<dyn RevocationCache>,
    Arc<dyn AuditSink>,
    Option<AuditWorker>,
);

fn resolve_shared_cache(config: &SystemConfig) -> Result<SharedCache, BootstrapError> {
    let audit_enabled = config.get_bool("audit.enabled");
    let audit_buffer = config.get_number("audit.buffer_size").max(1) as usize;
    let Some(redis_url) = config.get_optional_string("cache.redis_url") else {
        warn!("no shared cache configured, revocations are node-local");
        let audit: Arc<dyn AuditSink> = if audit_enabled {
            warn!(
                retained = audit_buffer,
                "audit events are kept in memory only, oldest dropped first"
            );
            Arc::new(InMemoryAuditSink::with_capacity(audit_buffer))
        } else {
            Arc::new(NoopAuditSink)
        };
        let revocations: Arc<dyn RevocationCache> = InMemoryRevocationCache::shared();
        return Ok((revocations, audit, None));
    };

    let client =
        redis::Client::open(redis_url).map_err(|err| BootstrapError::SharedCache(err.to_string()))?;
    let store_config = RedisStoreConfig {
        key_prefix: config.get_string("cache.key_prefix"),
        analytics_ttl_seconds: config.get_number("audit.ttl_seconds").max(0) as u64,
        analytics_buffer: audit_buffer,
        ..RedisStoreConfig::default()
    };
    let revocations: Arc<dyn RevocationCache> =
        Arc::new(RedisRevocationCache::new(client.clone(), store_config.clone()));
    if !audit_enabled {
        let audit: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
        return Ok((revocations, audit, None));
    }
    let (sink, worker) = RedisAuditSink::spawn(client, store_config);
    let sink = Arc::new(sink);
    let audit: Arc<dyn AuditSink> = sink.clone();
    Ok((revocations, audit, Some(AuditWorker { sink, worker })))
}
