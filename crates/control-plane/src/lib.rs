pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod local_cache;
pub mod model;
pub mod policy;
pub mod redis_store;
pub mod replication;
pub mod replication_client;
pub mod repository;
pub mod revocation;
pub mod sqlite_repository;
pub mod static_config;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use bootstrap::{load_from_system_config, AuditWorker, BootstrapError, ControlPlaneBundle};
pub use config::{ConfigError, SystemConfig, SystemConfigLoader};
pub use local_cache::{CacheSnapshot, LocalCache, RefreshOutcome};
pub use model::{
    unix_now, AuthzRequest, Condition, Decision, Effect, Matcher, Policy, PolicyDocument,
    RequestContext, Secret, SecretStatus, Statement,
};
pub use policy::{EvaluationError, PolicyEngine};
pub use redis_store::{RedisAuditSink, RedisRevocationCache, RedisStoreConfig};
pub use replication::{
    ChangeNotice, ReplicationError, ReplicationSource, RepositoryReplicationSource, Versioned,
};
pub use replication_client::{HttpReplicationClient, HttpReplicationConfig};
pub use repository::{
    seed_if_empty, InMemorySecretRepository, RepositoryError, RepositorySnapshot,
    SecretPolicyRepository,
};
pub use revocation::{InMemoryRevocationCache, RevocationCache, RevocationError};
pub use sqlite_repository::SqliteSecretRepository;
