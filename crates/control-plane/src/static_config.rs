#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: &'static str,
    pub default_value: &'static str,
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    StaticConfigItem {
        key: "server.listen",
        description: "Address the authorization API binds to",
        value_type: "string",
        default_value: "0.0.0.0:9090",
    },
    StaticConfigItem {
        key: "server.admin_token",
        description: "Bearer token for admin and replication routes (empty disables them)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "storage.sqlite_path",
        description: "SQLite repository path, used when this node owns the repository",
        value_type: "string",
        default_value: "iam.sqlite",
    },
    StaticConfigItem {
        key: "storage.seed_path",
        description: "JSON snapshot loaded into an empty local repository (empty skips seeding)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "replication.endpoint",
        description: "Primary server base URL (empty replicates from the local repository)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "replication.token",
        description: "Bearer token presented to the primary server",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "replication.interval_ms",
        description: "Periodic cache refresh interval",
        value_type: "number",
        default_value: "5000",
    },
    StaticConfigItem {
        key: "replication.timeout_ms",
        description: "Timeout for each replication call",
        value_type: "number",
        default_value: "2000",
    },
    StaticConfigItem {
        key: "replication.alert_after_failures",
        description: "Consecutive refresh failures before an alert is logged",
        value_type: "number",
        default_value: "3",
    },
    StaticConfigItem {
        key: "replication.prime_attempts",
        description: "Attempts to prime the cache before giving up (0 retries forever)",
        value_type: "number",
        default_value: "0",
    },
    StaticConfigItem {
        key: "replication.prime_backoff_ms",
        description: "Delay between priming attempts",
        value_type: "number",
        default_value: "500",
    },
    StaticConfigItem {
        key: "cache.redis_url",
        description: "Shared revocation cache (empty uses a node-local cache)",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "cache.key_prefix",
        description: "Prefix for shared cache keys",
        value_type: "string",
        default_value: "",
    },
    StaticConfigItem {
        key: "cache.timeout_ms",
        description: "Timeout for each revocation lookup",
        value_type: "number",
        default_value: "200",
    },
    StaticConfigItem {
        key: "cache.revocation_ttl_seconds",
        description: "How long a revocation marker lives",
        value_type: "number",
        default_value: "86400",
    },
    StaticConfigItem {
        key: "cache.fail_open",
        description: "Accept requests when the revocation cache is unreachable",
        value_type: "boolean",
        default_value: "false",
    },
    StaticConfigItem {
        key: "auth.audience",
        description: "Required JWT audience",
        value_type: "string",
        default_value: "iam.authz",
    },
    StaticConfigItem {
        key: "auth.memo_ttl_ms",
        description: "TTL of the per-node validated token memo (0 disables it)",
        value_type: "number",
        default_value: "2000",
    },
    StaticConfigItem {
        key: "audit.enabled",
        description: "Record authorization decisions",
        value_type: "boolean",
        default_value: "true",
    },
    StaticConfigItem {
        key: "audit.buffer_size",
        description: "Audit events buffered before new ones are dropped",
        value_type: "number",
        default_value: "1024",
    },
    StaticConfigItem {
        key: "audit.ttl_seconds",
        description: "TTL of the shared analytics list",
        value_type: "number",
        default_value: "3600",
    },
    StaticConfigItem {
        key: "shutdown.grace_ms",
        description: "Upper bound for each shutdown step",
        value_type: "number",
        default_value: "5000",
    },
];
