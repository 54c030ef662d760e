use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::revocation::{RevocationCache, RevocationError};

#[derive(Clone, Debug)]
pub struct RedisStoreConfig {
    pub key_prefix: String,
    pub analytics_ttl_seconds: u64,
    pub analytics_buffer: usize,
    pub analytics_batch: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            analytics_ttl_seconds: 3600,
            analytics_buffer: 1024,
            analytics_batch: 64,
        }
    }
}

impl RedisStoreConfig {
    fn key(&self, suffix: &str) -> String {
        if self.key_prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.key_prefix, suffix)
        }
    }
}

/// Lazily established multiplexed connection, dropped on error so the next
/// call reconnects.
struct SharedConnection {
    client: redis::Client,
    conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
}

impl SharedConnection {
    fn new(client: redis::Client) -> Self {
        Self {
            client,
            conn: tokio::sync::Mutex::new(None),
        }
    }

    async fn get(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.conn.lock().await = None;
    }
}

const MAX_EXPIRE_SECONDS: u64 = i32::MAX as u64;

pub struct RedisRevocationCache {
    conn: SharedConnection,
    config: RedisStoreConfig,
}

impl RedisRevocationCache {
    pub fn new(client: redis::Client, config: RedisStoreConfig) -> Self {
        Self {
            conn: SharedConnection::new(client),
            config,
        }
    }

    fn revoked_key(&self, secret_id: &str) -> String {
        self.config.key(&format!("revoked:{secret_id}"))
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, RevocationError> {
        let mut conn = self
            .conn
            .get()
            .await
            .map_err(|err| RevocationError::Unavailable(err.to_string()))?;
        match cmd.query_async::<_, T>(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.conn.reset().await;
                Err(RevocationError::Unavailable(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl RevocationCache for RedisRevocationCache {
    async fn is_revoked(&self, secret_id: &str) -> Result<bool, RevocationError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.revoked_key(secret_id));
        let value: Option<String> = self.run(cmd).await?;
        Ok(value.is_some())
    }

    async fn revoke(&self, secret_id: &str, ttl: Duration) -> Result<(), RevocationError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.revoked_key(secret_id)).arg("1");
        // past this the server rejects EX, so the marker is kept until cleared
        if ttl.as_secs() <= MAX_EXPIRE_SECONDS {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = self.run(cmd).await?;
        Ok(())
    }

    async fn clear(&self, secret_id: &str) -> Result<(), RevocationError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.revoked_key(secret_id));
        let _: i64 = self.run(cmd).await?;
        Ok(())
    }
}

/// Buffers audit events in a bounded channel and pushes them to a Redis list
/// in batches from a background task. A full buffer drops the event.
pub struct RedisAuditSink {
    sender: Mutex<Option<mpsc::Sender<AuditEvent>>>,
}

impl RedisAuditSink {
    pub fn spawn(client: redis::Client, config: RedisStoreConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.analytics_buffer.max(1));
        let worker = tokio::spawn(run_audit_worker(
            SharedConnection::new(client),
            config,
            receiver,
        ));
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            worker,
        )
    }

    /// Stops accepting events. The worker drains what is buffered and exits.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

impl AuditSink for RedisAuditSink {
    fn record(&self, event: AuditEvent) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        if let Err(err) = sender.try_send(event) {
            warn!("dropping audit event: {err}");
        }
    }
}

async fn run_audit_worker(
    conn: SharedConnection,
    config: RedisStoreConfig,
    mut receiver: mpsc::Receiver<AuditEvent>,
) {
    let key = config.key("analytics");
    let batch_size = config.analytics_batch.max(1);
    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        while batch.len() < batch_size {
            match receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        let payloads: Vec<String> = batch
            .iter()
            .filter_map(|event| serde_json::to_string(event).ok())
            .collect();
        if payloads.is_empty() {
            continue;
        }

        let mut redis_conn = match conn.get().await {
            Ok(redis_conn) => redis_conn,
            Err(err) => {
                warn!(dropped = payloads.len(), "audit redis unavailable: {err}");
                continue;
            }
        };
        let mut pipe = redis::pipe();
        pipe.cmd("RPUSH").arg(&key).arg(payloads.clone()).ignore();
        if config.analytics_ttl_seconds > 0 {
            pipe.cmd("EXPIRE")
                .arg(&key)
                .arg(config.analytics_ttl_seconds)
                .ignore();
        }
        match pipe.query_async::<_, ()>(&mut redis_conn).await {
            Ok(()) => debug!(count = payloads.len(), "flushed audit events"),
            Err(err) => {
                conn.reset().await;
                warn!(dropped = payloads.len(), "audit flush failed: {err}");
            }
        }
    }
}

fn _assert_send_sync<T: Send + Sync>() {}

#[allow(dead_code)]
fn _assert_redis_types() {
    _assert_send_sync::<RedisRevocationCache>();
    _assert_send_sync::<RedisAuditSink>();
}
