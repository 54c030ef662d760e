use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::model::{Policy, Secret};
use crate::repository::{RepositoryError, RepositorySnapshot, SecretPolicyRepository};

/// SQLite-backed repository. Rows hold JSON documents; a single-row table
/// carries the revision counter so every write bumps it in the same
/// transaction.
pub struct SqliteSecretRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSecretRepository {
    pub fn open(path: &str) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS secrets (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS revision (
                id INTEGER PRIMARY KEY,
                value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO revision (id, value) VALUES (1, 0);",
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn write<F>(&self, apply: F) -> Result<u64, RepositoryError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<bool, RepositoryError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_err)?;
        if apply(&tx)? {
            tx.execute("UPDATE revision SET value = value + 1 WHERE id = 1", [])
                .map_err(store_err)?;
        }
        let revision = read_revision(&tx)?;
        tx.commit().map_err(store_err)?;
        Ok(revision)
    }
}

impl SecretPolicyRepository for SqliteSecretRepository {
    fn list_secrets(&self) -> Result<Vec<Secret>, RepositoryError> {
        let conn = self.conn.lock();
        read_secrets(&conn)
    }

    fn list_policies(&self) -> Result<Vec<Policy>, RepositoryError> {
        let conn = self.conn.lock();
        read_policies(&conn)
    }

    fn get_secret(&self, id: &str) -> Result<Option<Secret>, RepositoryError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row("SELECT body FROM secrets WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(store_err)?;
        body.map(|body| decode(&body)).transpose()
    }

    fn revision(&self) -> Result<u64, RepositoryError> {
        let conn = self.conn.lock();
        read_revision(&conn)
    }

    fn load_snapshot(&self) -> Result<RepositorySnapshot, RepositoryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_err)?;
        let snapshot = RepositorySnapshot {
            revision: read_revision(&tx)?,
            secrets: read_secrets(&tx)?,
            policies: read_policies(&tx)?,
        };
        tx.commit().map_err(store_err)?;
        Ok(snapshot)
    }

    fn upsert_secret(&self, secret: &Secret) -> Result<u64, RepositoryError> {
        let body = encode(secret)?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO secrets (id, body, updated_at)
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(id) DO UPDATE
                 SET body = excluded.body, updated_at = CURRENT_TIMESTAMP",
                params![secret.id, body],
            )
            .map_err(store_err)?;
            Ok(true)
        })
    }

    fn delete_secret(&self, id: &str) -> Result<u64, RepositoryError> {
        self.write(|tx| {
            let removed = tx
                .execute("DELETE FROM secrets WHERE id = ?1", params![id])
                .map_err(store_err)?;
            Ok(removed > 0)
        })
    }

    fn upsert_policy(&self, policy: &Policy) -> Result<u64, RepositoryError> {
        let body = encode(policy)?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO policies (id, owner, body, updated_at)
                 VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
                 ON CONFLICT(id) DO UPDATE
                 SET owner = excluded.owner, body = excluded.body, updated_at = CURRENT_TIMESTAMP",
                params![policy.id, policy.owner, body],
            )
            .map_err(store_err)?;
            Ok(true)
        })
    }

    fn delete_policy(&self, id: &str) -> Result<u64, RepositoryError> {
        self.write(|tx| {
            let removed = tx
                .execute("DELETE FROM policies WHERE id = ?1", params![id])
                .map_err(store_err)?;
            Ok(removed > 0)
        })
    }

    fn is_seeded(&self) -> Result<bool, RepositoryError> {
        Ok(self.revision()? > 0)
    }
}

fn read_revision(conn: &Connection) -> Result<u64, RepositoryError> {
    let value: i64 = conn
        .query_row("SELECT value FROM revision WHERE id = 1", [], |row| row.get(0))
        .optional()
        .map_err(store_err)?
        .unwrap_or(0);
    Ok(value.max(0) as u64)
}

fn read_secrets(conn: &Connection) -> Result<Vec<Secret>, RepositoryError> {
    read_bodies(conn, "SELECT body FROM secrets ORDER BY id")?
        .iter()
        .map(|body| decode(body))
        .collect()
}

fn read_policies(conn: &Connection) -> Result<Vec<Policy>, RepositoryError> {
    read_bodies(conn, "SELECT body FROM policies ORDER BY id")?
        .iter()
        .map(|body| decode(body))
        .collect()
}

fn read_bodies(conn: &Connection, sql: &str) -> Result<Vec<String>, RepositoryError> {
    let mut stmt = conn.prepare(sql).map_err(store_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(store_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Serialization(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(body).map_err(|err| RepositoryError::Serialization(err.to_string()))
}

fn store_err(err: rusqlite::Error) -> RepositoryError {
    RepositoryError::Store(err.to_string())
}
