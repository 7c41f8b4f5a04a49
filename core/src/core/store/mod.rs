//! Persistent relational store.
//!
//! Wraps a single embedded SQLite connection behind an async mutex so the
//! store can be shared across the application context. Schema is created on
//! first open and versioned; all writes that touch more than one row happen
//! inside a transaction.

pub mod accounts;
pub mod history;
pub mod models;
pub mod quota;
pub mod vault_meta;

use std::path::Path;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::CoreError;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    auth_ciphertext BLOB NOT NULL,
    auth_fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS switch_history (
    id TEXT PRIMARY KEY,
    from_account_id TEXT REFERENCES accounts(id) ON DELETE SET NULL,
    to_account_id TEXT REFERENCES accounts(id) ON DELETE RESTRICT,
    snapshot_path TEXT,
    result TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quota_snapshots (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    mode TEXT NOT NULL,
    remaining_value REAL,
    remaining_unit TEXT,
    quota_state TEXT NOT NULL,
    reset_at TEXT,
    source TEXT NOT NULL,
    confidence INTEGER NOT NULL,
    reason TEXT
);

CREATE TABLE IF NOT EXISTS vault_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    kdf_salt BLOB NOT NULL,
    kdf_mem_kib INTEGER NOT NULL,
    kdf_iters INTEGER NOT NULL,
    kdf_parallel INTEGER NOT NULL,
    verifier_ciphertext BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_switch_history_created_at ON switch_history(created_at);
CREATE INDEX IF NOT EXISTS idx_quota_snapshots_account_id ON quota_snapshots(account_id, created_at);
"#;

/// The embedded relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if necessary) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CoreError::StoreError(format!("failed to open database: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CoreError::StoreError(format!("failed to enable foreign keys: {e}")))?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::StoreError(format!("failed to open database: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CoreError::StoreError(format!("failed to enable foreign keys: {e}")))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), CoreError> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| CoreError::StoreError(format!("failed to initialize schema: {e}")))?;

        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_meta (id, version) VALUES (1, ?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(|e| CoreError::StoreError(format!("failed to record schema version: {e}")))?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                // No migrations defined yet beyond version 1.
                conn.execute(
                    "UPDATE schema_meta SET version = ?1 WHERE id = 1",
                    [SCHEMA_VERSION],
                )
                .map_err(|e| CoreError::StoreError(format!("failed to migrate schema: {e}")))?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(CoreError::StoreError(format!(
                    "database schema version {v} is newer than supported version {SCHEMA_VERSION}"
                )));
            }
            _ => {}
        }

        Ok(())
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
