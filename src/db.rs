//! Knowledge store
//!
//! Optional per-project SQLite key/value store (`.agent_db.sqlite`) that
//! roles persist notes into across iterations.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// File name of the per-project store
pub const DB_FILE: &str = ".agent_db.sqlite";

/// Namespaced key/value store
pub struct KnowledgeStore {
    conn: Connection,
}

impl KnowledgeStore {
    /// Open (creating if needed) the store in the project directory.
    pub fn open(project_dir: &Path) -> rusqlite::Result<Self> {
        let path = project_dir.join(DB_FILE);
        debug!(?path, "KnowledgeStore::open: called");

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS knowledge (
                namespace TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;

        Ok(Self { conn })
    }

    pub fn put(&self, namespace: &str, key: &str, value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO knowledge (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, namespace: &str, key: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM knowledge WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn delete(&self, namespace: &str, key: &str) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM knowledge WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(changed > 0)
    }

    pub fn keys(&self, namespace: &str) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM knowledge WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![namespace], |row| row.get(0))?;
        rows.collect()
    }
}
