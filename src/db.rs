use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub text: String,
    pub created_at: String,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS list_cache (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                fetched_at_ms INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS seen_episodes (
                external_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                episode INTEGER NOT NULL,
                PRIMARY KEY (external_id, episode)
            );
            CREATE TABLE IF NOT EXISTS notification_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Returns `(owner, fetched_at_ms, payload)` for the cached list, if any.
    pub fn list_cache(&self) -> Result<Option<(String, i64, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT owner, fetched_at_ms, payload FROM list_cache WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn store_list_cache(&self, owner: &str, fetched_at_ms: i64, payload: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO list_cache (id, owner, fetched_at_ms, payload) VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                fetched_at_ms = excluded.fetched_at_ms,
                payload = excluded.payload
            "#,
            params![owner, fetched_at_ms, payload],
        )?;
        Ok(())
    }

    pub fn clear_list_cache(&self) -> Result<()> {
        self.conn.execute("DELETE FROM list_cache", [])?;
        Ok(())
    }

    /// Ledger rows per id in insertion order.
    pub fn seen_episodes(&self) -> Result<Vec<(i64, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT external_id, episode FROM seen_episodes ORDER BY external_id, seq",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Stores a cycle's ledger and its new history entries in one
    /// transaction, trimming the log to the newest `limit` records.
    pub fn record_cycle(
        &mut self,
        ledger_rows: &[(i64, u32)],
        texts: &[String],
        limit: usize,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM seen_episodes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO seen_episodes (external_id, seq, episode) VALUES (?1, ?2, ?3)",
            )?;
            for (seq, (external_id, episode)) in ledger_rows.iter().enumerate() {
                stmt.execute(params![external_id, seq as i64, episode])?;
            }
        }
        {
            let mut stmt =
                tx.prepare("INSERT INTO notification_log (text, created_at) VALUES (?1, ?2)")?;
            for text in texts {
                stmt.execute(params![text, now])?;
            }
        }
        tx.execute(
            r#"
            DELETE FROM notification_log WHERE id NOT IN (
                SELECT id FROM notification_log ORDER BY id DESC LIMIT ?1
            )
            "#,
            params![limit as i64],
        )?;
        tx.commit().context("failed to commit cycle results")?;
        Ok(())
    }

    /// Newest first.
    pub fn notifications(&self) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT text, created_at FROM notification_log ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(NotificationRecord {
                text: row.get(0)?,
                created_at: row.get(1)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn clear_notifications(&self) -> Result<()> {
        self.conn.execute("DELETE FROM notification_log", [])?;
        Ok(())
    }
}
