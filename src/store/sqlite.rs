use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::repo::CursorStore;

const CURSOR_KEY: &str = "history_cursor";

/// Cursor and processed ids persisted across restarts.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed (
                id          TEXT PRIMARY KEY,
                recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS processed_recorded_at
                ON processed (recorded_at);
            "#,
        )?;
        Ok(())
    }

    fn get_meta_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(r#"SELECT value FROM meta WHERE key=?1"#, params![key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    fn set_meta_i64(&self, key: &str, value: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }
}

fn to_sql(history_id: u64) -> Result<i64> {
    i64::try_from(history_id).map_err(|_| anyhow!("history id {history_id} out of range"))
}

impl CursorStore for SqliteStore {
    fn cursor(&self) -> Result<Option<u64>> {
        Ok(self.get_meta_i64(CURSOR_KEY)?.map(|v| v as u64))
    }

    fn advance_cursor(&mut self, history_id: u64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value=MAX(value, excluded.value)
            "#,
            params![CURSOR_KEY, to_sql(history_id)?],
        )?;
        Ok(())
    }

    fn reset_cursor(&mut self, history_id: u64) -> Result<()> {
        self.set_meta_i64(CURSOR_KEY, to_sql(history_id)?)
    }

    fn is_processed(&self, id: &str) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                r#"SELECT 1 FROM processed WHERE id=?1"#,
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn mark_processed(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            r#"INSERT OR IGNORE INTO processed (id, recorded_at) VALUES (?1, ?2)"#,
            params![id, at.timestamp()],
        )?;
        Ok(())
    }

    fn compact(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            r#"DELETE FROM processed WHERE recorded_at < ?1"#,
            params![cutoff.timestamp()],
        )?;
        Ok(n)
    }

    fn processed_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(r#"SELECT COUNT(*) FROM processed"#, [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
