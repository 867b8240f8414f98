use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};

use crate::store::{direct_children, dir_prefix, KvPair, WriteOptions};

pub struct KvDb {
    conn: Connection,
}

impl KvDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key     TEXT PRIMARY KEY,
                value   BLOB NOT NULL,
                is_dir  INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Direct children of `prefix`, ordered by key
    pub fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let dir = dir_prefix(prefix);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key, value, version, is_dir FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key"
            )
            .context("Failed to prepare query")?;

        let below = stmt
            .query_map([&dir], Self::row_to_pair)
            .context("Failed to query keys")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect keys")?;

        Ok(direct_children(prefix, below))
    }

    pub fn get(&self, key: &str) -> Result<Option<KvPair>> {
        let pair = self
            .conn
            .query_row(
                "SELECT key, value, version, is_dir FROM kv WHERE key = ?1",
                params![key],
                Self::row_to_pair,
            )
            .optional()
            .context("Failed to query key")?;

        Ok(pair)
    }

    /// Insert or overwrite a key, bumping its version
    pub fn put(&self, key: &str, value: &[u8], options: WriteOptions) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO kv (key, value, is_dir, version) VALUES (?1, ?2, ?3, 1)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                is_dir = excluded.is_dir,
                version = kv.version + 1
            "#,
            params![key, value, options.is_dir as i32],
        )
        .context("Failed to write key")?;

        Ok(())
    }

    /// Overwrite only if the stored version matches. Returns false on mismatch
    /// or when the key is gone.
    pub fn put_if_version(&self, key: &str, value: &[u8], expected_version: u64) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE kv SET value = ?2, version = version + 1 WHERE key = ?1 AND version = ?3",
            params![key, value, expected_version as i64],
        )
        .context("Failed to write key")?;

        Ok(updated == 1)
    }

    fn row_to_pair(row: &rusqlite::Row) -> Result<KvPair, rusqlite::Error> {
        let version: i64 = row.get(2)?;
        let is_dir: i32 = row.get(3)?;
        Ok(KvPair {
            key: row.get(0)?,
            value: row.get(1)?,
            version: version as u64,
            is_dir: is_dir != 0,
        })
    }
}
