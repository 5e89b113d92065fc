#![allow(dead_code)]

//! C2: durable, transactional key/value store for note records, links, and aliases.
//!
//! Backed by `rusqlite` (bundled SQLite), the persistence crate the teacher crate already
//! declared in `Cargo.toml` via its `SyncError::Database` variant. A single
//! `Mutex<Connection>` gives the single-writer discipline SPEC_FULL.md §5 requires without
//! introducing a second lock type.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{AliasKind, AliasRecord, LinkRecord, NoteRecord, SyncError, SyncStatus};

const SCHEMA_VERSION: i64 = 1;

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Additive-only migrations driven by `meta.schema_version`, per SPEC_FULL.md §4.2.
    fn migrate(&self) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let current: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |r| r.get(0))
            .optional()?;
        let current: i64 = current.map(|s| s.parse().unwrap_or(0)).unwrap_or(0);

        if current < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_state (
                    local_path        TEXT PRIMARY KEY,
                    remote_id         TEXT,
                    full_hash         TEXT NOT NULL,
                    body_hash         TEXT NOT NULL,
                    frontmatter_hash  TEXT NOT NULL,
                    status            TEXT NOT NULL,
                    last_sync         INTEGER,
                    remote_mtime      INTEGER
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_state_remote_id
                    ON sync_state(remote_id) WHERE remote_id IS NOT NULL;

                CREATE TABLE IF NOT EXISTS links (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_path  TEXT NOT NULL,
                    target_name  TEXT NOT NULL,
                    target_path  TEXT,
                    remote_id    TEXT,
                    resolved     INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(source_path, target_name)
                );

                CREATE TABLE IF NOT EXISTS aliases (
                    local_path TEXT NOT NULL,
                    alias      TEXT NOT NULL,
                    kind       TEXT NOT NULL,
                    UNIQUE(local_path, alias)
                );",
            )?;
        }

        conn.execute(
            "INSERT INTO meta(key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    // ---- sync_state -------------------------------------------------------

    pub fn get(&self, path: &str) -> Result<Option<NoteRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        Self::get_locked(&conn, path)
    }

    fn get_locked(conn: &Connection, path: &str) -> Result<Option<NoteRecord>, SyncError> {
        conn.query_row(
            "SELECT local_path, remote_id, full_hash, body_hash, frontmatter_hash, status, last_sync, remote_mtime
             FROM sync_state WHERE local_path = ?1",
            params![path],
            row_to_record,
        )
        .optional()
        .map_err(SyncError::from)
    }

    /// Upsert. Re-validates the record's invariants before writing.
    pub fn put(&self, record: &NoteRecord) -> Result<(), SyncError> {
        record.check_invariants()?;
        let conn = self.conn.lock().expect("state store mutex poisoned");

        if let Some(rid) = &record.remote_id {
            let clashing: Option<String> = conn
                .query_row(
                    "SELECT local_path FROM sync_state WHERE remote_id = ?1 AND local_path != ?2",
                    params![rid, record.local_path],
                    |r| r.get(0),
                )
                .optional()?;
            if clashing.is_some() {
                let msg = format!("remote_id {rid:?} already bound to another note");
                tracing::error!(remote_id = %rid, local_path = %record.local_path, "{msg}");
                return Err(SyncError::Corruption(msg));
            }
        }

        conn.execute(
            "INSERT INTO sync_state
                (local_path, remote_id, full_hash, body_hash, frontmatter_hash, status, last_sync, remote_mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(local_path) DO UPDATE SET
                remote_id = excluded.remote_id,
                full_hash = excluded.full_hash,
                body_hash = excluded.body_hash,
                frontmatter_hash = excluded.frontmatter_hash,
                status = excluded.status,
                last_sync = excluded.last_sync,
                remote_mtime = excluded.remote_mtime",
            params![
                record.local_path,
                record.remote_id,
                record.full_hash,
                record.body_hash,
                record.frontmatter_hash,
                record.status.as_str(),
                record.last_sync.map(|t| t.timestamp()),
                record.remote_mtime.map(|t| t.timestamp()),
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute("DELETE FROM sync_state WHERE local_path = ?1", params![path])?;
        Ok(())
    }

    /// `list("")` returns all records; any non-empty filter restricts to that status.
    pub fn list(&self, status_filter: &str) -> Result<Vec<NoteRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut stmt = if status_filter.is_empty() {
            conn.prepare(
                "SELECT local_path, remote_id, full_hash, body_hash, frontmatter_hash, status, last_sync, remote_mtime
                 FROM sync_state",
            )?
        } else {
            conn.prepare(
                "SELECT local_path, remote_id, full_hash, body_hash, frontmatter_hash, status, last_sync, remote_mtime
                 FROM sync_state WHERE status = ?1",
            )?
        };

        let rows = if status_filter.is_empty() {
            stmt.query_map([], row_to_record)?
        } else {
            stmt.query_map(params![status_filter], row_to_record)?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- links --------------------------------------------------------

    /// Transactional batch insert, idempotent on `(source, target)`.
    pub fn register_links(&self, source: &str, targets: &[String]) -> Result<(), SyncError> {
        let mut conn = self.conn.lock().expect("state store mutex poisoned");
        let tx = conn.transaction()?;
        for target in targets {
            tx.execute(
                "INSERT INTO links (source_path, target_name, resolved) VALUES (?1, ?2, 0)
                 ON CONFLICT(source_path, target_name) DO NOTHING",
                params![source, target],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_links_from(&self, source: &str) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute("DELETE FROM links WHERE source_path = ?1", params![source])?;
        Ok(())
    }

    pub fn update_link_source(&self, old: &str, new: &str) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute(
            "UPDATE links SET source_path = ?2 WHERE source_path = ?1",
            params![old, new],
        )?;
        Ok(())
    }

    pub fn resolve_link(
        &self,
        id: i64,
        target_path: Option<&str>,
        remote_id: Option<&str>,
        resolved: bool,
    ) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute(
            "UPDATE links SET target_path = ?2, remote_id = ?3, resolved = ?4 WHERE id = ?1",
            params![id, target_path, remote_id, resolved as i64],
        )?;
        Ok(())
    }

    pub fn all_links(&self) -> Result<Vec<LinkRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, source_path, target_name, target_path, remote_id, resolved FROM links",
        )?;
        let rows = stmt.query_map([], row_to_link)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn unresolved_links(&self) -> Result<Vec<LinkRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, source_path, target_name, target_path, remote_id, resolved FROM links WHERE resolved = 0",
        )?;
        let rows = stmt.query_map([], row_to_link)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn links_targeting(&self, target_path: &str, basename: &str) -> Result<Vec<LinkRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, source_path, target_name, target_path, remote_id, resolved
             FROM links WHERE target_path = ?1 OR target_name = ?2",
        )?;
        let rows = stmt.query_map(params![target_path, basename], row_to_link)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- aliases --------------------------------------------------------

    pub fn register_alias(&self, path: &str, alias: &str, kind: AliasKind) -> Result<(), SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.execute(
            "INSERT INTO aliases (local_path, alias, kind) VALUES (?1, ?2, ?3)
             ON CONFLICT(local_path, alias) DO UPDATE SET kind = excluded.kind",
            params![path, alias, kind.as_str()],
        )?;
        Ok(())
    }

    pub fn find_alias(&self, alias: &str) -> Result<Option<AliasRecord>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        conn.query_row(
            "SELECT local_path, alias, kind FROM aliases WHERE alias = ?1",
            params![alias],
            |row| {
                let kind: String = row.get(2)?;
                Ok(AliasRecord {
                    local_path: row.get(0)?,
                    alias: row.get(1)?,
                    kind: AliasKind::parse(&kind).unwrap_or(AliasKind::Explicit),
                })
            },
        )
        .optional()
        .map_err(SyncError::from)
    }

    pub fn all_local_paths(&self) -> Result<Vec<String>, SyncError> {
        let conn = self.conn.lock().expect("state store mutex poisoned");
        let mut stmt = conn.prepare("SELECT local_path FROM sync_state")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NoteRecord> {
    let status: String = row.get(5)?;
    let last_sync: Option<i64> = row.get(6)?;
    let remote_mtime: Option<i64> = row.get(7)?;
    Ok(NoteRecord {
        local_path: row.get(0)?,
        remote_id: row.get(1)?,
        full_hash: row.get(2)?,
        body_hash: row.get(3)?,
        frontmatter_hash: row.get(4)?,
        status: SyncStatus::parse(&status).unwrap_or(SyncStatus::Error),
        last_sync: last_sync.and_then(|s| Utc.timestamp_opt(s, 0).single()),
        remote_mtime: remote_mtime.and_then(|s| Utc.timestamp_opt(s, 0).single()),
    })
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<LinkRecord> {
    let resolved: i64 = row.get(5)?;
    Ok(LinkRecord {
        id: row.get(0)?,
        source_path: row.get(1)?,
        target_name: row.get(2)?,
        target_path: row.get(3)?,
        remote_id: row.get(4)?,
        resolved: resolved != 0,
    })
}

pub fn now_truncated() -> DateTime<Utc> {
    crate::types::truncate_to_secs(Utc::now())
}
