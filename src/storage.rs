use crate::api::models::Conversation;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no data directory available")]
    NoDataDir,
    #[error("cache directory could not be created: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cached row is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "GigChat")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Last known conversation list, shown before the first poll completes.
pub struct ChatCache {
    conn: Connection,
}

impl ChatCache {
    pub fn open_default() -> Result<Self, StorageError> {
        let path = db_path().ok_or(StorageError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        ensure_dir(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY,
                project_title TEXT NOT NULL,
                unread_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                cached_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Make the cache mirror `chats` exactly, dropping rows the server no longer lists.
    pub fn replace_all(&mut self, chats: &[Conversation]) -> Result<(), StorageError> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chats", [])?;
        for c in chats {
            let raw = serde_json::to_string(c)?;
            let updated = c.updated_at.map(|t| t.timestamp()).unwrap_or(0);
            tx.execute(
                r#"
                INSERT INTO chats (id, project_title, unread_count, updated_at, cached_at, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![c.id as i64, c.title(), c.unread_count as i64, updated, now, raw],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cached conversations, most recently updated first.
    pub fn load(&self, limit: Option<usize>) -> Result<Vec<Conversation>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_json FROM chats ORDER BY updated_at DESC, id DESC LIMIT ?1",
        )?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(serde_json::from_str(&r?)?);
        }
        Ok(out)
    }

    /// When the cached list was last written, if ever.
    pub fn cached_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let secs: Option<i64> =
            self.conn
                .query_row("SELECT MAX(cached_at) FROM chats", [], |row| row.get(0))?;
        Ok(secs.and_then(|s| DateTime::from_timestamp(s, 0)))
    }

    pub fn remove(&self, conversation_id: u64) -> Result<bool, StorageError> {
        let n = self.conn.execute(
            "DELETE FROM chats WHERE id = ?1",
            params![conversation_id as i64],
        )?;
        Ok(n > 0)
    }
}
