//! Link list
//!
//! SQLite-backed list of user services shown on the dashboard. The
//! `services` channel pushes the whole list.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

/// A stored link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a link
#[derive(Debug, Clone, Deserialize)]
pub struct NewLink {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl NewLink {
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.name.trim().is_empty() {
            return Err(LinkError::Validation("name must not be empty".to_string()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(LinkError::Validation(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        Ok(())
    }
}

/// Link store errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid link: {0}")]
    Validation(String),

    #[error("Link not found: {0}")]
    NotFound(String),
}

/// SQLite link store
pub struct LinkStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl LinkStore {
    /// Create or open the store at `path`
    pub fn open(path: &Path) -> Result<Self, LinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self, LinkError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, LinkError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS links (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                icon TEXT,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_links_created ON links(created_at)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All links, oldest first
    pub fn list(&self) -> Result<Vec<Link>, LinkError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, url, icon, created_at FROM links
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let links = stmt
            .query_map([], link_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(links)
    }

    pub fn get(&self, id: &str) -> Result<Link, LinkError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, url, icon, created_at FROM links WHERE id = ?",
        )?;

        let mut rows = stmt.query_map(params![id], link_from_row)?;
        let link = rows.next().transpose()?;

        link.ok_or_else(|| LinkError::NotFound(id.to_string()))
    }

    pub fn create(&self, new: NewLink) -> Result<Link, LinkError> {
        new.validate()?;

        let link = Link {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            url: new.url,
            icon: new.icon.filter(|i| !i.is_empty()),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO links (id, name, url, icon, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                link.id,
                link.name,
                link.url,
                link.icon,
                link.created_at.timestamp_millis()
            ],
        )?;

        tracing::info!(id = %link.id, name = %link.name, "Link created");
        Ok(link)
    }

    pub fn delete(&self, id: &str) -> Result<(), LinkError> {
        let removed = self
            .conn()
            .execute("DELETE FROM links WHERE id = ?", params![id])?;

        if removed == 0 {
            return Err(LinkError::NotFound(id.to_string()));
        }

        tracing::info!(id = %id, "Link deleted");
        Ok(())
    }

    /// Check the database answers queries
    pub fn ping(&self) -> bool {
        self.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    let millis: i64 = row.get(4)?;
    Ok(Link {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        icon: row.get(3)?,
        created_at: Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default(),
    })
}
