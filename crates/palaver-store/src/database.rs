//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations are run before any other operation.
//!
//! The database file itself is plain SQLite; every sensitive field (chain
//! keys, signing keys, receiver state) is sealed with XChaCha20-Poly1305
//! before it reaches a row, see the `keys` module.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/palaver/palaver.db`
    /// - macOS:   `~/Library/Application Support/org.palaver.palaver/palaver.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\palaver\palaver\data\palaver.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "palaver", "palaver").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("palaver.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for transactions or ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
