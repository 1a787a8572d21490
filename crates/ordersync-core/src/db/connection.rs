//! Database connection management

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Where the database lives, as parsed from `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Memory,
    Local(String),
    /// `libsql://`, `http://` or `https://` endpoint
    Remote(String),
}

impl DatabaseTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidInput("database URL must not be empty".into()));
        }
        if url == ":memory:" {
            return Ok(Self::Memory);
        }
        if url.starts_with("libsql://") || is_http_url(url) {
            return Ok(Self::Remote(url.to_string()));
        }
        let path = url
            .strip_prefix("file://")
            .or_else(|| url.strip_prefix("file:"))
            .unwrap_or(url);
        Ok(Self::Local(path.to_string()))
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    // keeps the handle alive for the lifetime of the connection
    _db: LibSqlDatabase,
    conn: Connection,
    remote: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database named by a `DATABASE_URL` value.
    ///
    /// Remote targets require an auth token. Runs migrations automatically.
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        match DatabaseTarget::parse(url)? {
            DatabaseTarget::Memory => Self::open_in_memory().await,
            DatabaseTarget::Local(path) => Self::open(path).await,
            DatabaseTarget::Remote(url) => {
                let token = normalize_text_option(auth_token.map(str::to_string))
                    .ok_or_else(|| {
                        Error::InvalidInput(
                            "DATABASE_AUTH_TOKEN is required for remote databases".into(),
                        )
                    })?;
                Self::open_remote(url, token).await
            }
        }
    }

    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::init(db, false).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::init(db, false).await
    }

    /// Open a remote libSQL database. Every statement is a network round trip.
    pub async fn open_remote(url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let db = Builder::new_remote(url.into(), auth_token.into())
            .build()
            .await?;
        Self::init(db, true).await
    }

    async fn init(db: LibSqlDatabase, remote: bool) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            remote,
        };
        database.configure().await?;
        migrations::run(&database.conn).await?;
        Ok(database)
    }

    async fn configure(&self) -> Result<()> {
        if self.remote {
            return Ok(());
        }
        // WAL is unavailable for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA busy_timeout = 5000;", ()).await.ok();
        Ok(())
    }

    pub const fn is_remote(&self) -> bool {
        self.remote
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
