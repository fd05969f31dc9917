use crate::error::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Shared handle to the SQLite store. Opened once at startup, cloned into
/// handlers through the router state, and closed on shutdown.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Closes the underlying connection. Other live clones keep it open; in
    /// that case the handle is only dropped.
    pub async fn close(self) -> Result<(), StoreError> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                mutex.into_inner().close().map_err(|(_, e)| StoreError::from(e))?;
                info!("database closed");
                Ok(())
            }
            Err(shared) => {
                warn!(
                    handles = Arc::strong_count(&shared),
                    "database still shared at close, dropping handle"
                );
                Ok(())
            }
        }
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS campgrounds (
            id TEXT PRIMARY KEY,
            author_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            location TEXT NOT NULL,
            price REAL NOT NULL,
            longitude REAL NOT NULL,
            latitude REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (author_id) REFERENCES users (id)
        )",
        [],
    )?;

    // Images are embedded in their campground and go with it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS campground_images (
            campground_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            filename TEXT NOT NULL,
            PRIMARY KEY (campground_id, position),
            FOREIGN KEY (campground_id) REFERENCES campgrounds (id) ON DELETE CASCADE
        )",
        [],
    )?;

    // Review removal on campground delete is explicit, see
    // store::delete_campground_cascade. The constraint is only checked at
    // commit so both deletes can run in one transaction.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reviews (
            id TEXT PRIMARY KEY,
            campground_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (campground_id) REFERENCES campgrounds (id) DEFERRABLE INITIALLY DEFERRED,
            FOREIGN KEY (author_id) REFERENCES users (id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_tokens (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )",
        [],
    )?;

    debug!("schema ready");
    Ok(())
}
