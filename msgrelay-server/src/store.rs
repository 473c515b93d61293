//! Persistence gateway for relayed messages.
//!
//! [`MessageStore`] is the narrow append/query contract the session loop and
//! the history handler depend on. Two backends implement it:
//!
//! - [`MemoryStore`]: a process-local `Vec` behind a [`RwLock`], used by
//!   tests and by `memory:` store URLs.
//! - [`SqliteStore`]: a `SQLite` table accessed through `rusqlite` on the
//!   blocking thread pool.
//!
//! [`AnyStore`] picks one of them from the configured store URL. Both
//! backends return query results in insertion order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use msgrelay_proto::Message;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use tokio::sync::RwLock;

/// Default bound on a single store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by the persistence gateway.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The operation did not finish within the caller-supplied bound.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The `SQLite` backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Preparing the database location failed.
    #[error("failed to prepare store path {path}: {source}")]
    Io {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The store URL names a backend this build does not know.
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    /// The backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only message persistence with receiver lookups.
///
/// Implementations must be safe to call concurrently from any number of
/// session and request tasks.
pub trait MessageStore: Send + Sync + 'static {
    /// Persists one message. The store takes its own copy.
    fn append(&self, message: Message) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns up to `limit` messages whose receiver equals `receiver`
    /// exactly, in the store's natural order.
    fn query_by_receiver(
        &self,
        receiver: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;
}

/// Runs a store operation, failing with [`StoreError::Timeout`] if it does
/// not complete within `timeout`.
///
/// # Errors
///
/// Returns the operation's own error, or `StoreError::Timeout`.
pub async fn with_timeout<T>(
    timeout: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(timeout, op)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory message log.
///
/// Thread-safe via [`RwLock`]. Messages are kept in insertion order for the
/// lifetime of the store.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of persisted messages.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Returns `true` if nothing has been persisted.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// Returns a copy of every persisted message in insertion order.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

impl MessageStore for MemoryStore {
    async fn append(&self, message: Message) -> Result<(), StoreError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn query_by_receiver(
        &self,
        receiver: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| m.receiver == receiver)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    content     TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages (receiver_id, id);
";

/// `SQLite`-backed message log.
///
/// The connection is shared behind a mutex and only touched from
/// [`tokio::task::spawn_blocking`], so async callers never block a runtime
/// worker on disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file, creating parent directories and
    /// the `messages` table as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the parent directory cannot be created,
    /// or [`StoreError::Sqlite`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&*conn)
        })
        .await?;
        Ok(result?)
    }
}

impl MessageStore for SqliteStore {
    async fn append(&self, message: Message) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.sender,
                    message.receiver,
                    message.content,
                    message
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn query_by_receiver(
        &self,
        receiver: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let receiver = receiver.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT sender_id, receiver_id, content, timestamp FROM messages \
                 WHERE receiver_id = ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![receiver, limit], row_to_message)?;
            rows.collect()
        })
        .await
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let raw: String = row.get(3)?;
    let timestamp = DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    Ok(Message {
        sender: row.get(0)?,
        receiver: row.get(1)?,
        content: row.get(2)?,
        timestamp,
    })
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// A store backend chosen at startup from a URL.
///
/// Supported forms:
/// - `memory:` for [`MemoryStore`]
/// - `sqlite::memory:` for an in-memory [`SqliteStore`]
/// - `sqlite://<path>` (or `sqlite:<path>`) for a file-backed [`SqliteStore`]
pub enum AnyStore {
    /// Process-local store.
    Memory(MemoryStore),
    /// `SQLite` database.
    Sqlite(SqliteStore),
}

impl AnyStore {
    /// Opens the backend named by `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedUrl`] for unknown schemes, or the
    /// backend's error if it cannot be opened.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let url = url.trim();
        if url == "memory:" {
            return Ok(Self::Memory(MemoryStore::new()));
        }
        if url == "sqlite::memory:" {
            return Ok(Self::Sqlite(SqliteStore::open_in_memory()?));
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))?;
        Ok(Self::Sqlite(SqliteStore::open(Path::new(path))?))
    }

    /// Short backend name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

impl MessageStore for AnyStore {
    async fn append(&self, message: Message) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.append(message).await,
            Self::Sqlite(store) => store.append(message).await,
        }
    }

    async fn query_by_receiver(
        &self,
        receiver: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        match self {
            Self::Memory(store) => store.query_by_receiver(receiver, limit).await,
            Self::Sqlite(store) => store.query_by_receiver(receiver, limit).await,
        }
    }
}
