// ABOUTME: Durable, session-keyed append-only conversation log backed by SQLite.
// ABOUTME: Stores `lastSessionId` and `messages_<sessionId>` as key/value rows holding JSON.

use crate::message::Message;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Key holding the id of the last active session
pub const LAST_SESSION_KEY: &str = "lastSessionId";

/// Key holding a session's serialized message log
pub fn messages_key(session_id: &str) -> String {
    format!("messages_{}", session_id)
}

/// Durable key to ordered-list mapping for conversations.
///
/// `append` merges with prior content; it never overwrites.
pub trait ConversationStore: Send + Sync {
    /// Append messages to a session's log, preserving their order
    fn append(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Load a session's log; unknown sessions have an empty log
    fn load(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Create an empty log for a session without touching existing content
    fn initialize(&self, session_id: &str) -> Result<()>;

    fn last_session_id(&self) -> Result<Option<String>>;

    fn set_last_session_id(&self, session_id: &str) -> Result<()>;

    /// Purge every session and setting
    fn clear_all(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let store = Self::with_connection(conn)?;

        tracing::info!(db = %path.display(), "Conversation store initialized");
        Ok(store)
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create kv table")?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }
}

fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .with_context(|| format!("Failed to read key {}", key))
}

fn put(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value, now],
    )
    .with_context(|| format!("Failed to write key {}", key))?;
    Ok(())
}

fn decode_log(key: &str, raw: Option<String>) -> Result<Vec<Message>> {
    match raw {
        Some(json) => serde_json::from_str(&json)
            .with_context(|| format!("Stored log {} is not a valid message list", key)),
        None => Ok(Vec::new()),
    }
}

impl ConversationStore for SqliteStore {
    fn append(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let key = messages_key(session_id);
        let mut db = self.lock()?;
        let tx = db.transaction().context("Failed to begin transaction")?;

        let mut log = decode_log(&key, get(&tx, &key)?)?;
        log.extend_from_slice(messages);
        put(&tx, &key, &serde_json::to_string(&log)?)?;

        tx.commit().context("Failed to commit append")?;
        tracing::debug!(session_id = %session_id, appended = messages.len(), total = log.len(), "Messages appended");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let key = messages_key(session_id);
        let db = self.lock()?;
        decode_log(&key, get(&db, &key)?)
    }

    fn initialize(&self, session_id: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, '[]', ?2)
             ON CONFLICT(key) DO NOTHING",
            params![messages_key(session_id), chrono::Utc::now().to_rfc3339()],
        )
        .context("Failed to initialize session log")?;
        Ok(())
    }

    fn last_session_id(&self) -> Result<Option<String>> {
        let db = self.lock()?;
        get(&db, LAST_SESSION_KEY)
    }

    fn set_last_session_id(&self, session_id: &str) -> Result<()> {
        let mut db = self.lock()?;
        let tx = db.transaction().context("Failed to begin transaction")?;
        put(&tx, LAST_SESSION_KEY, session_id)?;
        tx.commit().context("Failed to commit last session id")?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let db = self.lock()?;
        let removed = db
            .execute("DELETE FROM kv", [])
            .context("Failed to clear store")?;
        tracing::info!(removed, "Conversation store cleared");
        Ok(())
    }
}
