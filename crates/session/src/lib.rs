//! Append-only session persistence.
//!
//! Two SQLite tables: ledger messages (so a session can be rehydrated) and
//! raw engine events keyed by turn (so a front-end can replay a turn's
//! activity). Rows are never updated or deleted; replay order is insertion
//! order.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use turnstile_core::{EngineEvent, Message};

pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("failed to open session database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %path.as_ref().display(), "session store opened");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("session store poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_turn ON events(turn_id);",
        )?;
        Ok(())
    }

    pub fn append_message(&self, session_id: Uuid, message: &Message) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let conn = self.conn.lock().expect("session store poisoned");
        conn.execute(
            "INSERT INTO messages (session_id, created_at, body) VALUES (?1, ?2, ?3)",
            params![
                session_id.to_string(),
                Utc::now().to_rfc3339(),
                body
            ],
        )?;
        Ok(())
    }

    pub fn append_event(&self, session_id: Uuid, turn_id: Uuid, event: &EngineEvent) -> Result<()> {
        let body = serde_json::to_string(event)?;
        let conn = self.conn.lock().expect("session store poisoned");
        conn.execute(
            "INSERT INTO events (session_id, turn_id, created_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id.to_string(),
                turn_id.to_string(),
                Utc::now().to_rfc3339(),
                body
            ],
        )?;
        Ok(())
    }

    /// Ledger messages for a session, in append order.
    pub fn load_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let conn = self.conn.lock().expect("session store poisoned");
        let mut stmt = conn.prepare(
            "SELECT body FROM messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .filter_map(|r| r.ok())
            .filter_map(|body| serde_json::from_str(&body).ok())
            .collect();
        Ok(rows)
    }

    /// Raw events for a turn, in emission order, for replay.
    pub fn load_events(&self, turn_id: Uuid) -> Result<Vec<EngineEvent>> {
        let conn = self.conn.lock().expect("session store poisoned");
        let mut stmt =
            conn.prepare("SELECT body FROM events WHERE turn_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![turn_id.to_string()], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|body| serde_json::from_str(&body).ok())
            .collect();
        Ok(rows)
    }

    pub fn message_count(&self, session_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock().expect("session store poisoned");
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
