// cqgbridge/src/conn_log.rs
//
// Records every frame exchanged with the backend into SQLite, so a session can
// be replayed later through `MockConnection::from_db`.

use crate::base::BridgeError;
use crate::protocol::{client_msg_kind, server_msg_kind, ClientMsg, ServerMsg};

use parking_lot::Mutex;
use prost::Message;
use rusqlite::{params, Connection as DbConnection};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
  Send,
  Recv,
}

impl fmt::Display for LogDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogDirection::Send => write!(f, "SEND"),
      LogDirection::Recv => write!(f, "RECV"),
    }
  }
}

impl FromStr for LogDirection {
  type Err = BridgeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "SEND" => Ok(LogDirection::Send),
      "RECV" => Ok(LogDirection::Recv),
      _ => Err(BridgeError::ConfigurationError(format!("Invalid LogDirection string in log: {}", s))),
    }
  }
}

/// Kind name for a frame, or `None` if it does not decode.
pub fn identify_frame(direction: LogDirection, payload: &[u8]) -> Option<&'static str> {
  match direction {
    LogDirection::Send => ClientMsg::decode(payload).ok().map(|m| client_msg_kind(&m)),
    LogDirection::Recv => ServerMsg::decode(payload).ok().map(|m| server_msg_kind(&m)),
  }
}

struct ConnectionLoggerInner {
  db: DbConnection,
  session_id: i64,
  start_time_instant: Instant,
}

/// Clones share one database handle.
#[derive(Clone)]
pub struct ConnectionLogger {
  inner: Arc<Mutex<ConnectionLoggerInner>>,
}

impl ConnectionLogger {
  /// Opens (or creates) the log database and starts a fresh session record,
  /// replacing any previous session with the same name.
  pub fn new<P: AsRef<Path>>(db_path: P, session_name: &str, endpoint: &str) -> Result<Self, BridgeError> {
    log::info!("Initializing frame logger at {:?}, session '{}'", db_path.as_ref(), session_name);
    let mut db = DbConnection::open(db_path)
      .map_err(|e| BridgeError::ConfigurationError(format!("Failed to open logger database: {}", e)))?;
    db.pragma_update(None, "journal_mode", "WAL")
      .map_err(|e| BridgeError::ConfigurationError(format!("Failed to set WAL mode: {}", e)))?;
    db.execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| BridgeError::ConfigurationError(format!("Failed to enable foreign keys: {}", e)))?;
    Self::create_tables(&db)?;

    let start_time_unix_ms = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_err(|e| BridgeError::InternalError(format!("System time error: {}", e)))?
      .as_millis() as i64;
    let session_id = Self::replace_session(&mut db, session_name, endpoint, start_time_unix_ms)?;
    log::info!("Started logger session ID {} for '{}'", session_id, session_name);

    Ok(Self {
      inner: Arc::new(Mutex::new(ConnectionLoggerInner {
        db,
        session_id,
        start_time_instant: Instant::now(),
      })),
    })
  }

  fn create_tables(db: &DbConnection) -> Result<(), BridgeError> {
    db.execute_batch(
      "BEGIN;
       CREATE TABLE IF NOT EXISTS sessions (
           id                  INTEGER PRIMARY KEY AUTOINCREMENT,
           session_name        TEXT NOT NULL UNIQUE,
           endpoint            TEXT NOT NULL,
           created_at          INTEGER NOT NULL
       );
       CREATE TABLE IF NOT EXISTS session_messages (
           id                    INTEGER PRIMARY KEY AUTOINCREMENT,
           session_id            INTEGER NOT NULL,
           direction             TEXT NOT NULL CHECK(direction IN ('SEND', 'RECV')),
           relative_timestamp_ms REAL NOT NULL,
           message_type_name     TEXT NULL,
           payload               BLOB NOT NULL,
           FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
       );
       CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages (session_id, id);
       COMMIT;"
    ).map_err(|e| BridgeError::ConfigurationError(format!("Failed to create logger tables: {}", e)))?;
    Ok(())
  }

  fn replace_session(db: &mut DbConnection, session_name: &str, endpoint: &str, created_at: i64) -> Result<i64, BridgeError> {
    let tx = db.transaction()?;
    let deleted = tx.execute("DELETE FROM sessions WHERE session_name = ?1", params![session_name])?;
    if deleted > 0 {
      log::warn!("Deleted {} previous log session(s) named '{}'", deleted, session_name);
    }
    tx.execute(
      "INSERT INTO sessions (session_name, endpoint, created_at) VALUES (?1, ?2, ?3)",
      params![session_name, endpoint, created_at],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(id)
  }

  /// Logs a single frame. Failures are reported and swallowed.
  pub fn log_message(&self, direction: LogDirection, payload: &[u8]) {
    let message_type_name = identify_frame(direction, payload);
    let guard = self.inner.lock();
    let relative_ms = guard.start_time_instant.elapsed().as_secs_f64() * 1000.0;
    match guard.db.execute(
      "INSERT INTO session_messages (session_id, direction, relative_timestamp_ms, message_type_name, payload)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![guard.session_id, direction.to_string(), relative_ms, message_type_name, payload],
    ) {
      Ok(_) => log::trace!("Logged {} frame: Type={}, RelTime={:.3}ms, Size={}",
                           direction, message_type_name.unwrap_or("UNKNOWN"), relative_ms, payload.len()),
      Err(e) => log::error!("Failed to log frame to database: {}", e),
    }
  }
}
