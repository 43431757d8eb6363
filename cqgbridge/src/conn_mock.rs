// cqgbridge/src/conn_mock.rs
//
// Scripted connection. Each outgoing frame is checked against the next
// expected SEND; the RECV frames that follow it are then pumped synchronously
// through the real message parser.

use crate::base::BridgeError;
use crate::conn::Connection;
use crate::conn_log::{identify_frame, LogDirection};
use crate::handler::MessageHandler;
use crate::message_parser::process_message;
use crate::protocol::{client_msg_kind, server_msg_kind, ClientMsg, ServerMsg};

use parking_lot::Mutex;
use prost::Message;
use rusqlite::{params, Connection as DbConnection};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// One step of a scripted exchange.
#[derive(Debug, Clone)]
pub enum MockMessage {
  /// Expect exactly this client message.
  Send(ClientMsg),
  /// Expect a client message of this kind (see `protocol::client_msg_kind`),
  /// content unchecked.
  SendKind(&'static str),
  Recv(ServerMsg),
  /// Deliver raw bytes, e.g. a corrupt frame.
  RecvRaw(Vec<u8>),
}

#[derive(Debug, Clone)]
struct LoggedMessage {
  direction: LogDirection,
  message_type_name: Option<String>,
  payload_bytes: Vec<u8>,
  kind_only: bool,
}

impl From<MockMessage> for LoggedMessage {
  fn from(m: MockMessage) -> Self {
    match m {
      MockMessage::Send(msg) => LoggedMessage {
        direction: LogDirection::Send,
        message_type_name: Some(client_msg_kind(&msg).to_string()),
        payload_bytes: msg.encode_to_vec(),
        kind_only: false,
      },
      MockMessage::SendKind(kind) => LoggedMessage {
        direction: LogDirection::Send,
        message_type_name: Some(kind.to_string()),
        payload_bytes: Vec::new(),
        kind_only: true,
      },
      MockMessage::Recv(msg) => LoggedMessage {
        direction: LogDirection::Recv,
        message_type_name: Some(server_msg_kind(&msg).to_string()),
        payload_bytes: msg.encode_to_vec(),
        kind_only: false,
      },
      MockMessage::RecvRaw(bytes) => LoggedMessage {
        direction: LogDirection::Recv,
        message_type_name: None,
        payload_bytes: bytes,
        kind_only: false,
      },
    }
  }
}

struct MockConnectionState {
  logged_messages: Vec<LoggedMessage>,
  message_iter_index: usize,
  handler: Option<MessageHandler>,
  connected: bool,
  close_at_end: bool,
}

/// Clones share the same script position.
#[derive(Clone)]
pub struct MockConnection {
  inner: Arc<Mutex<MockConnectionState>>,
}

impl MockConnection {
  fn from_logged(logged_messages: Vec<LoggedMessage>) -> Self {
    MockConnection {
      inner: Arc::new(Mutex::new(MockConnectionState {
        logged_messages,
        message_iter_index: 0,
        handler: None,
        connected: true,
        close_at_end: false,
      })),
    }
  }

  pub fn new(script: Vec<MockMessage>) -> Self {
    Self::from_logged(script.into_iter().map(LoggedMessage::from).collect())
  }

  /// Replay a session recorded by `ConnectionLogger`.
  pub fn from_db<P: AsRef<Path>>(db_path: P, session_name: &str) -> Result<Self, BridgeError> {
    log::info!("Creating MockConnection for session '{}' from DB: {:?}", session_name, db_path.as_ref());
    let db = DbConnection::open(db_path)
      .map_err(|e| BridgeError::ConfigurationError(format!("Mock: Failed to open logger DB: {}", e)))?;

    let session_id: i64 = db.query_row(
      "SELECT id FROM sessions WHERE session_name = ?1",
      params![session_name],
      |row| row.get(0),
    ).map_err(|e| match e {
      rusqlite::Error::QueryReturnedNoRows =>
        BridgeError::ConfigurationError(format!("Mock: Log session '{}' not found in database.", session_name)),
      _ => BridgeError::PersistenceError(format!("Mock: Failed to query session '{}': {}", session_name, e)),
    })?;

    let mut stmt = db.prepare(
      "SELECT direction, message_type_name, payload FROM session_messages WHERE session_id = ?1 ORDER BY id ASC"
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
      let direction: String = row.get(0)?;
      Ok((direction, row.get::<_, Option<String>>(1)?, row.get::<_, Vec<u8>>(2)?))
    })?;
    let mut logged_messages = Vec::new();
    for row in rows {
      let (direction, message_type_name, payload_bytes) = row?;
      logged_messages.push(LoggedMessage {
        direction: LogDirection::from_str(&direction)?,
        message_type_name,
        payload_bytes,
        kind_only: false,
      });
    }
    log::info!("Mock: Loaded {} messages for session '{}'", logged_messages.len(), session_name);
    Ok(Self::from_logged(logged_messages))
  }

  /// Report the connection as closed once the script runs out.
  pub fn with_close_at_end(self, close: bool) -> Self {
    self.inner.lock().close_at_end = close;
    self
  }

  /// Script entries not yet consumed.
  pub fn remaining_messages(&self) -> usize {
    let state = self.inner.lock();
    state.logged_messages.len() - state.message_iter_index
  }

  fn close_locked(state: &mut MockConnectionState) {
    if !state.connected { return; }
    state.connected = false;
    if let Some(handler) = state.handler.clone() {
      handler.connection_closed();
    }
  }

  /// Pump RECV entries until the next SEND or the end of the script.
  fn pump_recv_messages(state: &mut MockConnectionState) {
    let handler = match &state.handler {
      Some(h) => h.clone(),
      None => {
        log::trace!("Mock: Cannot pump, no handler set.");
        return;
      }
    };
    while state.message_iter_index < state.logged_messages.len() {
      let index = state.message_iter_index;
      let next = &state.logged_messages[index];
      if next.direction == LogDirection::Send {
        log::trace!("Mock: Found SEND message #{}. Stopping pump.", index + 1);
        return;
      }
      log::debug!("Mock: Processing RECV message #{}: Type={}",
                  index + 1, next.message_type_name.as_deref().unwrap_or("UNKNOWN"));
      let payload = next.payload_bytes.clone();
      state.message_iter_index += 1;
      if let Err(e) = process_message(&handler, &payload) {
        log::warn!("Mock: Dropping RECV message #{}: {}", index + 1, e);
      }
    }
    if state.close_at_end {
      log::debug!("Mock: Script exhausted, closing.");
      Self::close_locked(state);
    }
  }

  fn verify_send(expected: &LoggedMessage, data: &[u8]) -> Result<(), BridgeError> {
    let actual_kind = identify_frame(LogDirection::Send, data);
    if expected.kind_only {
      return match (expected.message_type_name.as_deref(), actual_kind) {
        (Some(want), Some(got)) if want == got => Ok(()),
        (want, got) => Err(BridgeError::InternalError(format!(
          "Mock: Expected SEND of kind {:?}, got {:?}", want, got))),
      };
    }
    let actual = ClientMsg::decode(data)
      .map_err(|e| BridgeError::InternalError(format!("Mock: Sent frame does not decode: {}", e)))?;
    let wanted = ClientMsg::decode(expected.payload_bytes.as_slice())
      .map_err(|e| BridgeError::InternalError(format!("Mock: Scripted frame does not decode: {}", e)))?;
    if actual != wanted {
      return Err(BridgeError::InternalError(format!(
        "Mock: SEND mismatch.\n  expected: {:?}\n  actual:   {:?}", wanted, actual)));
    }
    Ok(())
  }
}

impl Connection for MockConnection {
  fn is_connected(&self) -> bool {
    self.inner.lock().connected
  }

  fn disconnect(&mut self) -> Result<(), BridgeError> {
    let mut state = self.inner.lock();
    if state.connected {
      log::debug!("Mock: Disconnect with {} script entries left.",
                  state.logged_messages.len() - state.message_iter_index);
    }
    Self::close_locked(&mut state);
    Ok(())
  }

  fn send_message_body(&mut self, data: &[u8]) -> Result<(), BridgeError> {
    let mut state = self.inner.lock();
    if !state.connected {
      return Err(BridgeError::NotConnected);
    }
    let index = state.message_iter_index;
    let expected = state.logged_messages.get(index).cloned().ok_or_else(|| {
      BridgeError::InternalError(format!("Mock: Unexpected SEND after end of script: {:?}",
                                         identify_frame(LogDirection::Send, data)))
    })?;
    if expected.direction != LogDirection::Send {
      return Err(BridgeError::InternalError(format!(
        "Mock: Expected RECV #{} to be pending, got a SEND", index + 1)));
    }
    Self::verify_send(&expected, data)?;
    log::debug!("Mock: Matched SEND message #{}: Type={}",
                index + 1, expected.message_type_name.as_deref().unwrap_or("UNKNOWN"));
    state.message_iter_index += 1;
    Self::pump_recv_messages(&mut state);
    Ok(())
  }

  fn set_message_handler(&mut self, handler: MessageHandler) {
    let mut state = self.inner.lock();
    state.handler = Some(handler);
    Self::pump_recv_messages(&mut state);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_log::ConnectionLogger;
  use crate::protocol::{Logoff, LoggedOff};

  fn logoff() -> ClientMsg {
    ClientMsg { logoff: Some(Logoff { text_message: Some("logoff".into()) }), ..Default::default() }
  }

  #[test]
  fn send_mismatch_is_reported() {
    let mut mock = MockConnection::new(vec![MockMessage::SendKind("LOGON")]);
    let err = mock.send_message_body(&logoff().encode_to_vec()).unwrap_err();
    assert!(matches!(err, BridgeError::InternalError(_)));
  }

  #[test]
  fn replays_recorded_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.db");
    let logger = ConnectionLogger::new(&path, "replay", "ws://x/").unwrap();
    let ack = ServerMsg { logged_off: Some(LoggedOff::default()), ..Default::default() };
    logger.log_message(LogDirection::Send, &logoff().encode_to_vec());
    logger.log_message(LogDirection::Recv, &ack.encode_to_vec());
    drop(logger);

    let mut mock = MockConnection::from_db(&path, "replay").unwrap();
    assert_eq!(mock.remaining_messages(), 2);
    mock.send_message_body(&logoff().encode_to_vec()).unwrap();
    // No handler installed: the RECV stays queued.
    assert_eq!(mock.remaining_messages(), 1);
  }

  #[test]
  fn unknown_session_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.db");
    let _logger = ConnectionLogger::new(&path, "a", "ws://x/").unwrap();
    assert!(matches!(MockConnection::from_db(&path, "b"), Err(BridgeError::ConfigurationError(_))));
  }
}
