// cqgbridge/src/session_manager.rs
//
// Logon / logoff exchange and the session time base.

use crate::base::BridgeError;
use crate::config::Credentials;
use crate::conn::MessageBroker;
use crate::handler::SessionHandler;
use crate::protocol_encoder::Encoder;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Wire format of the logon base time. Always UTC.
pub const BASE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  /// Transport up, not logged on.
  Disconnected,
  Authenticated,
  Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogonOutcome {
  result_code: u32,
  text_message: String,
  base_time: String,
}

#[derive(Debug)]
struct SessionInner {
  state: SessionState,
  base_time_offset_ms: Option<i64>,
  logon_pending: bool,
  logon_result: Option<LogonOutcome>,
  logoff_pending: bool,
  logoff_acked: bool,
  connection_closed: bool,
}

/// Parses the logon base time into epoch milliseconds.
pub fn parse_base_time(base_time: &str) -> Result<i64, BridgeError> {
  if base_time.is_empty() {
    return Err(BridgeError::ProtocolError("Logon result carries no base time".to_string()));
  }
  let parsed = NaiveDateTime::parse_from_str(base_time, BASE_TIME_FORMAT)
    .map_err(|e| BridgeError::ProtocolError(format!("Unparseable base time '{}': {}", base_time, e)))?;
  Ok(parsed.and_utc().timestamp_millis())
}

pub struct SessionManager {
  message_broker: Arc<MessageBroker>,
  inner: Mutex<SessionInner>,
  cond: Condvar,
}

impl SessionManager {
  pub(crate) fn new(message_broker: Arc<MessageBroker>) -> Arc<Self> {
    Arc::new(SessionManager {
      message_broker,
      inner: Mutex::new(SessionInner {
        state: SessionState::Disconnected,
        base_time_offset_ms: None,
        logon_pending: false,
        logon_result: None,
        logoff_pending: false,
        logoff_acked: false,
        connection_closed: false,
      }),
      cond: Condvar::new(),
    })
  }

  pub fn state(&self) -> SessionState {
    self.inner.lock().state
  }

  /// Epoch milliseconds of the backend base time; `None` before logon.
  pub fn base_time_offset_ms(&self) -> Option<i64> {
    self.inner.lock().base_time_offset_ms
  }

  /// Logs on and blocks for the result. Returns the base time offset.
  ///
  /// Fails with `InvalidArgument` for empty credentials, `AuthError` when the
  /// backend rejects the logon, and `ProtocolError` when the base time is
  /// missing or malformed.
  pub fn logon(&self, credentials: &Credentials) -> Result<i64, BridgeError> {
    credentials.validate()?;
    info!("Logging on as '{}' (app {} {})", credentials.username, credentials.client_app_id, credentials.client_version);
    let request = Encoder::new().encode_logon(credentials)?;

    {
      let mut inner = self.inner.lock();
      if inner.connection_closed {
        return Err(BridgeError::NotConnected);
      }
      if inner.logon_pending {
        return Err(BridgeError::AlreadyRunning("logon already in progress".to_string()));
      }
      inner.logon_pending = true;
      inner.logon_result = None;
    }

    if let Err(e) = self.message_broker.send_message(&request) {
      self.inner.lock().logon_pending = false;
      return Err(e);
    }

    let outcome = {
      let mut inner = self.inner.lock();
      loop {
        if let Some(outcome) = inner.logon_result.take() {
          inner.logon_pending = false;
          break outcome;
        }
        if inner.connection_closed {
          inner.logon_pending = false;
          return Err(BridgeError::ConnectionError("Connection closed while waiting for logon result".to_string()));
        }
        self.cond.wait(&mut inner);
      }
    };

    if outcome.result_code != 0 {
      warn!("Logon rejected: code={}, msg='{}'", outcome.result_code, outcome.text_message);
      return Err(BridgeError::AuthError(outcome.result_code, outcome.text_message));
    }
    let offset = parse_base_time(&outcome.base_time)?;

    let mut inner = self.inner.lock();
    inner.state = SessionState::Authenticated;
    inner.base_time_offset_ms = Some(offset);
    info!("Logon successful, base time {} ({} ms)", outcome.base_time, offset);
    Ok(offset)
  }

  /// Sends a logoff notice and waits for the acknowledgement, whatever it says.
  pub fn logoff(&self) -> Result<(), BridgeError> {
    info!("Logging off");
    let request = Encoder::new().encode_logoff()?;
    {
      let mut inner = self.inner.lock();
      if inner.connection_closed {
        return Err(BridgeError::NotConnected);
      }
      inner.logoff_pending = true;
      inner.logoff_acked = false;
    }

    if let Err(e) = self.message_broker.send_message(&request) {
      self.inner.lock().logoff_pending = false;
      return Err(e);
    }

    let mut inner = self.inner.lock();
    loop {
      if inner.logoff_acked {
        inner.logoff_pending = false;
        inner.state = SessionState::Closed;
        info!("Logoff acknowledged");
        return Ok(());
      }
      if inner.connection_closed {
        inner.logoff_pending = false;
        return Err(BridgeError::ConnectionError("Connection closed while waiting for logoff acknowledgement".to_string()));
      }
      self.cond.wait(&mut inner);
    }
  }
}

impl SessionHandler for SessionManager {
  fn logon_result(&self, result_code: u32, text_message: &str, base_time: &str) {
    let mut inner = self.inner.lock();
    if !inner.logon_pending {
      warn!("Ignoring unsolicited logon result (code {})", result_code);
      return;
    }
    inner.logon_result = Some(LogonOutcome {
      result_code,
      text_message: text_message.to_string(),
      base_time: base_time.to_string(),
    });
    self.cond.notify_all();
  }

  fn logged_off(&self, logoff_reason: u32, text_message: &str) {
    let mut inner = self.inner.lock();
    if inner.logoff_pending {
      inner.logoff_acked = true;
    } else {
      warn!("Backend ended the session: reason={}, msg='{}'", logoff_reason, text_message);
      inner.state = SessionState::Closed;
    }
    self.cond.notify_all();
  }

  fn connection_closed(&self) {
    debug!("Session manager: connection closed");
    let mut inner = self.inner.lock();
    inner.connection_closed = true;
    inner.state = SessionState::Closed;
    self.cond.notify_all();
  }
}
