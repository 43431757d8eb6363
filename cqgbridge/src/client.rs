// cqgbridge/src/client.rs
use crate::base::BridgeError;
use crate::config::BridgeConfig;
use crate::conn::{Connection, MessageBroker, WsConnection};
use crate::conn_log::ConnectionLogger;
use crate::conn_mock::MockConnection;
use crate::contract::ContractCache;
use crate::data_market_manager::DataMarketManager;
use crate::data_ref_manager::DataRefManager;
use crate::handler::MessageHandler;
use crate::session_manager::SessionManager;
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// One backend connection with its session, reference-data and market-data
/// managers wired to the reader.
pub struct BridgeClient {
  message_broker: Arc<MessageBroker>,
  session_mgr: Arc<SessionManager>,
  data_ref_mgr: Arc<DataRefManager>,
  data_market_mgr: Arc<DataMarketManager>,
}

impl BridgeClient {
  /// Dials the configured endpoint. When a frame log is configured, every
  /// frame is recorded under its session name (a fresh UUID if none given).
  pub fn connect(config: &BridgeConfig, cache: Arc<ContractCache>) -> Result<Self, BridgeError> {
    config.validate()?;
    let logger = match &config.frame_log {
      Some(frame_log) => {
        let session_name = frame_log.session_name.clone()
          .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("Recording frames to {:?} as session '{}'", frame_log.db_path, session_name);
        Some(ConnectionLogger::new(&frame_log.db_path, &session_name, &config.endpoint)?)
      }
      None => None,
    };
    let conn = Box::new(WsConnection::connect(&config.endpoint, logger.clone())?);
    Ok(Self::from_connection(conn, logger, Some(cache)))
  }

  /// Replays a recorded session.
  pub fn from_db(db_path: &str, session_name: &str) -> Result<Self, BridgeError> {
    let conn = MockConnection::from_db(db_path, session_name)?.with_close_at_end(true);
    Ok(Self::from_connection(Box::new(conn), None, None))
  }

  /// Builds the client over any connection. The handler is installed last,
  /// so frames are only dispatched once every manager exists.
  pub fn from_connection(
    conn: Box<dyn Connection>,
    logger: Option<ConnectionLogger>,
    cache: Option<Arc<ContractCache>>,
  ) -> Self {
    let cache = cache.unwrap_or_else(|| Arc::new(ContractCache::new()));
    let message_broker = Arc::new(MessageBroker::new(conn, logger));
    let session_mgr = SessionManager::new(message_broker.clone());
    let data_ref_mgr = DataRefManager::new(message_broker.clone(), cache);
    let data_market_mgr = DataMarketManager::new(message_broker.clone());
    let msg_handler = MessageHandler::new(session_mgr.clone(), data_ref_mgr.clone(), data_market_mgr.clone());
    message_broker.set_message_handler(msg_handler);
    BridgeClient { message_broker, session_mgr, data_ref_mgr, data_market_mgr }
  }

  pub fn session(&self) -> Arc<SessionManager> {
    self.session_mgr.clone()
  }

  pub fn data_ref(&self) -> Arc<DataRefManager> {
    self.data_ref_mgr.clone()
  }

  pub fn data_market(&self) -> Arc<DataMarketManager> {
    self.data_market_mgr.clone()
  }

  pub fn next_request_id(&self) -> u32 {
    self.message_broker.next_request_id()
  }

  pub fn is_connected(&self) -> bool {
    self.message_broker.is_connected()
  }

  /// Closes the backend connection. Safe to call more than once.
  pub fn close(&self) -> Result<(), BridgeError> {
    self.message_broker.disconnect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn_log::LogDirection;
  use crate::conn_mock::MockMessage;
  use crate::session_manager::SessionState;
  use prost::Message;
  use crate::test_support::*;

  #[test]
  fn close_ends_session_and_is_idempotent() {
    let client = BridgeClient::from_connection(
      Box::new(MockConnection::new(vec![MockMessage::Send(logon_msg()), MockMessage::Recv(logon_ok())])), None, None);
    client.session().logon(&creds()).unwrap();
    assert!(client.is_connected());
    client.close().unwrap();
    client.close().unwrap();
    assert!(!client.is_connected());
    assert_eq!(client.session().state(), SessionState::Closed);
  }

  #[test]
  fn request_ids_start_at_one() {
    let client = BridgeClient::from_connection(Box::new(MockConnection::new(vec![])), None, None);
    assert_eq!(client.next_request_id(), 1);
    assert_eq!(client.data_market().next_request_id(), 2);
  }

  #[test]
  fn replays_frame_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.db");
    {
      let logger = ConnectionLogger::new(&path, "logon", "ws://x/").unwrap();
      let conn = MockConnection::new(vec![MockMessage::Send(logon_msg()), MockMessage::Recv(logon_ok())]);
      let client = BridgeClient::from_connection(Box::new(conn), Some(logger.clone()), None);
      client.session().logon(&creds()).unwrap();
      // The socket reader records RECV frames; the mock does not.
      logger.log_message(LogDirection::Recv, &logon_ok().encode_to_vec());
    }
    let replay = BridgeClient::from_db(path.to_str().unwrap(), "logon").unwrap();
    assert_eq!(replay.session().logon(&creds()).unwrap(), BASE_TIME_MS);
  }
}
