// cqgbridge/src/base.rs
// Base error definitions for the bridge

use thiserror::Error;

/// Errors that can occur while talking to the backend or relaying to a client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  /// Transport failure: dial, handshake, write, or a read that ended the stream.
  #[error("Connection error: {0}")]
  ConnectionError(String),

  #[error("Not connected to backend")]
  NotConnected,

  /// Logon rejected by the backend. Carries the backend result code and text.
  #[error("Authentication failed: code={0}, msg={1}")]
  AuthError(u32, String),

  /// Backend answered with something structurally unexpected.
  #[error("Protocol error: {0}")]
  ProtocolError(String),

  /// A single frame could not be decoded. Never fatal to the read loop.
  #[error("Decode error: {0}")]
  DecodeError(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  #[error("Persistence error: {0}")]
  PersistenceError(String),

  #[error("Already running: {0}")]
  AlreadyRunning(String),

  #[error("Internal error: {0}")]
  InternalError(String),
}

impl From<prost::DecodeError> for BridgeError {
  fn from(e: prost::DecodeError) -> Self {
    BridgeError::DecodeError(e.to_string())
  }
}

impl From<rusqlite::Error> for BridgeError {
  fn from(e: rusqlite::Error) -> Self {
    BridgeError::PersistenceError(e.to_string())
  }
}
