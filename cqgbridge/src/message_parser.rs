// cqgbridge/src/message_parser.rs
//
// Decode server frames and dispatch to the appropriate handler.
use crate::handler::MessageHandler;
use crate::base::BridgeError;
use crate::protocol::{server_msg_kind, ServerMsg};
use prost::Message;

use crate::parser_client::*;
use crate::parser_data_ref::*;
use crate::parser_data_market::*;

/// Decode one binary frame. Failure affects only this frame.
pub fn decode_server_msg(data: &[u8]) -> Result<ServerMsg, BridgeError> {
  ServerMsg::decode(data).map_err(|e| {
    BridgeError::DecodeError(format!("ServerMsg ({} bytes): {}", data.len(), e))
  })
}

/// Route every part of a decoded server message. A single message may carry
/// several concerns at once; each goes to its own handler.
pub fn dispatch_message(handler: &MessageHandler, msg: &ServerMsg) {
  log::trace!("Dispatching {}", server_msg_kind(msg));
  if let Some(result) = &msg.logon_result {
    process_logon_result(&handler.session, result);
  }
  if let Some(logged_off) = &msg.logged_off {
    process_logged_off(&handler.session, logged_off);
  }
  if !msg.information_reports.is_empty() {
    process_information_reports(&handler.data_ref, &msg.information_reports);
  }
  for data in &msg.real_time_market_data {
    process_real_time_market_data(&handler.data_market, data);
  }
  for report in &msg.time_bar_reports {
    process_time_bar_report(&handler.data_market, report);
  }
}

/// Process a raw frame. This is the entry point for message handling.
pub fn process_message(handler: &MessageHandler, data: &[u8]) -> Result<(), BridgeError> {
  let msg = decode_server_msg(data)?;
  dispatch_message(handler, &msg);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn malformed_frame_is_decode_error() {
    let err = decode_server_msg(&[0x0a, 0xff, 0xff, 0xff]).unwrap_err();
    assert!(matches!(err, BridgeError::DecodeError(_)));
  }

  #[test]
  fn empty_frame_decodes_to_empty_message() {
    let msg = decode_server_msg(&[]).unwrap();
    assert_eq!(server_msg_kind(&msg), "UNKNOWN");
  }
}
