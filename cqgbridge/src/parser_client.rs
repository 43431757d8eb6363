// cqgbridge/src/parser_client.rs
// Session-level messages: logon result and logoff acknowledgement.

use std::sync::Arc;
use crate::handler::SessionHandler;
use crate::protocol::{LoggedOff, LogonResult};

/// Process a logon result.
pub fn process_logon_result(handler: &Arc<dyn SessionHandler>, result: &LogonResult) {
  let result_code = result.result_code.unwrap_or(0);
  let text_message = result.text_message.as_deref().unwrap_or("");
  let base_time = result.base_time.as_deref().unwrap_or("");
  log::debug!("Logon result: code={}, base_time='{}', text='{}'", result_code, base_time, text_message);
  handler.logon_result(result_code, text_message, base_time);
}

/// Process a logoff acknowledgement.
pub fn process_logged_off(handler: &Arc<dyn SessionHandler>, logged_off: &LoggedOff) {
  let reason = logged_off.logoff_reason.unwrap_or(0);
  let text_message = logged_off.text_message.as_deref().unwrap_or("");
  log::debug!("Logged off: reason={}, text='{}'", reason, text_message);
  handler.logged_off(reason, text_message);
}
