// cqgbridge/src/protocol_encoder.rs
// Encoder for outgoing backend messages

use crate::base::BridgeError;
use crate::config::Credentials;
use crate::historical_range::BarWindow;
use crate::protocol::{
  ClientMsg, InformationRequest, Logoff, Logon, MarketDataSubscription, SymbolResolutionRequest,
  TimeBarParameters, TimeBarRequest,
};
use log::debug;
use prost::Message;

/// Time-bar request type: plain one-off request.
pub const TIME_BAR_REQUEST_TYPE_GET: u32 = 1;

pub const LOGOFF_TEXT: &str = "logoff";

/// Builds wire frames for every request the bridge sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct Encoder;

impl Encoder {
  pub fn new() -> Self {
    Encoder
  }

  fn finish(&self, msg: ClientMsg) -> Vec<u8> {
    msg.encode_to_vec()
  }

  pub fn encode_logon(&self, credentials: &Credentials) -> Result<Vec<u8>, BridgeError> {
    debug!("Encoding logon: User={}, AppId={}, Version={}.{}",
           credentials.username, credentials.client_app_id,
           credentials.protocol_version_major, credentials.protocol_version_minor);
    credentials.validate()?;
    let logon = Logon {
      user_name: Some(credentials.username.clone()),
      password: Some(credentials.password.clone()),
      client_app_id: Some(credentials.client_app_id.clone()),
      client_version: Some(credentials.client_version.clone()),
      protocol_version_minor: Some(credentials.protocol_version_minor),
      protocol_version_major: Some(credentials.protocol_version_major),
    };
    Ok(self.finish(ClientMsg { logon: Some(logon), ..Default::default() }))
  }

  pub fn encode_logoff(&self) -> Result<Vec<u8>, BridgeError> {
    debug!("Encoding logoff");
    let logoff = Logoff { text_message: Some(LOGOFF_TEXT.to_string()) };
    Ok(self.finish(ClientMsg { logoff: Some(logoff), ..Default::default() }))
  }

  pub fn encode_resolve_symbol(&self, req_id: u32, symbol: &str, subscribe: bool) -> Result<Vec<u8>, BridgeError> {
    debug!("Encoding symbol resolution: ReqID={}, Symbol={}, Subscribe={}", req_id, symbol, subscribe);
    if symbol.is_empty() {
      return Err(BridgeError::InvalidArgument("symbol must not be empty".to_string()));
    }
    let request = InformationRequest {
      id: Some(req_id),
      subscribe: Some(subscribe),
      symbol_resolution_request: Some(SymbolResolutionRequest { symbol: Some(symbol.to_string()) }),
    };
    Ok(self.finish(ClientMsg { information_requests: vec![request], ..Default::default() }))
  }

  pub fn encode_market_data_subscription(&self, req_id: u32, contract_id: u32, level: u32) -> Result<Vec<u8>, BridgeError> {
    debug!("Encoding market data subscription: ReqID={}, ContractID={}, Level={}", req_id, contract_id, level);
    if contract_id == 0 {
      return Err(BridgeError::InvalidArgument("contract_id must not be zero".to_string()));
    }
    let subscription = MarketDataSubscription {
      contract_id: Some(contract_id),
      level: Some(level),
      request_id: Some(req_id),
      include_past_quotes: Some(true),
    };
    Ok(self.finish(ClientMsg { market_data_subscriptions: vec![subscription], ..Default::default() }))
  }

  pub fn encode_time_bar_request(&self, req_id: u32, contract_id: u32, window: &BarWindow) -> Result<Vec<u8>, BridgeError> {
    debug!("Encoding time bar request: ReqID={}, ContractID={}, Unit={}, Bars={}, From={}",
           req_id, contract_id, window.bar_unit, window.bar_count, window.from_utc_ms);
    if contract_id == 0 {
      return Err(BridgeError::InvalidArgument("contract_id must not be zero".to_string()));
    }
    let request = TimeBarRequest {
      request_id: Some(req_id),
      time_bar_parameters: Some(TimeBarParameters {
        contract_id: Some(contract_id),
        bar_unit: Some(window.bar_unit.wire_code()),
        from_utc_time: Some(window.from_utc_ms),
        to_utc_time: None,
      }),
      request_type: Some(TIME_BAR_REQUEST_TYPE_GET),
    };
    Ok(self.finish(ClientMsg { time_bar_requests: vec![request], ..Default::default() }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::historical_range::{compute_bar_window, BarUnit};

  #[test]
  fn subscription_asks_for_past_quotes() {
    let bytes = Encoder::new().encode_market_data_subscription(2, 42, 1).unwrap();
    let msg = ClientMsg::decode(bytes.as_slice()).unwrap();
    let sub = &msg.market_data_subscriptions[0];
    assert_eq!(sub.contract_id, Some(42));
    assert_eq!(sub.request_id, Some(2));
    assert_eq!(sub.level, Some(1));
    assert_eq!(sub.include_past_quotes, Some(true));
  }

  #[test]
  fn time_bar_request_carries_window() {
    let window = compute_bar_window(BarUnit::Daily, "day", 5, 1_000 * 86_400_000, 0).unwrap();
    let bytes = Encoder::new().encode_time_bar_request(2, 42, &window).unwrap();
    let msg = ClientMsg::decode(bytes.as_slice()).unwrap();
    let req = &msg.time_bar_requests[0];
    let params = req.time_bar_parameters.as_ref().unwrap();
    assert_eq!(params.bar_unit, Some(6));
    assert_eq!(params.from_utc_time, Some(995 * 86_400_000));
    assert_eq!(req.request_type, Some(TIME_BAR_REQUEST_TYPE_GET));
  }

  #[test]
  fn rejects_zero_contract_and_empty_symbol() {
    let enc = Encoder::new();
    assert!(matches!(enc.encode_market_data_subscription(1, 0, 1), Err(BridgeError::InvalidArgument(_))));
    assert!(matches!(enc.encode_resolve_symbol(1, "", true), Err(BridgeError::InvalidArgument(_))));
  }
}
