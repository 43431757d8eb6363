// cqgbridge/src/test_support.rs
// Shared fixtures for scripted-connection tests.

use crate::config::Credentials;
use crate::protocol::{
  ClientMsg, ContractMetadata, Decimal, InformationReport, InformationRequest, Logon, LogonResult,
  MarketDataSubscription, ServerMsg, SymbolResolutionReport, SymbolResolutionRequest,
};

pub const BASE_TIME: &str = "2024-01-01T00:00:00";
pub const BASE_TIME_MS: i64 = 1_704_067_200_000;

pub fn creds() -> Credentials {
  Credentials {
    username: "user".to_string(),
    password: "pass".to_string(),
    client_app_id: "WebApiTest".to_string(),
    client_version: "1.0".to_string(),
    protocol_version_major: 2,
    protocol_version_minor: 240,
  }
}

pub fn logon_msg() -> ClientMsg {
  ClientMsg {
    logon: Some(Logon {
      user_name: Some("user".into()),
      password: Some("pass".into()),
      client_app_id: Some("WebApiTest".into()),
      client_version: Some("1.0".into()),
      protocol_version_minor: Some(240),
      protocol_version_major: Some(2),
    }),
    ..Default::default()
  }
}

pub fn logon_result(code: u32, base_time: &str, text: &str) -> ServerMsg {
  ServerMsg {
    logon_result: Some(LogonResult {
      result_code: Some(code),
      base_time: Some(base_time.to_string()),
      text_message: Some(text.to_string()),
      ..Default::default()
    }),
    ..Default::default()
  }
}

pub fn logon_ok() -> ServerMsg {
  logon_result(0, BASE_TIME, "")
}

pub fn resolve_msg(req_id: u32, symbol: &str) -> ClientMsg {
  ClientMsg {
    information_requests: vec![InformationRequest {
      id: Some(req_id),
      subscribe: Some(true),
      symbol_resolution_request: Some(SymbolResolutionRequest { symbol: Some(symbol.to_string()) }),
    }],
    ..Default::default()
  }
}

pub fn metadata(contract_id: u32, symbol: &str, scale: f64) -> ContractMetadata {
  ContractMetadata {
    contract_id: Some(contract_id),
    contract_symbol: Some(symbol.to_string()),
    correct_price_scale: Some(scale),
    ..Default::default()
  }
}

pub fn resolution_report(req_id: u32, metadata: Option<ContractMetadata>) -> ServerMsg {
  ServerMsg {
    information_reports: vec![InformationReport {
      id: Some(req_id),
      is_report_complete: Some(true),
      status_code: Some(0),
      symbol_resolution_report: Some(SymbolResolutionReport { contract_metadata: metadata }),
      ..Default::default()
    }],
    ..Default::default()
  }
}

pub fn subscription_msg(req_id: u32, contract_id: u32, level: u32) -> ClientMsg {
  ClientMsg {
    market_data_subscriptions: vec![MarketDataSubscription {
      contract_id: Some(contract_id),
      level: Some(level),
      request_id: Some(req_id),
      include_past_quotes: Some(true),
    }],
    ..Default::default()
  }
}

pub fn dec(n: i64) -> Option<Decimal> {
  Some(Decimal { significand: Some(n), exponent: Some(0) })
}
