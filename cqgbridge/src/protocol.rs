// cqgbridge/src/protocol.rs
//
// Wire contract for the backend's WebSocket/protobuf API.
//
// Only the messages the bridge exchanges are declared. Field numbers follow the
// backend's published schema; all scalars are proto2 `optional` and therefore
// surface as `Option<T>`.

/// Top-level message sent to the backend. One per binary frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientMsg {
  #[prost(message, repeated, tag = "1")]
  pub information_requests: Vec<InformationRequest>,
  #[prost(message, repeated, tag = "4")]
  pub market_data_subscriptions: Vec<MarketDataSubscription>,
  #[prost(message, repeated, tag = "8")]
  pub time_bar_requests: Vec<TimeBarRequest>,
  #[prost(message, optional, tag = "100")]
  pub logon: Option<Logon>,
  #[prost(message, optional, tag = "101")]
  pub logoff: Option<Logoff>,
}

/// Top-level message received from the backend. One per binary frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerMsg {
  #[prost(message, repeated, tag = "1")]
  pub information_reports: Vec<InformationReport>,
  #[prost(message, repeated, tag = "7")]
  pub real_time_market_data: Vec<RealTimeMarketData>,
  #[prost(message, repeated, tag = "9")]
  pub time_bar_reports: Vec<TimeBarReport>,
  #[prost(message, optional, tag = "100")]
  pub logon_result: Option<LogonResult>,
  #[prost(message, optional, tag = "101")]
  pub logged_off: Option<LoggedOff>,
}

// --- Session ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Logon {
  #[prost(string, optional, tag = "1")]
  pub user_name: Option<String>,
  #[prost(string, optional, tag = "2")]
  pub password: Option<String>,
  #[prost(string, optional, tag = "3")]
  pub client_app_id: Option<String>,
  #[prost(string, optional, tag = "4")]
  pub client_version: Option<String>,
  #[prost(uint32, optional, tag = "5")]
  pub protocol_version_minor: Option<u32>,
  #[prost(uint32, optional, tag = "6")]
  pub protocol_version_major: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogonResult {
  /// 0 on success.
  #[prost(uint32, optional, tag = "1")]
  pub result_code: Option<u32>,
  /// `YYYY-MM-DDTHH:MM:SS`, UTC. Origin of all relative backend timestamps.
  #[prost(string, optional, tag = "2")]
  pub base_time: Option<String>,
  #[prost(string, optional, tag = "3")]
  pub session_token: Option<String>,
  #[prost(string, optional, tag = "4")]
  pub text_message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Logoff {
  #[prost(string, optional, tag = "1")]
  pub text_message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoggedOff {
  #[prost(uint32, optional, tag = "1")]
  pub logoff_reason: Option<u32>,
  #[prost(string, optional, tag = "2")]
  pub text_message: Option<String>,
}

// --- Reference data ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InformationRequest {
  #[prost(uint32, optional, tag = "1")]
  pub id: Option<u32>,
  #[prost(bool, optional, tag = "2")]
  pub subscribe: Option<bool>,
  #[prost(message, optional, tag = "8")]
  pub symbol_resolution_request: Option<SymbolResolutionRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SymbolResolutionRequest {
  #[prost(string, optional, tag = "1")]
  pub symbol: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InformationReport {
  #[prost(uint32, optional, tag = "1")]
  pub id: Option<u32>,
  #[prost(bool, optional, tag = "2")]
  pub is_report_complete: Option<bool>,
  #[prost(uint32, optional, tag = "3")]
  pub status_code: Option<u32>,
  #[prost(string, optional, tag = "4")]
  pub text_message: Option<String>,
  #[prost(message, optional, tag = "8")]
  pub symbol_resolution_report: Option<SymbolResolutionReport>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SymbolResolutionReport {
  #[prost(message, optional, tag = "1")]
  pub contract_metadata: Option<ContractMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractMetadata {
  #[prost(uint32, optional, tag = "1")]
  pub contract_id: Option<u32>,
  #[prost(string, optional, tag = "2")]
  pub contract_symbol: Option<String>,
  /// Multiplier converting scaled integer prices to real prices.
  #[prost(double, optional, tag = "3")]
  pub correct_price_scale: Option<f64>,
  #[prost(uint32, optional, tag = "4")]
  pub display_price_scale: Option<u32>,
  #[prost(string, optional, tag = "5")]
  pub description: Option<String>,
  #[prost(string, optional, tag = "6")]
  pub title: Option<String>,
  #[prost(double, optional, tag = "7")]
  pub tick_size: Option<f64>,
  #[prost(double, optional, tag = "8")]
  pub tick_value: Option<f64>,
}

// --- Market data ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketDataSubscription {
  #[prost(uint32, optional, tag = "1")]
  pub contract_id: Option<u32>,
  #[prost(uint32, optional, tag = "2")]
  pub level: Option<u32>,
  #[prost(uint32, optional, tag = "3")]
  pub request_id: Option<u32>,
  #[prost(bool, optional, tag = "4")]
  pub include_past_quotes: Option<bool>,
}

/// Fixed-point decimal: `significand * 10^exponent`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Decimal {
  #[prost(sint64, optional, tag = "1")]
  pub significand: Option<i64>,
  #[prost(sint32, optional, tag = "2")]
  pub exponent: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RealTimeMarketData {
  #[prost(uint32, optional, tag = "1")]
  pub contract_id: Option<u32>,
  #[prost(bool, optional, tag = "2")]
  pub is_snapshot: Option<bool>,
  #[prost(message, repeated, tag = "3")]
  pub quotes: Vec<Quote>,
  #[prost(message, repeated, tag = "4")]
  pub market_values: Vec<MarketValues>,
  #[prost(message, optional, tag = "5")]
  pub detailed_dom: Option<DetailedDom>,
  #[prost(message, repeated, tag = "6")]
  pub corrections: Vec<Quote>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Quote {
  /// See `data::QuoteType`.
  #[prost(uint32, optional, tag = "1")]
  pub r#type: Option<u32>,
  #[prost(sint64, optional, tag = "2")]
  pub quote_utc_time: Option<i64>,
  #[prost(sint64, optional, tag = "3")]
  pub scaled_price: Option<i64>,
  /// Price being replaced. Only meaningful on corrections.
  #[prost(sint64, optional, tag = "4")]
  pub scaled_source_price: Option<i64>,
  #[prost(message, optional, tag = "5")]
  pub volume: Option<Decimal>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketValues {
  #[prost(sint64, optional, tag = "1")]
  pub scaled_open_price: Option<i64>,
  #[prost(sint64, optional, tag = "2")]
  pub scaled_high_price: Option<i64>,
  #[prost(sint64, optional, tag = "3")]
  pub scaled_low_price: Option<i64>,
  #[prost(sint64, optional, tag = "4")]
  pub scaled_close_price: Option<i64>,
  #[prost(sint64, optional, tag = "5")]
  pub scaled_last_price_no_settlement: Option<i64>,
  #[prost(message, optional, tag = "6")]
  pub total_volume: Option<Decimal>,
  #[prost(message, optional, tag = "7")]
  pub open_interest: Option<Decimal>,
  /// 0 is the current trading day, negative values are prior days.
  #[prost(sint32, optional, tag = "8")]
  pub day_index: Option<i32>,
  #[prost(sint64, optional, tag = "9")]
  pub last_trade_utc_timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetailedDom {
  #[prost(message, repeated, tag = "1")]
  pub price_levels: Vec<DetailedDomPriceLevel>,
  #[prost(bool, optional, tag = "2")]
  pub is_snapshot: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetailedDomPriceLevel {
  /// 1 = bid, 2 = ask.
  #[prost(uint32, optional, tag = "1")]
  pub side: Option<u32>,
  #[prost(sint64, optional, tag = "2")]
  pub scaled_price: Option<i64>,
  #[prost(message, repeated, tag = "3")]
  pub orders: Vec<DetailedDomOrder>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetailedDomOrder {
  #[prost(string, optional, tag = "1")]
  pub order_id: Option<String>,
  #[prost(message, optional, tag = "2")]
  pub volume: Option<Decimal>,
}

// --- Historical bars ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeBarRequest {
  #[prost(uint32, optional, tag = "1")]
  pub request_id: Option<u32>,
  #[prost(message, optional, tag = "2")]
  pub time_bar_parameters: Option<TimeBarParameters>,
  /// 1 = get.
  #[prost(uint32, optional, tag = "3")]
  pub request_type: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeBarParameters {
  #[prost(uint32, optional, tag = "1")]
  pub contract_id: Option<u32>,
  #[prost(uint32, optional, tag = "2")]
  pub bar_unit: Option<u32>,
  #[prost(sint64, optional, tag = "4")]
  pub from_utc_time: Option<i64>,
  #[prost(sint64, optional, tag = "5")]
  pub to_utc_time: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeBarReport {
  #[prost(uint32, optional, tag = "1")]
  pub request_id: Option<u32>,
  #[prost(uint32, optional, tag = "2")]
  pub status_code: Option<u32>,
  #[prost(string, optional, tag = "3")]
  pub text_message: Option<String>,
  #[prost(bool, optional, tag = "4")]
  pub is_report_complete: Option<bool>,
  #[prost(message, repeated, tag = "5")]
  pub time_bars: Vec<TimeBar>,
  #[prost(sint64, optional, tag = "6")]
  pub up_to_utc_time: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimeBar {
  #[prost(sint64, optional, tag = "1")]
  pub bar_utc_time: Option<i64>,
  #[prost(sint64, optional, tag = "2")]
  pub scaled_open_price: Option<i64>,
  #[prost(sint64, optional, tag = "3")]
  pub scaled_high_price: Option<i64>,
  #[prost(sint64, optional, tag = "4")]
  pub scaled_low_price: Option<i64>,
  #[prost(sint64, optional, tag = "5")]
  pub scaled_close_price: Option<i64>,
  #[prost(message, optional, tag = "6")]
  pub volume: Option<Decimal>,
  #[prost(message, optional, tag = "7")]
  pub open_interest: Option<Decimal>,
  #[prost(message, optional, tag = "8")]
  pub tick_volume: Option<Decimal>,
}

/// Short name of a client message, for logs.
pub fn client_msg_kind(msg: &ClientMsg) -> &'static str {
  if msg.logon.is_some() {
    "LOGON"
  } else if msg.logoff.is_some() {
    "LOGOFF"
  } else if !msg.information_requests.is_empty() {
    "INFORMATION_REQUEST"
  } else if !msg.market_data_subscriptions.is_empty() {
    "MARKET_DATA_SUBSCRIPTION"
  } else if !msg.time_bar_requests.is_empty() {
    "TIME_BAR_REQUEST"
  } else {
    "EMPTY"
  }
}

/// Short name of a server message, for logs.
pub fn server_msg_kind(msg: &ServerMsg) -> &'static str {
  if msg.logon_result.is_some() {
    "LOGON_RESULT"
  } else if msg.logged_off.is_some() {
    "LOGGED_OFF"
  } else if !msg.information_reports.is_empty() {
    "INFORMATION_REPORT"
  } else if !msg.real_time_market_data.is_empty() {
    "REAL_TIME_MARKET_DATA"
  } else if !msg.time_bar_reports.is_empty() {
    "TIME_BAR_REPORT"
  } else {
    "UNKNOWN"
  }
}
