// cqgbridge/src/data.rs
// Decoded market-data records flowing from the parser to the managers.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// Quote type codes used on quotes and corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum QuoteType {
  Trade = 0,
  BestBid = 1,
  BestAsk = 2,
  Bid = 3,
  Ask = 4,
  Settlement = 5,
}

impl QuoteType {
  pub fn wire_name(self) -> &'static str {
    match self {
      QuoteType::Trade => "TYPE_TRADE",
      QuoteType::BestBid => "TYPE_BESTBID",
      QuoteType::BestAsk => "TYPE_BESTASK",
      QuoteType::Bid => "TYPE_BID",
      QuoteType::Ask => "TYPE_ASK",
      QuoteType::Settlement => "TYPE_SETTLEMENT",
    }
  }

  /// Symbolic name for a raw code; unknown codes render as their number.
  pub fn name_of(code: u32) -> String {
    match QuoteType::try_from(code) {
      Ok(t) => t.wire_name().to_string(),
      Err(_) => code.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum DomSide {
  Bid = 1,
  Ask = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
  pub scaled_price: i64,
  /// Volume significand.
  pub volume: i64,
  /// Seconds.
  pub utc_time: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketValuesSnapshot {
  pub day_index: i32,
  pub scaled_open: i64,
  pub scaled_high: i64,
  pub scaled_low: i64,
  pub scaled_close: i64,
  pub scaled_last_no_settlement: i64,
  pub total_volume: i64,
  pub open_interest: i64,
  pub last_trade_utc: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
  /// Raw quote type code of the corrected quote.
  pub quote_type: u32,
  pub scaled_source_price: i64,
  pub scaled_price: i64,
  pub utc_time: i64,
  /// Volume significand; 0 marks a cancel.
  pub volume: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomPriceLevel {
  /// `None` when the backend sent a side code we do not know.
  pub side: Option<DomSide>,
  pub scaled_price: i64,
  pub order_volumes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DomSnapshot {
  pub levels: Vec<DomPriceLevel>,
}

/// One unit of pushed market data.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
  Trade(Trade),
  MarketValues(MarketValuesSnapshot),
  Correction(Correction),
  Dom(DomSnapshot),
}

/// All push messages from one real-time market data entry, in processing order
/// (trades, market values, corrections, DOM).
#[derive(Debug, Clone, PartialEq)]
pub struct PushBatch {
  pub contract_id: u32,
  pub is_snapshot: bool,
  pub messages: Vec<PushMessage>,
}

/// Historical bar, prices left in scaled form as received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBar {
  pub bar_utc_time: i64,
  pub scaled_open_price: i64,
  pub scaled_high_price: i64,
  pub scaled_low_price: i64,
  pub scaled_close_price: i64,
  pub volume: i64,
  pub open_interest: i64,
  pub tick_volume: i64,
}

/// One time-bar report, relayed to the client as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalReport {
  pub request_id: u32,
  pub status_code: u32,
  pub up_to_utc_time: i64,
  pub is_report_complete: bool,
  pub bars: Vec<TimeBar>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quote_type_names() {
    assert_eq!(QuoteType::name_of(0), "TYPE_TRADE");
    assert_eq!(QuoteType::name_of(5), "TYPE_SETTLEMENT");
    assert_eq!(QuoteType::name_of(42), "42");
  }

  #[test]
  fn historical_report_json_keys() {
    let report = HistoricalReport {
      request_id: 2,
      status_code: 0,
      up_to_utc_time: 100,
      is_report_complete: true,
      bars: vec![],
    };
    let v = serde_json::to_value(&report).unwrap();
    for key in ["request_id", "status_code", "up_to_utc_time", "is_report_complete", "bars"] {
      assert!(v.get(key).is_some(), "missing {}", key);
    }
  }
}
