// cqgbridge/src/aggregator.rs
//
// Running per-contract session aggregate built from pushed market data, and
// the snapshot records handed downstream.

use crate::contract::ContractMetadata;
use crate::data::{Correction, DomSide, DomSnapshot, MarketValuesSnapshot, PushBatch, PushMessage, QuoteType, Trade};
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, trace, warn};
use serde::Serialize;

pub const LOCAL_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S %Z";

/// Session OHLC/volume. Prices are real (already scaled).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionAggregate {
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub last: f64,
  pub volume: i64,
  #[serde(rename = "oi")]
  pub open_interest: i64,
  #[serde(rename = "utctime")]
  pub last_update_utc: i64,
  #[serde(skip)]
  pub first_trade_seen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
  /// Formatted to four decimals.
  pub price: String,
  pub volume: i64,
  pub utc_time: i64,
  pub local_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionRecord {
  #[serde(rename = "type")]
  pub type_name: String,
  pub old_price: f64,
  pub new_price: f64,
  pub timestamp: i64,
  pub is_cancel: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomLevel {
  pub price: f64,
  pub bid_qty: i64,
  pub ask_qty: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DomRecord {
  pub price_levels: Vec<DomLevel>,
}

/// One flushed batch. Only produced when the batch carried at least one trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSnapshot {
  pub contract_id: u32,
  pub is_snapshot: bool,
  pub trades: Vec<TradeRecord>,
  pub corrections: Vec<CorrectionRecord>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dom: Option<DomRecord>,
  pub market_values: SessionAggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationState {
  AwaitingFirstTrade,
  Running,
}

/// Renders a UTC second in `tz`; empty for non-positive times.
pub fn format_local_time(utc_seconds: i64, tz: &Tz) -> String {
  if utc_seconds <= 0 {
    return String::new();
  }
  match Utc.timestamp_opt(utc_seconds, 0).single() {
    Some(t) => t.with_timezone(tz).format(LOCAL_TIME_FORMAT).to_string(),
    None => String::new(),
  }
}

pub struct AggregationEngine {
  contract_id: u32,
  price_scale: f64,
  display_tz: Tz,
  state: AggregationState,
  aggregate: SessionAggregate,
  last_dom: Option<DomRecord>,
}

impl AggregationEngine {
  pub fn new(metadata: &ContractMetadata, display_tz: Tz) -> Self {
    debug!("Aggregation for contract {} with price scale {}", metadata.contract_id, metadata.price_scale);
    AggregationEngine {
      contract_id: metadata.contract_id,
      price_scale: metadata.price_scale,
      display_tz,
      state: AggregationState::AwaitingFirstTrade,
      aggregate: SessionAggregate::default(),
      last_dom: None,
    }
  }

  pub fn contract_id(&self) -> u32 { self.contract_id }
  pub fn state(&self) -> AggregationState { self.state }
  pub fn aggregate(&self) -> &SessionAggregate { &self.aggregate }

  /// Most recent depth-of-market seen, flushed or not.
  pub fn last_dom(&self) -> Option<&DomRecord> { self.last_dom.as_ref() }

  fn scale(&self, scaled: i64) -> f64 {
    scaled as f64 * self.price_scale
  }

  /// Folds one batch into the aggregate. Returns the snapshot to publish, or
  /// `None` when the batch carried no accepted trade.
  pub fn process_batch(&mut self, batch: &PushBatch) -> Option<UpdateSnapshot> {
    if batch.contract_id != self.contract_id {
      warn!("Ignoring batch for contract {} (aggregating {})", batch.contract_id, self.contract_id);
      return None;
    }

    let mut trades = Vec::new();
    let mut corrections = Vec::new();
    let mut dom = None;
    let mut market_values_applied = false;

    for message in &batch.messages {
      match message {
        PushMessage::Trade(trade) => {
          if let Some(record) = self.apply_trade(trade) {
            trades.push(record);
          }
        }
        PushMessage::MarketValues(mv) => {
          if !market_values_applied && self.apply_market_values(mv) {
            market_values_applied = true;
          }
        }
        PushMessage::Correction(c) => corrections.push(self.correction_record(c)),
        PushMessage::Dom(snapshot) => {
          let record = self.dom_record(snapshot);
          self.last_dom = Some(record.clone());
          dom = Some(record);
        }
      }
    }

    if trades.is_empty() {
      trace!("Batch for contract {} has no trades; not flushed", self.contract_id);
      return None;
    }
    Some(UpdateSnapshot {
      contract_id: self.contract_id,
      is_snapshot: batch.is_snapshot,
      trades,
      corrections,
      dom,
      market_values: self.aggregate.clone(),
    })
  }

  fn apply_trade(&mut self, trade: &Trade) -> Option<TradeRecord> {
    if trade.utc_time <= 0 {
      trace!("Dropping trade without a timestamp (price {})", trade.scaled_price);
      return None;
    }
    let price = self.scale(trade.scaled_price);
    let agg = &mut self.aggregate;

    if self.state == AggregationState::AwaitingFirstTrade {
      agg.open = price;
      agg.first_trade_seen = true;
      self.state = AggregationState::Running;
    }
    // Zero means unset.
    if agg.high == 0.0 || price > agg.high {
      agg.high = price;
    }
    if agg.low == 0.0 || price < agg.low {
      agg.low = price;
    }
    agg.last = price;
    agg.close = price;
    agg.volume = agg.volume.saturating_add(trade.volume);

    Some(TradeRecord {
      price: format!("{:.4}", price),
      volume: trade.volume,
      utc_time: trade.utc_time,
      local_time: format_local_time(trade.utc_time, &self.display_tz),
    })
  }

  // Returns whether the snapshot qualified and was applied.
  fn apply_market_values(&mut self, mv: &MarketValuesSnapshot) -> bool {
    if mv.day_index != 0 || (mv.scaled_last_no_settlement == 0 && mv.total_volume == 0) {
      return false;
    }
    let open = self.scale(mv.scaled_open);
    let high = self.scale(mv.scaled_high);
    let low = self.scale(mv.scaled_low);
    let close = self.scale(mv.scaled_close);
    let last = self.scale(mv.scaled_last_no_settlement);

    let agg = &mut self.aggregate;
    agg.open = open;
    agg.high = high;
    agg.low = low;
    agg.close = close;
    agg.last = last;
    agg.volume = mv.total_volume;
    agg.open_interest = mv.open_interest;
    agg.last_update_utc = mv.last_trade_utc;
    true
  }

  fn correction_record(&self, c: &Correction) -> CorrectionRecord {
    CorrectionRecord {
      type_name: QuoteType::name_of(c.quote_type),
      old_price: self.scale(c.scaled_source_price),
      new_price: self.scale(c.scaled_price),
      timestamp: c.utc_time,
      is_cancel: c.volume == 0,
    }
  }

  fn dom_record(&self, snapshot: &DomSnapshot) -> DomRecord {
    let price_levels = snapshot.levels.iter().map(|level| {
      let total = level.order_volumes.iter().fold(0i64, |acc, v| acc.saturating_add(*v));
      let (bid_qty, ask_qty) = match level.side {
        Some(DomSide::Bid) => (total, 0),
        Some(DomSide::Ask) => (0, total),
        None => (0, 0),
      };
      DomLevel { price: self.scale(level.scaled_price), bid_qty, ask_qty }
    }).collect();
    DomRecord { price_levels }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::DomPriceLevel;

  fn engine() -> AggregationEngine {
    let metadata = ContractMetadata {
      contract_id: 7,
      contract_symbol: "F.US.EPZ4".to_string(),
      price_scale: 0.25,
      tick_size: 0.25,
      description: String::new(),
      title: String::new(),
    };
    AggregationEngine::new(&metadata, chrono_tz::Asia::Kolkata)
  }

  fn batch(messages: Vec<PushMessage>) -> PushBatch {
    PushBatch { contract_id: 7, is_snapshot: false, messages }
  }

  fn trade(price: i64, volume: i64, utc: i64) -> PushMessage {
    PushMessage::Trade(Trade { scaled_price: price, volume, utc_time: utc })
  }

  fn values(last: i64, total_volume: i64, open: i64) -> PushMessage {
    PushMessage::MarketValues(MarketValuesSnapshot {
      scaled_open: open,
      scaled_high: 40,
      scaled_low: 4,
      scaled_close: 20,
      scaled_last_no_settlement: last,
      total_volume,
      open_interest: 9,
      last_trade_utc: 1_700_000_000,
      ..Default::default()
    })
  }

  #[test]
  fn first_trade_sets_open_once() {
    let mut e = engine();
    assert_eq!(e.state(), AggregationState::AwaitingFirstTrade);
    e.process_batch(&batch(vec![trade(400, 1, 10)])).unwrap();
    e.process_batch(&batch(vec![trade(404, 50, 11), trade(396, 2, 12)])).unwrap();
    let agg = e.aggregate();
    assert_eq!(e.state(), AggregationState::Running);
    assert!(agg.first_trade_seen);
    assert_eq!(agg.open, 100.0);
    assert_eq!(agg.high, 101.0);
    assert_eq!(agg.low, 99.0);
    assert_eq!(agg.close, 99.0);
    assert_eq!(agg.last, 99.0);
    assert_eq!(agg.volume, 53);
  }

  #[test]
  fn single_trade_sets_high_and_low() {
    let mut e = engine();
    let snap = e.process_batch(&batch(vec![trade(-8, 1, 10)])).unwrap();
    assert_eq!(snap.market_values.high, -2.0);
    assert_eq!(snap.market_values.low, -2.0);
    assert_eq!(snap.trades[0].price, "-2.0000");
  }

  #[test]
  fn untimed_trades_are_ignored() {
    let mut e = engine();
    assert!(e.process_batch(&batch(vec![trade(400, 1, 0)])).is_none());
    assert_eq!(e.state(), AggregationState::AwaitingFirstTrade);
    assert_eq!(e.aggregate().volume, 0);
  }

  #[test]
  fn only_first_qualifying_market_values_apply() {
    let mut e = engine();
    let snap = e.process_batch(&batch(vec![
      trade(400, 1, 10),
      values(0, 0, 1),      // does not qualify
      values(24, 100, 8),
      values(28, 200, 12),
    ])).unwrap();
    let mv = &snap.market_values;
    assert_eq!(mv.open, 2.0);
    assert_eq!(mv.last, 6.0);
    assert_eq!(mv.volume, 100);
    assert_eq!(mv.open_interest, 9);
    assert_eq!(mv.last_update_utc, 1_700_000_000);
  }

  #[test]
  fn market_values_for_other_days_are_skipped() {
    let mut e = engine();
    let mut mv = MarketValuesSnapshot { scaled_last_no_settlement: 10, total_volume: 1, ..Default::default() };
    mv.day_index = -1;
    let snap = e.process_batch(&batch(vec![trade(400, 3, 10), PushMessage::MarketValues(mv)])).unwrap();
    assert_eq!(snap.market_values.volume, 3);
  }

  #[test]
  fn correction_does_not_touch_aggregate() {
    let mut e = engine();
    e.process_batch(&batch(vec![trade(400, 5, 10)])).unwrap();
    let before = e.aggregate().clone();
    let snap = e.process_batch(&batch(vec![
      trade(400, 0, 11),
      PushMessage::Correction(Correction { quote_type: 0, scaled_source_price: 400, scaled_price: 800, utc_time: 10, volume: 0 }),
    ])).unwrap();
    let c = &snap.corrections[0];
    assert!(c.is_cancel);
    assert_eq!(c.type_name, "TYPE_TRADE");
    assert_eq!(c.old_price, 100.0);
    assert_eq!(c.new_price, 200.0);
    assert_eq!(e.aggregate().high, before.high);
    assert_eq!(e.aggregate().volume, before.volume);
  }

  #[test]
  fn dom_levels_sum_per_side_in_input_order() {
    let mut e = engine();
    let dom = DomSnapshot {
      levels: vec![
        DomPriceLevel { side: Some(DomSide::Bid), scaled_price: 8, order_volumes: vec![3, 5] },
        DomPriceLevel { side: Some(DomSide::Ask), scaled_price: 4, order_volumes: vec![2] },
        DomPriceLevel { side: Some(DomSide::Bid), scaled_price: 8, order_volumes: vec![1] },
      ],
    };
    assert!(e.process_batch(&batch(vec![PushMessage::Dom(dom)])).is_none());
    let levels = &e.last_dom().unwrap().price_levels;
    assert_eq!(levels[0], DomLevel { price: 2.0, bid_qty: 8, ask_qty: 0 });
    assert_eq!(levels[1], DomLevel { price: 1.0, bid_qty: 0, ask_qty: 2 });
    assert_eq!(levels[2], DomLevel { price: 2.0, bid_qty: 1, ask_qty: 0 });
  }

  #[test]
  fn volumes_saturate_instead_of_overflowing() {
    let mut e = engine();
    let snap = e.process_batch(&batch(vec![trade(400, i64::MAX, 10), trade(400, 1, 11)])).unwrap();
    assert_eq!(snap.market_values.volume, i64::MAX);

    let dom = DomSnapshot {
      levels: vec![DomPriceLevel { side: Some(DomSide::Ask), scaled_price: 8, order_volumes: vec![i64::MAX, 1] }],
    };
    e.process_batch(&batch(vec![PushMessage::Dom(dom)]));
    assert_eq!(e.last_dom().unwrap().price_levels[0].ask_qty, i64::MAX);
  }

  #[test]
  fn local_time_in_display_zone() {
    // 2024-01-01T00:00:00Z is 05:30 in Kolkata.
    assert_eq!(format_local_time(1_704_067_200, &chrono_tz::Asia::Kolkata), "01-01-2024 05:30:00 IST");
    assert_eq!(format_local_time(0, &chrono_tz::Asia::Kolkata), "");
  }

  #[test]
  fn snapshot_json_shape() {
    let mut e = engine();
    let snap = e.process_batch(&batch(vec![trade(400, 1, 1_704_067_200)])).unwrap();
    let v = serde_json::to_value(&snap).unwrap();
    assert_eq!(v["contract_id"], 7);
    assert_eq!(v["trades"][0]["price"], "100.0000");
    assert_eq!(v["trades"][0]["local_time"], "01-01-2024 05:30:00 IST");
    assert!(v.get("dom").is_none());
    for key in ["open", "high", "low", "close", "last", "volume", "oi", "utctime"] {
      assert!(v["market_values"].get(key).is_some(), "missing {}", key);
    }
    assert!(v["market_values"].get("first_trade_seen").is_none());
  }
}
