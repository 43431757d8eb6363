// cqgbridge/src/parser_data_market.rs
use std::sync::Arc;
use crate::handler::MarketDataHandler;
use crate::data::{
  Correction, DomPriceLevel, DomSide, DomSnapshot, HistoricalReport, MarketValuesSnapshot,
  PushBatch, PushMessage, QuoteType, TimeBar, Trade,
};
use crate::protocol::{self, Decimal, RealTimeMarketData, TimeBarReport};

// Volumes are consumed as raw significands.
fn significand(value: Option<&Decimal>) -> i64 {
  value.and_then(|d| d.significand).unwrap_or(0)
}

fn trade_from_quote(quote: &protocol::Quote) -> Trade {
  Trade {
    scaled_price: quote.scaled_price.unwrap_or(0),
    volume: significand(quote.volume.as_ref()),
    utc_time: quote.quote_utc_time.unwrap_or(0),
  }
}

fn market_values(mv: &protocol::MarketValues) -> MarketValuesSnapshot {
  MarketValuesSnapshot {
    day_index: mv.day_index.unwrap_or(0),
    scaled_open: mv.scaled_open_price.unwrap_or(0),
    scaled_high: mv.scaled_high_price.unwrap_or(0),
    scaled_low: mv.scaled_low_price.unwrap_or(0),
    scaled_close: mv.scaled_close_price.unwrap_or(0),
    scaled_last_no_settlement: mv.scaled_last_price_no_settlement.unwrap_or(0),
    total_volume: significand(mv.total_volume.as_ref()),
    open_interest: significand(mv.open_interest.as_ref()),
    last_trade_utc: mv.last_trade_utc_timestamp.unwrap_or(0),
  }
}

fn correction(quote: &protocol::Quote) -> Correction {
  Correction {
    quote_type: quote.r#type.unwrap_or(0),
    scaled_source_price: quote.scaled_source_price.unwrap_or(0),
    scaled_price: quote.scaled_price.unwrap_or(0),
    utc_time: quote.quote_utc_time.unwrap_or(0),
    volume: significand(quote.volume.as_ref()),
  }
}

fn dom_snapshot(dom: &protocol::DetailedDom) -> DomSnapshot {
  let levels = dom.price_levels.iter().map(|level| {
    let side_code = level.side.unwrap_or(0);
    let side = DomSide::try_from(side_code).ok();
    if side.is_none() {
      log::trace!("DOM level with unknown side {}", side_code);
    }
    DomPriceLevel {
      side,
      scaled_price: level.scaled_price.unwrap_or(0),
      order_volumes: level.orders.iter().map(|o| significand(o.volume.as_ref())).collect(),
    }
  }).collect();
  DomSnapshot { levels }
}

/// Flattens one real-time entry into push messages: trades, market values,
/// corrections, then DOM. Non-trade quotes are dropped.
pub fn parse_real_time_market_data(data: &RealTimeMarketData) -> PushBatch {
  let mut messages = Vec::with_capacity(
    data.quotes.len() + data.market_values.len() + data.corrections.len() + 1);

  let trade_code: u32 = QuoteType::Trade.into();
  for quote in &data.quotes {
    if quote.r#type.unwrap_or(0) == trade_code {
      messages.push(PushMessage::Trade(trade_from_quote(quote)));
    } else {
      log::trace!("Ignoring quote of type {}", QuoteType::name_of(quote.r#type.unwrap_or(0)));
    }
  }
  messages.extend(data.market_values.iter().map(|mv| PushMessage::MarketValues(market_values(mv))));
  messages.extend(data.corrections.iter().map(|c| PushMessage::Correction(correction(c))));
  if let Some(dom) = &data.detailed_dom {
    messages.push(PushMessage::Dom(dom_snapshot(dom)));
  }

  PushBatch {
    contract_id: data.contract_id.unwrap_or(0),
    is_snapshot: data.is_snapshot.unwrap_or(false),
    messages,
  }
}

pub fn parse_time_bar_report(report: &TimeBarReport) -> HistoricalReport {
  HistoricalReport {
    request_id: report.request_id.unwrap_or(0),
    status_code: report.status_code.unwrap_or(0),
    up_to_utc_time: report.up_to_utc_time.unwrap_or(0),
    is_report_complete: report.is_report_complete.unwrap_or(false),
    bars: report.time_bars.iter().map(|bar| TimeBar {
      bar_utc_time: bar.bar_utc_time.unwrap_or(0),
      scaled_open_price: bar.scaled_open_price.unwrap_or(0),
      scaled_high_price: bar.scaled_high_price.unwrap_or(0),
      scaled_low_price: bar.scaled_low_price.unwrap_or(0),
      scaled_close_price: bar.scaled_close_price.unwrap_or(0),
      volume: significand(bar.volume.as_ref()),
      open_interest: significand(bar.open_interest.as_ref()),
      tick_volume: significand(bar.tick_volume.as_ref()),
    }).collect(),
  }
}

/// Process a real-time market data entry.
pub fn process_real_time_market_data(handler: &Arc<dyn MarketDataHandler>, data: &RealTimeMarketData) {
  let batch = parse_real_time_market_data(data);
  log::trace!("Real-time data: contract={}, messages={}", batch.contract_id, batch.messages.len());
  handler.real_time_market_data(batch);
}

/// Process a time bar report.
pub fn process_time_bar_report(handler: &Arc<dyn MarketDataHandler>, report: &TimeBarReport) {
  let report = parse_time_bar_report(report);
  log::debug!("Time bar report: req_id={}, status={}, bars={}, complete={}",
              report.request_id, report.status_code, report.bars.len(), report.is_report_complete);
  handler.time_bar_report(report);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::{DetailedDom, DetailedDomOrder, DetailedDomPriceLevel, MarketValues, Quote};

  fn vol(n: i64) -> Option<Decimal> {
    Some(Decimal { significand: Some(n), exponent: Some(0) })
  }

  #[test]
  fn orders_messages_and_drops_non_trade_quotes() {
    let data = RealTimeMarketData {
      contract_id: Some(3),
      quotes: vec![
        Quote { r#type: Some(1), scaled_price: Some(10), ..Default::default() },
        Quote { r#type: Some(0), scaled_price: Some(11), quote_utc_time: Some(5), volume: vol(2), ..Default::default() },
      ],
      market_values: vec![MarketValues { day_index: Some(0), ..Default::default() }],
      corrections: vec![Quote { r#type: Some(0), ..Default::default() }],
      detailed_dom: Some(DetailedDom {
        price_levels: vec![DetailedDomPriceLevel {
          side: Some(9),
          scaled_price: Some(1),
          orders: vec![DetailedDomOrder { order_id: None, volume: vol(4) }],
        }],
        is_snapshot: None,
      }),
      ..Default::default()
    };
    let batch = parse_real_time_market_data(&data);
    assert_eq!(batch.contract_id, 3);
    assert_eq!(batch.messages.len(), 4);
    assert_eq!(batch.messages[0], PushMessage::Trade(Trade { scaled_price: 11, volume: 2, utc_time: 5 }));
    assert!(matches!(batch.messages[1], PushMessage::MarketValues(_)));
    assert!(matches!(batch.messages[2], PushMessage::Correction(_)));
    match &batch.messages[3] {
      PushMessage::Dom(dom) => {
        assert_eq!(dom.levels[0].side, None);
        assert_eq!(dom.levels[0].order_volumes, vec![4]);
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
