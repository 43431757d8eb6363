// cqgbridge/src/data_market_manager.rs

use crate::base::BridgeError;
use crate::conn::MessageBroker;
use crate::data::{HistoricalReport, PushBatch};
use crate::handler::MarketDataHandler;
use crate::historical_range::BarWindow;
use crate::protocol_encoder::Encoder;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum MarketDataEvent {
  Batch(PushBatch),
  /// Backend connection ended; no further batches.
  Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoricalEvent {
  Report(HistoricalReport),
  Closed,
}

/// Pushes for one subscribed contract, in arrival order.
#[derive(Debug)]
pub struct MarketDataStream {
  contract_id: u32,
  request_id: u32,
  receiver: Receiver<MarketDataEvent>,
}

impl MarketDataStream {
  pub fn contract_id(&self) -> u32 { self.contract_id }
  pub fn request_id(&self) -> u32 { self.request_id }

  /// Blocks for the next batch. `None` once the connection has closed.
  pub fn next_batch(&self) -> Option<PushBatch> {
    match self.receiver.recv() {
      Ok(MarketDataEvent::Batch(batch)) => Some(batch),
      Ok(MarketDataEvent::Closed) | Err(_) => None,
    }
  }
}

/// Time-bar reports for one historical request.
#[derive(Debug)]
pub struct HistoricalStream {
  request_id: u32,
  receiver: Receiver<HistoricalEvent>,
}

impl HistoricalStream {
  pub fn request_id(&self) -> u32 { self.request_id }

  /// Blocks for the next report. `None` after the complete report has been
  /// returned, or once the connection has closed.
  pub fn next_report(&self) -> Option<HistoricalReport> {
    match self.receiver.recv() {
      Ok(HistoricalEvent::Report(report)) => Some(report),
      Ok(HistoricalEvent::Closed) | Err(_) => None,
    }
  }
}

#[derive(Default)]
struct MarketState {
  // contract_id -> (request_id, sender)
  subscriptions: HashMap<u32, Vec<(u32, Sender<MarketDataEvent>)>>,
  // request_id -> sender
  historical: HashMap<u32, Sender<HistoricalEvent>>,
  connection_closed: bool,
}

pub struct DataMarketManager {
  message_broker: Arc<MessageBroker>,
  state: Mutex<MarketState>,
}

impl DataMarketManager {
  pub(crate) fn new(message_broker: Arc<MessageBroker>) -> Arc<Self> {
    Arc::new(DataMarketManager {
      message_broker,
      state: Mutex::new(MarketState::default()),
    })
  }

  pub fn next_request_id(&self) -> u32 {
    self.message_broker.next_request_id()
  }

  /// Subscribes to real-time data for a resolved contract. The stream is
  /// registered before the request goes out, so no push is missed.
  pub fn subscribe_market_data(&self, contract_id: u32, request_id: u32, level: u32) -> Result<MarketDataStream, BridgeError> {
    info!("Subscribing to market data: ContractID={}, ReqID={}, Level={}", contract_id, request_id, level);
    if contract_id == 0 {
      return Err(BridgeError::InvalidArgument("contract_id must not be zero".to_string()));
    }
    let request = Encoder::new().encode_market_data_subscription(request_id, contract_id, level)?;

    let (sender, receiver) = unbounded();
    {
      let mut state = self.state.lock();
      if state.connection_closed {
        return Err(BridgeError::NotConnected);
      }
      state.subscriptions.entry(contract_id).or_default().push((request_id, sender));
    }

    if let Err(e) = self.message_broker.send_message(&request) {
      let mut state = self.state.lock();
      if let Some(subs) = state.subscriptions.get_mut(&contract_id) {
        subs.retain(|(id, _)| *id != request_id);
      }
      return Err(e);
    }
    Ok(MarketDataStream { contract_id, request_id, receiver })
  }

  /// Requests historical bars for `window`. Reports stream back until one is
  /// marked complete.
  pub fn request_historical_bars(&self, request_id: u32, contract_id: u32, window: &BarWindow) -> Result<HistoricalStream, BridgeError> {
    info!("Requesting historical bars: ReqID={}, ContractID={}, Unit={}, Bars={}",
          request_id, contract_id, window.bar_unit, window.bar_count);
    if window.bar_count <= 0 {
      return Err(BridgeError::InvalidArgument(format!("bar_count must be positive, got {}", window.bar_count)));
    }
    let request = Encoder::new().encode_time_bar_request(request_id, contract_id, window)?;

    let (sender, receiver) = unbounded();
    {
      let mut state = self.state.lock();
      if state.connection_closed {
        return Err(BridgeError::NotConnected);
      }
      if state.historical.contains_key(&request_id) {
        return Err(BridgeError::InvalidArgument(format!("Duplicate request id {}", request_id)));
      }
      state.historical.insert(request_id, sender);
    }

    if let Err(e) = self.message_broker.send_message(&request) {
      self.state.lock().historical.remove(&request_id);
      return Err(e);
    }
    Ok(HistoricalStream { request_id, receiver })
  }
}

impl MarketDataHandler for DataMarketManager {
  fn real_time_market_data(&self, batch: PushBatch) {
    let mut state = self.state.lock();
    let contract_id = batch.contract_id;
    match state.subscriptions.get_mut(&contract_id) {
      Some(subs) => {
        subs.retain(|(request_id, sender)| {
          let alive = sender.send(MarketDataEvent::Batch(batch.clone())).is_ok();
          if !alive {
            debug!("Dropping closed market data stream: ContractID={}, ReqID={}", contract_id, request_id);
          }
          alive
        });
        if subs.is_empty() {
          state.subscriptions.remove(&contract_id);
        }
      }
      None => trace!("Market data for unsubscribed contract {}", contract_id),
    }
  }

  fn time_bar_report(&self, report: HistoricalReport) {
    let mut state = self.state.lock();
    let request_id = report.request_id;
    let complete = report.is_report_complete;
    match state.historical.get(&request_id) {
      Some(sender) => {
        if sender.send(HistoricalEvent::Report(report)).is_err() || complete {
          state.historical.remove(&request_id);
        }
      }
      None => warn!("Time bar report for unknown request {}", request_id),
    }
  }

  fn connection_closed(&self) {
    debug!("Market data manager: connection closed");
    let mut state = self.state.lock();
    state.connection_closed = true;
    for (_, subs) in state.subscriptions.drain() {
      for (_, sender) in subs {
        let _ = sender.send(MarketDataEvent::Closed);
      }
    }
    for (_, sender) in state.historical.drain() {
      let _ = sender.send(HistoricalEvent::Closed);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::BridgeClient;
  use crate::conn_mock::{MockConnection, MockMessage};
  use crate::data::PushMessage;
  use crate::historical_range::{compute_bar_window, BarUnit};
  use crate::protocol::{
    ClientMsg, Quote, RealTimeMarketData, ServerMsg, TimeBar, TimeBarParameters, TimeBarReport, TimeBarRequest,
  };
  use crate::test_support::*;

  fn trade_push(contract_id: u32, price: i64) -> ServerMsg {
    ServerMsg {
      real_time_market_data: vec![RealTimeMarketData {
        contract_id: Some(contract_id),
        quotes: vec![Quote { r#type: Some(0), scaled_price: Some(price), quote_utc_time: Some(1), volume: dec(1), ..Default::default() }],
        ..Default::default()
      }],
      ..Default::default()
    }
  }

  #[test]
  fn zero_contract_is_invalid_argument() {
    let client = BridgeClient::from_connection(Box::new(MockConnection::new(vec![])), None, None);
    assert!(matches!(client.data_market().subscribe_market_data(0, 2, 1), Err(BridgeError::InvalidArgument(_))));
  }

  #[test]
  fn pushes_reach_matching_stream_until_close() {
    let conn = MockConnection::new(vec![
      MockMessage::Send(subscription_msg(2, 1234, 1)),
      MockMessage::Recv(trade_push(1234, 100)),
      MockMessage::Recv(trade_push(999, 5)),
      MockMessage::Recv(trade_push(1234, 101)),
    ]).with_close_at_end(true);
    let client = BridgeClient::from_connection(Box::new(conn), None, None);
    let stream = client.data_market().subscribe_market_data(1234, 2, 1).unwrap();

    let prices: Vec<i64> = std::iter::from_fn(|| stream.next_batch())
      .flat_map(|b| b.messages)
      .filter_map(|m| match m { PushMessage::Trade(t) => Some(t.scaled_price), _ => None })
      .collect();
    assert_eq!(prices, vec![100, 101]);
  }

  #[test]
  fn corrupt_frame_between_pushes_is_skipped() {
    let conn = MockConnection::new(vec![
      MockMessage::Send(subscription_msg(2, 1234, 1)),
      MockMessage::Recv(trade_push(1234, 100)),
      MockMessage::RecvRaw(vec![0x0a, 0xff, 0xff, 0xff]),
      MockMessage::Recv(trade_push(1234, 102)),
    ]).with_close_at_end(true);
    let client = BridgeClient::from_connection(Box::new(conn), None, None);
    let stream = client.data_market().subscribe_market_data(1234, 2, 1).unwrap();

    let batches: Vec<PushBatch> = std::iter::from_fn(|| stream.next_batch()).collect();
    assert_eq!(batches.len(), 2);
    let prices: Vec<i64> = batches.into_iter()
      .flat_map(|b| b.messages)
      .filter_map(|m| match m { PushMessage::Trade(t) => Some(t.scaled_price), _ => None })
      .collect();
    assert_eq!(prices, vec![100, 102]);
  }

  #[test]
  fn historical_reports_end_at_complete() {
    let window = compute_bar_window(BarUnit::Daily, "day", 2, BASE_TIME_MS + 10 * 86_400_000, BASE_TIME_MS).unwrap();
    let expected = ClientMsg {
      time_bar_requests: vec![TimeBarRequest {
        request_id: Some(2),
        time_bar_parameters: Some(TimeBarParameters {
          contract_id: Some(1234),
          bar_unit: Some(6),
          from_utc_time: Some(8 * 86_400_000),
          to_utc_time: None,
        }),
        request_type: Some(1),
      }],
      ..Default::default()
    };
    let report = |complete: bool, bars: usize| ServerMsg {
      time_bar_reports: vec![TimeBarReport {
        request_id: Some(2),
        status_code: Some(0),
        is_report_complete: Some(complete),
        up_to_utc_time: Some(55),
        time_bars: vec![TimeBar { bar_utc_time: Some(1), scaled_close_price: Some(9), ..Default::default() }; bars],
        ..Default::default()
      }],
      ..Default::default()
    };
    let conn = MockConnection::new(vec![
      MockMessage::Send(expected),
      MockMessage::Recv(report(false, 2)),
      MockMessage::Recv(report(true, 1)),
    ]);
    let client = BridgeClient::from_connection(Box::new(conn), None, None);
    let stream = client.data_market().request_historical_bars(2, 1234, &window).unwrap();

    let first = stream.next_report().unwrap();
    assert_eq!(first.bars.len(), 2);
    assert!(!first.is_report_complete);
    let last = stream.next_report().unwrap();
    assert!(last.is_report_complete);
    assert_eq!(last.up_to_utc_time, 55);
    assert!(stream.next_report().is_none());
  }
}
