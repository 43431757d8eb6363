// cqgbridge/src/relay.rs
//
// Per-client session relays: set up the backend session, then run the
// backend-relay loop and the client liveness loop until either ends.

use crate::aggregator::AggregationEngine;
use crate::base::BridgeError;
use crate::client::BridgeClient;
use crate::config::Credentials;
use crate::contract::ContractMetadata;
use crate::historical_range::{bar_window_from_now, BarUnit};
use crate::persistence::PersistenceWorker;
use chrono_tz::Tz;
use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

pub const CONNECTION_CLOSED_NOTICE: &str = "Connection closed";

/// The front-facing client connection.
pub trait Downstream: Send + Sync {
  /// Writes one JSON record.
  fn send_json(&self, value: &Value) -> Result<(), BridgeError>;
  /// Blocks until the client goes away.
  fn wait_for_disconnect(&self);
  /// Must be idempotent.
  fn close(&self);
}

/// How a relay ended once setup succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
  /// The backend connection dropped.
  BackendClosed,
  ClientDisconnected,
  /// Every historical report was relayed.
  Completed,
}

#[derive(Clone)]
pub struct RelayOptions {
  pub subscription_level: u32,
  pub display_tz: Tz,
  pub persistence: Option<Arc<PersistenceWorker>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
  pub symbol: String,
  pub bar_unit: BarUnit,
  /// "day", "month" or "year".
  pub period: String,
  pub count: i64,
}

pub fn error_notice(message: &str) -> Value {
  json!({ "error": message })
}

/// Sends a `<stage> failed: <reason>` notice and closes the downstream.
pub fn report_setup_failure(downstream: &dyn Downstream, stage: &str, err: &BridgeError) {
  warn!("{} failed: {}", stage, err);
  if let Err(e) = downstream.send_json(&error_notice(&format!("{} failed: {}", stage, err))) {
    debug!("Could not deliver setup failure notice: {}", e);
  }
  downstream.close();
}

// Close-once guards shared by the coordinator and both loops.
struct CloseGuards {
  backend: AtomicBool,
  downstream: AtomicBool,
}

impl CloseGuards {
  fn new() -> Self {
    CloseGuards { backend: AtomicBool::new(false), downstream: AtomicBool::new(false) }
  }

  fn close_backend(&self, client: &BridgeClient) {
    if !self.backend.swap(true, Ordering::SeqCst) {
      if let Err(e) = client.close() {
        warn!("Error closing backend connection: {}", e);
      }
    }
  }

  fn close_downstream(&self, downstream: &dyn Downstream) {
    if !self.downstream.swap(true, Ordering::SeqCst) {
      downstream.close();
    }
  }

  fn downstream_closed(&self) -> bool {
    self.downstream.load(Ordering::SeqCst)
  }
}

fn signal(done: &Sender<RelayEnd>, end: RelayEnd) {
  // One slot: only the first signal is kept.
  if done.try_send(end).is_err() {
    debug!("Relay already completing; dropped {:?}", end);
  }
}

// Runs `backend_loop` and the liveness loop, consumes the first completion
// signal, then tears both sides down exactly once.
fn run_loops<F>(client: Arc<BridgeClient>, downstream: Arc<dyn Downstream>, backend_loop: F) -> Result<RelayEnd, BridgeError>
where
  F: FnOnce(&dyn Downstream, &CloseGuards) -> RelayEnd + Send + 'static,
{
  let (done_tx, done_rx) = bounded::<RelayEnd>(1);
  let guards = Arc::new(CloseGuards::new());

  let backend_handle = {
    let done = done_tx.clone();
    let downstream = downstream.clone();
    let guards = guards.clone();
    thread::Builder::new()
      .name("backend-relay".to_string())
      .spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend_loop(downstream.as_ref(), guards.as_ref())));
        let end = match outcome {
          Ok(end) => end,
          Err(_) => {
            error!("Backend relay loop panicked");
            notify_backend_closed(downstream.as_ref(), guards.as_ref());
            RelayEnd::BackendClosed
          }
        };
        signal(&done, end);
      })
      .map_err(|e| BridgeError::InternalError(format!("Failed to start backend relay: {}", e)))?
  };

  {
    let done = done_tx;
    let downstream = downstream.clone();
    // Detached: a blocked client read may never return.
    thread::Builder::new()
      .name("client-liveness".to_string())
      .spawn(move || {
        downstream.wait_for_disconnect();
        debug!("Client disconnected");
        signal(&done, RelayEnd::ClientDisconnected);
      })
      .map_err(|e| BridgeError::InternalError(format!("Failed to start liveness loop: {}", e)))?;
  }

  let end = done_rx.recv()
    .map_err(|_| BridgeError::InternalError("Relay loops ended without a completion signal".to_string()))?;
  info!("Relay ending: {:?}", end);

  // Downstream first, so the backend loop does not report our own close.
  guards.close_downstream(downstream.as_ref());
  guards.close_backend(&client);
  if backend_handle.join().is_err() {
    error!("Backend relay thread panicked");
  }
  Ok(end)
}

fn notify_backend_closed(downstream: &dyn Downstream, guards: &CloseGuards) {
  if guards.downstream_closed() {
    return;
  }
  if let Err(e) = downstream.send_json(&error_notice(CONNECTION_CLOSED_NOTICE)) {
    debug!("Could not deliver close notice: {}", e);
  }
}

fn close_after_setup_failure(client: &BridgeClient) {
  if let Err(e) = client.close() {
    warn!("Error closing backend connection after failed setup: {}", e);
  }
}

fn logon_and_resolve(
  client: &BridgeClient,
  downstream: &dyn Downstream,
  credentials: &Credentials,
  symbol: &str,
) -> Result<(i64, ContractMetadata), BridgeError> {
  let base_time_offset_ms = client.session().logon(credentials)
    .map_err(|e| { report_setup_failure(downstream, "Logon", &e); e })?;
  let metadata = client.data_ref().resolve(symbol)
    .map_err(|e| { report_setup_failure(downstream, "Symbol resolution", &e); e })?;
  Ok((base_time_offset_ms, metadata))
}

/// Streams aggregated real-time snapshots for `symbol` to the downstream.
pub fn run_realtime(
  client: Arc<BridgeClient>,
  downstream: Arc<dyn Downstream>,
  credentials: &Credentials,
  symbol: &str,
  options: &RelayOptions,
) -> Result<RelayEnd, BridgeError> {
  let setup = logon_and_resolve(&client, downstream.as_ref(), credentials, symbol).and_then(|(_, metadata)| {
    let request_id = client.next_request_id();
    client.data_market().subscribe_market_data(metadata.contract_id, request_id, options.subscription_level)
      .map(|stream| (metadata, stream))
      .map_err(|e| { report_setup_failure(downstream.as_ref(), "Subscription", &e); e })
  });
  let (metadata, stream) = match setup {
    Ok(s) => s,
    Err(e) => {
      close_after_setup_failure(&client);
      return Err(e);
    }
  };
  info!("Relaying real-time data for '{}' (contract {})", symbol, metadata.contract_id);

  let mut engine = AggregationEngine::new(&metadata, options.display_tz);
  let persistence = options.persistence.clone();
  run_loops(client, downstream, move |downstream, guards| {
    while let Some(batch) = stream.next_batch() {
      let snapshot = match engine.process_batch(&batch) {
        Some(s) => s,
        None => continue,
      };
      match serde_json::to_value(&snapshot) {
        Ok(value) => {
          if let Err(e) = downstream.send_json(&value) {
            debug!("Downstream write failed: {}", e);
            return RelayEnd::ClientDisconnected;
          }
        }
        Err(e) => error!("Snapshot not serializable: {}", e),
      }
      if let Some(worker) = &persistence {
        worker.submit(snapshot);
      }
    }
    notify_backend_closed(downstream, guards);
    RelayEnd::BackendClosed
  })
}

/// Relays historical time-bar reports for `query` until the last one.
pub fn run_historical(
  client: Arc<BridgeClient>,
  downstream: Arc<dyn Downstream>,
  credentials: &Credentials,
  query: &HistoricalQuery,
) -> Result<RelayEnd, BridgeError> {
  let setup = logon_and_resolve(&client, downstream.as_ref(), credentials, &query.symbol).and_then(|(base, metadata)| {
    let request_id = client.next_request_id();
    bar_window_from_now(query.bar_unit, &query.period, query.count, base)
      .and_then(|window| client.data_market().request_historical_bars(request_id, metadata.contract_id, &window))
      .map_err(|e| { report_setup_failure(downstream.as_ref(), "Historical request", &e); e })
  });
  let stream = match setup {
    Ok(s) => s,
    Err(e) => {
      close_after_setup_failure(&client);
      return Err(e);
    }
  };
  info!("Relaying {} {} of {} bars for '{}'", query.count, query.period, query.bar_unit, query.symbol);

  run_loops(client, downstream, move |downstream, guards| {
    while let Some(report) = stream.next_report() {
      let complete = report.is_report_complete;
      match serde_json::to_value(&report) {
        Ok(value) => {
          if let Err(e) = downstream.send_json(&value) {
            debug!("Downstream write failed: {}", e);
            return RelayEnd::ClientDisconnected;
          }
        }
        Err(e) => error!("Report not serializable: {}", e),
      }
      if complete {
        return RelayEnd::Completed;
      }
    }
    notify_backend_closed(downstream, guards);
    RelayEnd::BackendClosed
  })
}
