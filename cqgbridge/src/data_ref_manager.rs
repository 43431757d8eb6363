// cqgbridge/src/data_ref_manager.rs
use crate::base::BridgeError;
use crate::conn::MessageBroker;
use crate::contract::{ContractCache, ContractMetadata};
use crate::handler::ReferenceDataHandler;
use crate::protocol::InformationReport;
use crate::protocol_encoder::Encoder;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, info, warn};


// --- State for Pending Requests ---

#[derive(Debug)]
struct ResolveRequestState {
  symbol: String,
  // Filled with this request's reports from the first server message naming it.
  reports: Option<Vec<InformationReport>>,
}

#[derive(Debug, Default)]
struct RefState {
  requests: HashMap<u32, ResolveRequestState>,
  connection_closed: bool,
}

/// Applies the resolution rules to the reports answering one request.
///
/// No report, or a resolution report without metadata, is `NotFound`; a first
/// report that is not a symbol resolution report is `ProtocolError`.
pub fn resolve_from_reports(symbol: &str, reports: &[InformationReport]) -> Result<ContractMetadata, BridgeError> {
  let first = reports.first()
    .ok_or_else(|| BridgeError::NotFound(format!("No information report for '{}'", symbol)))?;
  let resolution = first.symbol_resolution_report.as_ref().ok_or_else(|| {
    BridgeError::ProtocolError(format!(
      "Information report for '{}' is not a symbol resolution (status {}, '{}')",
      symbol, first.status_code.unwrap_or(0), first.text_message.as_deref().unwrap_or("")))
  })?;
  let metadata = resolution.contract_metadata.as_ref()
    .ok_or_else(|| BridgeError::NotFound(format!("No contract metadata for '{}'", symbol)))?;
  ContractMetadata::from_wire(metadata)
}


// --- DataRefManager ---

pub struct DataRefManager {
  message_broker: Arc<MessageBroker>,
  cache: Arc<ContractCache>,
  state: Mutex<RefState>,
  request_cond: Condvar,
}

impl DataRefManager {
  pub(crate) fn new(message_broker: Arc<MessageBroker>, cache: Arc<ContractCache>) -> Arc<Self> {
    Arc::new(DataRefManager {
      message_broker,
      cache,
      state: Mutex::new(RefState::default()),
      request_cond: Condvar::new(),
    })
  }

  pub fn cache(&self) -> &Arc<ContractCache> {
    &self.cache
  }

  /// Cached metadata for a previously resolved symbol.
  pub fn contract_metadata(&self, symbol: &str) -> Option<ContractMetadata> {
    self.cache.get(symbol)
  }

  /// Resolves `symbol` and returns its contract id. Blocks for the answer.
  pub fn resolve_symbol(&self, symbol: &str, req_id: u32, subscribe: bool) -> Result<u32, BridgeError> {
    self.resolve_metadata(symbol, req_id, subscribe).map(|m| m.contract_id)
  }

  /// Resolves `symbol` with a fresh request id, subscribing to updates.
  pub fn resolve(&self, symbol: &str) -> Result<ContractMetadata, BridgeError> {
    let req_id = self.message_broker.next_request_id();
    self.resolve_metadata(symbol, req_id, true)
  }

  fn resolve_metadata(&self, symbol: &str, req_id: u32, subscribe: bool) -> Result<ContractMetadata, BridgeError> {
    info!("Resolving symbol '{}': ReqID={}, Subscribe={}", symbol, req_id, subscribe);
    if symbol.is_empty() {
      return Err(BridgeError::InvalidArgument("symbol must not be empty".to_string()));
    }
    let request = Encoder::new().encode_resolve_symbol(req_id, symbol, subscribe)?;

    {
      let mut state = self.state.lock();
      if state.connection_closed {
        return Err(BridgeError::NotConnected);
      }
      if state.requests.contains_key(&req_id) {
        return Err(BridgeError::InvalidArgument(format!("Duplicate request id {}", req_id)));
      }
      state.requests.insert(req_id, ResolveRequestState { symbol: symbol.to_string(), reports: None });
    }

    if let Err(e) = self.message_broker.send_message(&request) {
      self.state.lock().requests.remove(&req_id);
      return Err(e);
    }

    let reports = self.wait_for_reports(req_id)?;
    let metadata = resolve_from_reports(symbol, &reports)?;
    info!("Resolved '{}' to contract {} (scale {})", symbol, metadata.contract_id, metadata.price_scale);
    self.cache.insert_if_absent(symbol, metadata.clone());
    Ok(metadata)
  }

  // Waits until reports for `req_id` arrive or the connection closes. No timeout.
  fn wait_for_reports(&self, req_id: u32) -> Result<Vec<InformationReport>, BridgeError> {
    let mut state = self.state.lock();
    loop {
      match state.requests.get_mut(&req_id) {
        Some(entry) => {
          if let Some(reports) = entry.reports.take() {
            state.requests.remove(&req_id);
            return Ok(reports);
          }
        }
        None => {
          return Err(BridgeError::InternalError(format!("Request state for {} unexpectedly missing during wait", req_id)));
        }
      }
      if state.connection_closed {
        state.requests.remove(&req_id);
        return Err(BridgeError::ConnectionError(format!("Connection closed while resolving request {}", req_id)));
      }
      self.request_cond.wait(&mut state);
    }
  }
}

impl ReferenceDataHandler for DataRefManager {
  fn information_reports(&self, reports: &[InformationReport]) {
    // One message may answer several requests; keep each id's reports together.
    let mut groups: Vec<(Option<u32>, Vec<InformationReport>)> = Vec::new();
    for report in reports {
      match groups.iter_mut().find(|(id, _)| *id == report.id) {
        Some((_, group)) => group.push(report.clone()),
        None => groups.push((report.id, vec![report.clone()])),
      }
    }

    let mut state = self.state.lock();
    let mut routed = false;
    for (id, group) in groups {
      // A report without an id answers the oldest outstanding request.
      let target = id.or_else(|| state.requests.iter()
        .filter(|(_, s)| s.reports.is_none())
        .map(|(id, _)| *id)
        .min());
      match target.and_then(|id| state.requests.get_mut(&id).map(|s| (id, s))) {
        Some((id, entry)) if entry.reports.is_none() => {
          debug!("Routing {} information report(s) to request {} ('{}')", group.len(), id, entry.symbol);
          entry.reports = Some(group);
          routed = true;
        }
        Some((id, _)) => warn!("Duplicate information reports for request {}; ignoring", id),
        None => debug!("Information report for unknown request {:?}; ignoring", target),
      }
    }
    if routed {
      self.request_cond.notify_all();
    }
  }

  fn connection_closed(&self) {
    debug!("Reference data manager: connection closed");
    let mut state = self.state.lock();
    state.connection_closed = true;
    self.request_cond.notify_all();
  }
}
