// cqgbridge/src/handler.rs
// Handlers for events parsed from the server.
use std::sync::Arc;
use crate::data::{HistoricalReport, PushBatch};
use crate::protocol::InformationReport;

/// Logon / logoff results and connection lifecycle.
pub trait SessionHandler: Send + Sync {
  fn logon_result(&self, result_code: u32, text_message: &str, base_time: &str);
  fn logged_off(&self, logoff_reason: u32, text_message: &str);
  fn connection_closed(&self);
}

/// Information reports (symbol resolution).
pub trait ReferenceDataHandler: Send + Sync {
  /// All reports carried by one server message, in wire order.
  fn information_reports(&self, reports: &[InformationReport]);
  fn connection_closed(&self);
}

/// Pushed market data and historical bars.
pub trait MarketDataHandler: Send + Sync {
  fn real_time_market_data(&self, batch: PushBatch);
  fn time_bar_report(&self, report: HistoricalReport);
  fn connection_closed(&self);
}

/// Bundle of handlers the reader dispatches into.
#[derive(Clone)]
pub struct MessageHandler {
  pub session: Arc<dyn SessionHandler>,
  pub data_ref: Arc<dyn ReferenceDataHandler>,
  pub data_market: Arc<dyn MarketDataHandler>,
}

impl MessageHandler {
  pub fn new(
    session: Arc<dyn SessionHandler>,
    data_ref: Arc<dyn ReferenceDataHandler>,
    data_market: Arc<dyn MarketDataHandler>,
  ) -> Self {
    MessageHandler { session, data_ref, data_market }
  }

  /// Wake every waiter and end every stream.
  pub fn connection_closed(&self) {
    self.session.connection_closed();
    self.data_ref.connection_closed();
    self.data_market.connection_closed();
  }
}
