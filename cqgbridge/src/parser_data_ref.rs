// cqgbridge/src/parser_data_ref.rs
use std::sync::Arc;

use crate::handler::ReferenceDataHandler;
use crate::protocol::InformationReport;

/// Process the information reports of one server message.
pub fn process_information_reports(handler: &Arc<dyn ReferenceDataHandler>, reports: &[InformationReport]) {
  for report in reports {
    log::debug!("Information report: id={:?}, status={:?}, complete={:?}, resolution={}",
                report.id, report.status_code, report.is_report_complete,
                report.symbol_resolution_report.is_some());
  }
  handler.information_reports(reports);
}
