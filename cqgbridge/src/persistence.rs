// cqgbridge/src/persistence.rs
//
// Downstream storage for flushed snapshots. Writes happen on a dedicated
// thread so a slow sink never stalls the relay loop.

use crate::aggregator::UpdateSnapshot;
use crate::base::BridgeError;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection as DbConnection};
use std::path::Path;
use std::thread::{self, JoinHandle};

/// Accepts one snapshot record.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSink: Send {
  fn save(&self, snapshot: &UpdateSnapshot) -> Result<(), BridgeError>;
}

/// Stores snapshots in a `market_data` table, nested parts as JSON text.
pub struct SqliteSnapshotSink {
  db: DbConnection,
}

impl SqliteSnapshotSink {
  pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, BridgeError> {
    info!("Opening snapshot store at {:?}", db_path.as_ref());
    let db = DbConnection::open(db_path)?;
    db.execute_batch(
      "CREATE TABLE IF NOT EXISTS market_data (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         contract_id INTEGER NOT NULL,
         is_snapshot INTEGER NOT NULL,
         trades TEXT NOT NULL,
         corrections TEXT NOT NULL,
         market_values TEXT NOT NULL,
         dom TEXT,
         timestamp INTEGER NOT NULL
       );
       CREATE INDEX IF NOT EXISTS idx_market_data_contract ON market_data (contract_id, timestamp);",
    )?;
    Ok(SqliteSnapshotSink { db })
  }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, BridgeError> {
  serde_json::to_string(value).map_err(|e| BridgeError::PersistenceError(format!("Snapshot serialization failed: {}", e)))
}

impl SnapshotSink for SqliteSnapshotSink {
  fn save(&self, snapshot: &UpdateSnapshot) -> Result<(), BridgeError> {
    let dom = match &snapshot.dom {
      Some(d) => Some(to_json(d)?),
      None => None,
    };
    self.db.execute(
      "INSERT INTO market_data (contract_id, is_snapshot, trades, corrections, market_values, dom, timestamp)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        snapshot.contract_id,
        snapshot.is_snapshot,
        to_json(&snapshot.trades)?,
        to_json(&snapshot.corrections)?,
        to_json(&snapshot.market_values)?,
        dom,
        Utc::now().timestamp_millis(),
      ],
    )?;
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
  pub saved: u64,
  pub failed: u64,
}

/// Background writer in front of a `SnapshotSink`. Failed saves are logged
/// and dropped.
pub struct PersistenceWorker {
  sender: Option<Sender<UpdateSnapshot>>,
  handle: Option<JoinHandle<PersistenceStats>>,
}

impl PersistenceWorker {
  pub fn spawn(sink: Box<dyn SnapshotSink>) -> Result<Self, BridgeError> {
    let (sender, receiver) = unbounded();
    let handle = thread::Builder::new()
      .name("snapshot-writer".to_string())
      .spawn(move || write_loop(sink, receiver))
      .map_err(|e| BridgeError::InternalError(format!("Failed to start snapshot writer: {}", e)))?;
    Ok(PersistenceWorker { sender: Some(sender), handle: Some(handle) })
  }

  /// Queues a snapshot. Never blocks.
  pub fn submit(&self, snapshot: UpdateSnapshot) {
    match &self.sender {
      Some(sender) => {
        if sender.send(snapshot).is_err() {
          warn!("Snapshot writer has stopped; dropping snapshot");
        }
      }
      None => warn!("Snapshot writer shut down; dropping snapshot"),
    }
  }

  /// Drains the queue and stops the writer.
  pub fn shutdown(mut self) -> Result<PersistenceStats, BridgeError> {
    self.stop()
  }

  fn stop(&mut self) -> Result<PersistenceStats, BridgeError> {
    self.sender.take();
    match self.handle.take() {
      Some(handle) => handle.join()
        .map_err(|_| BridgeError::InternalError("Snapshot writer panicked".to_string())),
      None => Ok(PersistenceStats::default()),
    }
  }
}

impl Drop for PersistenceWorker {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      error!("{}", e);
    }
  }
}

fn write_loop(sink: Box<dyn SnapshotSink>, receiver: Receiver<UpdateSnapshot>) -> PersistenceStats {
  let mut stats = PersistenceStats::default();
  for snapshot in receiver.iter() {
    match sink.save(&snapshot) {
      Ok(()) => stats.saved += 1,
      Err(e) => {
        stats.failed += 1;
        warn!("Failed to save snapshot for contract {}: {}", snapshot.contract_id, e);
      }
    }
  }
  debug!("Snapshot writer done: saved={}, failed={}", stats.saved, stats.failed);
  stats
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::aggregator::{SessionAggregate, TradeRecord};

  fn snapshot(contract_id: u32) -> UpdateSnapshot {
    UpdateSnapshot {
      contract_id,
      is_snapshot: false,
      trades: vec![TradeRecord { price: "1.0000".into(), volume: 2, utc_time: 3, local_time: String::new() }],
      corrections: vec![],
      dom: None,
      market_values: SessionAggregate { close: 1.0, volume: 2, ..Default::default() },
    }
  }

  #[test]
  fn sqlite_sink_writes_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.db");
    let sink = SqliteSnapshotSink::open(&path).unwrap();
    sink.save(&snapshot(7)).unwrap();
    sink.save(&snapshot(7)).unwrap();

    let db = DbConnection::open(&path).unwrap();
    let (count, market_values): (i64, String) = db.query_row(
      "SELECT COUNT(*), MAX(market_values) FROM market_data WHERE contract_id = 7", [], |r| Ok((r.get(0)?, r.get(1)?)),
    ).unwrap();
    assert_eq!(count, 2);
    let v: serde_json::Value = serde_json::from_str(&market_values).unwrap();
    assert_eq!(v["volume"], 2);
  }

  #[test]
  fn worker_logs_failures_and_keeps_going() {
    let mut sink = MockSnapshotSink::new();
    let mut seq = mockall::Sequence::new();
    sink.expect_save().times(1).in_sequence(&mut seq)
      .returning(|_| Err(BridgeError::PersistenceError("disk full".into())));
    sink.expect_save().times(1).in_sequence(&mut seq).returning(|_| Ok(()));

    let worker = PersistenceWorker::spawn(Box::new(sink)).unwrap();
    worker.submit(snapshot(1));
    worker.submit(snapshot(2));
    assert_eq!(worker.shutdown().unwrap(), PersistenceStats { saved: 1, failed: 1 });
  }
}
