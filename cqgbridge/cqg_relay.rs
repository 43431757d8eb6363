// cqgbridge/cqg_relay.rs
// Command-line relay: one backend session per invocation, JSON lines on stdout.
//
//   cqg_relay --config bridge.json realtime --symbol ESZ4
//   cqg_relay --config bridge.json historical --symbol ESZ4 --bar-type hourly --period month --number 2
//   cqg_relay --config bridge.json --replay <session> logon
//
// Closing stdin ends a streaming session.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cqgbridge::{
  contract::ContractCache,
  historical_range::BarUnit,
  persistence::{PersistenceWorker, SqliteSnapshotSink},
  relay::{self, Downstream, HistoricalQuery, RelayOptions},
  BridgeClient, BridgeConfig, BridgeError,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay backend market data as JSON lines", long_about = None)]
struct Args {
  /// Bridge configuration file (JSON).
  #[arg(long, default_value = "bridge.json")]
  config: PathBuf,

  /// Override the configured backend endpoint.
  #[arg(long)]
  endpoint: Option<String>,

  /// Replay a recorded session from the configured frame log instead of
  /// connecting.
  #[arg(long)]
  replay: Option<String>,

  #[clap(subcommand)]
  command: Command,
}

#[derive(Parser, Debug)]
enum Command {
  /// Log on, log off, and print the outcome.
  Logon,
  /// Stream aggregated real-time snapshots for a symbol.
  Realtime {
    #[arg(long)]
    symbol: String,
  },
  /// Fetch historical bars for a symbol.
  Historical {
    #[arg(long)]
    symbol: String,
    /// daily, hourly or minutely.
    #[arg(long, default_value = "daily")]
    bar_type: String,
    /// day, month or year.
    #[arg(long)]
    period: String,
    /// Number of periods to look back.
    #[arg(long)]
    number: i64,
  },
}

/// Stdout as the client connection; stdin reaching EOF means it left.
struct StdoutDownstream {
  closed: AtomicBool,
}

impl StdoutDownstream {
  fn new() -> Self {
    StdoutDownstream { closed: AtomicBool::new(false) }
  }
}

impl Downstream for StdoutDownstream {
  fn send_json(&self, value: &Value) -> Result<(), BridgeError> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(BridgeError::NotConnected);
    }
    let mut out = io::stdout().lock();
    writeln!(out, "{}", value)
      .and_then(|_| out.flush())
      .map_err(|e| BridgeError::ConnectionError(format!("stdout: {}", e)))
  }

  fn wait_for_disconnect(&self) {
    if let Err(e) = io::copy(&mut io::stdin().lock(), &mut io::sink()) {
      debug!("stdin read failed: {}", e);
    }
  }

  fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst) {
      if let Err(e) = io::stdout().flush() {
        debug!("stdout flush on close failed: {}", e);
      }
    }
  }
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
  let mut config = BridgeConfig::from_json_file(&args.config)
    .with_context(|| format!("loading {}", args.config.display()))?;
  if let Some(endpoint) = &args.endpoint {
    config.endpoint = endpoint.clone();
  }
  config.validate()?;
  Ok(config)
}

fn open_client(args: &Args, config: &BridgeConfig) -> Result<BridgeClient, BridgeError> {
  match &args.replay {
    Some(session_name) => {
      let frame_log = config.frame_log.as_ref()
        .ok_or_else(|| BridgeError::ConfigurationError("--replay needs frame_log in the config".to_string()))?;
      let db_path = frame_log.db_path.to_str()
        .ok_or_else(|| BridgeError::ConfigurationError("frame_log.db_path is not valid UTF-8".to_string()))?;
      info!("Replaying session '{}' from {}", session_name, db_path);
      BridgeClient::from_db(db_path, session_name)
    }
    None => BridgeClient::connect(config, Arc::new(ContractCache::new())),
  }
}

fn run_logon(client: &BridgeClient, config: &BridgeConfig, downstream: &StdoutDownstream) -> Result<()> {
  match client.session().logon(&config.credentials) {
    Ok(base_time_offset_ms) => {
      downstream.send_json(&json!({
        "success": true,
        "message": "Logon successful",
        "base_time_offset_ms": base_time_offset_ms,
      }))?;
      if let Err(e) = client.session().logoff() {
        error!("Logoff failed: {}", e);
      }
      client.close()?;
      Ok(())
    }
    Err(e) => {
      downstream.send_json(&json!({ "success": false, "error": format!("Logon failed: {}", e) }))?;
      client.close()?;
      Err(anyhow!(e))
    }
  }
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();
  let config = load_config(&args)?;
  let downstream = Arc::new(StdoutDownstream::new());

  let client = match open_client(&args, &config) {
    Ok(c) => Arc::new(c),
    Err(e) => {
      relay::report_setup_failure(downstream.as_ref(), "Connection", &e);
      return Err(e.into());
    }
  };

  match &args.command {
    Command::Logon => run_logon(&client, &config, &downstream),
    Command::Realtime { symbol } => {
      let persistence = match &config.persistence_db {
        Some(path) => Some(Arc::new(PersistenceWorker::spawn(Box::new(SqliteSnapshotSink::open(path)?))?)),
        None => None,
      };
      let options = RelayOptions {
        subscription_level: config.subscription_level,
        display_tz: config.display_tz()?,
        persistence,
      };
      let end = relay::run_realtime(client, downstream, &config.credentials, symbol, &options)?;
      info!("Real-time relay finished: {:?}", end);
      Ok(())
    }
    Command::Historical { symbol, bar_type, period, number } => {
      let bar_unit = match bar_type.parse::<BarUnit>() {
        Ok(unit) => unit,
        Err(e) => {
          relay::report_setup_failure(downstream.as_ref(), "Historical request", &e);
          client.close()?;
          return Err(e.into());
        }
      };
      let query = HistoricalQuery { symbol: symbol.clone(), bar_unit, period: period.clone(), count: *number };
      let end = relay::run_historical(client, downstream, &config.credentials, &query)?;
      info!("Historical relay finished: {:?}", end);
      Ok(())
    }
  }
}
