// cqgbridge/src/conn.rs

use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use crate::base::BridgeError;
use crate::conn_log::{ConnectionLogger, LogDirection};
use crate::handler::MessageHandler;
pub use socket::WsConnection;

/// Basic connection interface to the backend.
pub trait Connection: Send {
  fn is_connected(&self) -> bool;

  /// Idempotent.
  fn disconnect(&mut self) -> Result<(), BridgeError>;

  /// Send one encoded `ClientMsg` as a single binary frame.
  fn send_message_body(&mut self, data: &[u8]) -> Result<(), BridgeError>;

  /// Set the handler for incoming messages. Starts delivery.
  fn set_message_handler(&mut self, handler: MessageHandler);
}

mod socket {
  use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
  use log::{debug, error, info, warn};
  use std::io::ErrorKind;
  use std::net::{Shutdown, TcpStream};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;
  use tungstenite::http::Uri;
  use tungstenite::stream::MaybeTlsStream;
  use tungstenite::{Message, WebSocket};

  use super::Connection;
  use crate::base::BridgeError;
  use crate::conn_log::{ConnectionLogger, LogDirection};
  use crate::handler::MessageHandler;
  use crate::message_parser::{decode_server_msg, dispatch_message};
  use crate::protocol::ServerMsg;

  /// How long a read may block before queued writes get a turn.
  const POLL_INTERVAL: Duration = Duration::from_millis(20);

  type BackendSocket = WebSocket<MaybeTlsStream<TcpStream>>;

  fn dial_target(endpoint: &str) -> Result<(String, u16), BridgeError> {
    let uri: Uri = endpoint.parse()
      .map_err(|e| BridgeError::ConnectionError(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
    let default_port = match uri.scheme_str() {
      Some("ws") => 80,
      Some("wss") => 443,
      Some(other) => {
        return Err(BridgeError::ConnectionError(format!(
          "Unsupported scheme '{}' in '{}'; expected ws:// or wss://", other, endpoint)));
      }
      None => return Err(BridgeError::ConnectionError(format!("Missing scheme in '{}'", endpoint))),
    };
    let host = uri.host()
      .ok_or_else(|| BridgeError::ConnectionError(format!("Missing host in '{}'", endpoint)))?;
    Ok((host.to_string(), uri.port_u16().unwrap_or(default_port)))
  }

  fn is_poll_timeout(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == ErrorKind::WouldBlock || io.kind() == ErrorKind::TimedOut)
  }

  enum Command {
    Send(Vec<u8>, Option<Sender<Result<(), BridgeError>>>),
    Close,
  }

  /// The WebSocket with its frame log. Owned by the I/O thread once a handler
  /// is installed.
  struct FrameSocket {
    socket: BackendSocket,
    logger: Option<ConnectionLogger>,
  }

  impl FrameSocket {
    /// Next server message, or `None` when the poll interval passes first.
    ///
    /// An undecodable frame yields `DecodeError` and the socket stays usable.
    /// Any transport failure, including an orderly close, yields
    /// `ConnectionError` and ends the stream.
    fn receive_message(&mut self) -> Result<Option<ServerMsg>, BridgeError> {
      loop {
        let message = match self.socket.read() {
          Ok(message) => message,
          Err(e) if is_poll_timeout(&e) => return Ok(None),
          Err(e) => return Err(BridgeError::ConnectionError(format!("Read failed: {}", e))),
        };
        match message {
          Message::Binary(data) => {
            if let Some(logger) = &self.logger {
              logger.log_message(LogDirection::Recv, &data);
            }
            return decode_server_msg(&data).map(Some);
          }
          Message::Text(text) => {
            return Err(BridgeError::DecodeError(format!("Unexpected text frame ({} bytes)", text.len())));
          }
          Message::Close(frame) => {
            return Err(BridgeError::ConnectionError(format!("Closed by peer: {:?}", frame)));
          }
          // Ping/pong are answered inside tungstenite.
          _ => continue,
        }
      }
    }

    fn send_frame(&mut self, data: &[u8]) -> Result<(), BridgeError> {
      self.socket.send(Message::Binary(data.to_vec()))
        .map_err(|e| BridgeError::ConnectionError(format!("Write failed: {}", e)))
    }

    /// Best effort close frame.
    fn close(&mut self) {
      if let Err(e) = self.socket.close(None) {
        debug!("Close frame not sent: {}", e);
      }
    }
  }

  /// Runs queued writes, then reads for at most one poll interval.
  fn run_io_loop(mut frames: FrameSocket, commands: Receiver<Command>, handler: &MessageHandler, stop_flag: &AtomicBool) {
    loop {
      loop {
        match commands.try_recv() {
          Ok(Command::Send(data, reply)) => {
            let result = frames.send_frame(&data);
            match reply {
              Some(reply) => {
                if reply.send(result).is_err() {
                  debug!("Writer gave up waiting for its result");
                }
              }
              None => {
                if let Err(e) = result {
                  warn!("Queued write failed: {}", e);
                }
              }
            }
          }
          Ok(Command::Close) => {
            frames.close();
            return;
          }
          Err(TryRecvError::Empty) => break,
          Err(TryRecvError::Disconnected) => {
            frames.close();
            return;
          }
        }
      }
      if stop_flag.load(Ordering::SeqCst) {
        frames.close();
        return;
      }
      match frames.receive_message() {
        Ok(Some(msg)) => dispatch_message(handler, &msg),
        Ok(None) => {}
        Err(BridgeError::DecodeError(e)) => {
          warn!("Dropping undecodable frame: {}", e);
        }
        Err(e) => {
          if stop_flag.load(Ordering::SeqCst) {
            debug!("I/O thread stopping: {}", e);
          } else {
            error!("Connection lost in I/O thread: {}", e);
          }
          return;
        }
      }
    }
  }

  /// WebSocket connection to the backend (ws:// or wss://) that dispatches
  /// messages to a handler.
  pub struct WsConnection {
    endpoint: String,
    connected: bool,
    /// Raw TCP handle, shared with the (possibly TLS-wrapped) socket.
    control: TcpStream,
    frames: Option<FrameSocket>,
    commands: Option<Sender<Command>>,
    io_thread: Option<thread::JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
  }

  impl WsConnection {
    /// Dial `endpoint` and complete the TLS (for wss://) and WebSocket
    /// handshakes. Every failure is a `ConnectionError`.
    pub fn connect(endpoint: &str, logger: Option<ConnectionLogger>) -> Result<Self, BridgeError> {
      let (host, port) = dial_target(endpoint)?;
      info!("Connecting to backend at {}", endpoint);

      let stream = TcpStream::connect((host.as_str(), port))
        .map_err(|e| BridgeError::ConnectionError(format!("Connect to {}:{} failed: {}", host, port, e)))?;
      stream.set_nodelay(true)
        .map_err(|e| BridgeError::ConnectionError(format!("Failed to set TCP_NODELAY: {}", e)))?;
      let control = stream.try_clone()
        .map_err(|e| BridgeError::ConnectionError(format!("Cloning stream handle: {}", e)))?;

      let (socket, response) = tungstenite::client_tls(endpoint, stream)
        .map_err(|e| BridgeError::ConnectionError(format!("WebSocket handshake failed: {}", e)))?;
      debug!("Handshake response status: {}", response.status());
      control.set_read_timeout(Some(POLL_INTERVAL))
        .map_err(|e| BridgeError::ConnectionError(format!("Failed to set read timeout: {}", e)))?;

      info!("Connected to backend at {}", endpoint);
      Ok(WsConnection {
        endpoint: endpoint.to_string(),
        connected: true,
        control,
        frames: Some(FrameSocket { socket, logger }),
        commands: None,
        io_thread: None,
        stop_flag: Arc::new(AtomicBool::new(false)),
      })
    }

    fn on_io_thread(&self) -> bool {
      self.io_thread.as_ref().map_or(false, |h| h.thread().id() == thread::current().id())
    }

    fn start_io_thread(&mut self, handler: MessageHandler) -> Result<(), BridgeError> {
      if self.io_thread.is_some() { return Ok(()); }
      let frames = self.frames.take()
        .ok_or_else(|| BridgeError::InternalError("Socket already handed off".to_string()))?;
      let (tx, rx) = unbounded();
      self.stop_flag.store(false, Ordering::SeqCst);
      let stop_flag = self.stop_flag.clone();

      let handle = thread::Builder::new()
        .name("backend-reader".to_string())
        .spawn(move || {
          debug!("I/O thread started");
          run_io_loop(frames, rx, &handler, &stop_flag);
          stop_flag.store(true, Ordering::SeqCst);
          handler.connection_closed();
          debug!("I/O thread ended");
        })
        .map_err(|e| BridgeError::InternalError(format!("Spawning I/O thread: {}", e)))?;

      self.commands = Some(tx);
      self.io_thread = Some(handle);
      Ok(())
    }

    fn shutdown_stream(&self) {
      if let Err(e) = self.control.shutdown(Shutdown::Both) {
        if e.kind() != ErrorKind::NotConnected {
          warn!("Error shutting down socket: {}", e);
        }
      }
    }
  }

  impl Connection for WsConnection {
    fn is_connected(&self) -> bool {
      self.connected && !self.stop_flag.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) -> Result<(), BridgeError> {
      if !self.connected && self.io_thread.is_none() { return Ok(()); }
      info!("Disconnecting from {}", self.endpoint);

      self.stop_flag.store(true, Ordering::SeqCst);
      if let Some(commands) = self.commands.take() {
        if commands.send(Command::Close).is_err() {
          debug!("I/O thread already gone");
        }
      }
      if let Some(mut frames) = self.frames.take() {
        frames.close();
      }
      match self.io_thread.take() {
        Some(handle) if handle.thread().id() == thread::current().id() => {
          // The loop sees the Close command once this dispatch returns.
          debug!("Disconnect called from I/O thread; not joining");
        }
        Some(handle) => {
          if let Err(e) = handle.join() {
            error!("Error joining I/O thread: {:?}", e);
          }
          self.shutdown_stream();
        }
        None => self.shutdown_stream(),
      }
      self.connected = false;
      info!("Disconnected from {}", self.endpoint);
      Ok(())
    }

    fn send_message_body(&mut self, data: &[u8]) -> Result<(), BridgeError> {
      if !self.is_connected() { return Err(BridgeError::NotConnected); }
      if let Some(frames) = self.frames.as_mut() {
        return frames.send_frame(data);
      }
      let commands = self.commands.as_ref().ok_or(BridgeError::NotConnected)?;
      if self.on_io_thread() {
        return commands.send(Command::Send(data.to_vec(), None))
          .map_err(|_| BridgeError::NotConnected);
      }
      let (reply_tx, reply_rx) = bounded(1);
      commands.send(Command::Send(data.to_vec(), Some(reply_tx)))
        .map_err(|_| BridgeError::NotConnected)?;
      reply_rx.recv()
        .unwrap_or_else(|_| Err(BridgeError::ConnectionError("Connection closed before write".to_string())))
    }

    fn set_message_handler(&mut self, handler: MessageHandler) {
      if self.io_thread.is_some() {
        error!("I/O thread already running; handler not replaced");
        return;
      }
      if let Err(e) = self.start_io_thread(handler) {
        error!("Failed to start I/O thread: {:?}", e);
        if let Err(e) = self.disconnect() {
          error!("Disconnect after failed start: {}", e);
        }
      }
    }
  }

  impl Drop for WsConnection {
    fn drop(&mut self) {
      if self.connected || self.io_thread.is_some() {
        if let Err(e) = self.disconnect() {
          error!("Disconnect on drop failed: {}", e);
        }
      }
    }
  }

  #[cfg(test)]
  mod tests {
    use super::*;
    use crate::client::BridgeClient;
    use crate::test_support::*;
    use prost::Message as _;
    use std::net::TcpListener;

    #[test]
    fn endpoint_parsing() {
      assert_eq!(dial_target("ws://127.0.0.1:9000/api").unwrap(), ("127.0.0.1".to_string(), 9000));
      assert_eq!(dial_target("ws://demo.example.com/").unwrap(), ("demo.example.com".to_string(), 80));
      assert_eq!(dial_target("wss://demo.example.com/").unwrap(), ("demo.example.com".to_string(), 443));
      assert!(matches!(dial_target("http://demo.example.com/"), Err(BridgeError::ConnectionError(_))));
      assert!(matches!(dial_target("not a url"), Err(BridgeError::ConnectionError(_))));
    }

    #[test]
    fn connect_refused_is_connection_error() {
      // Bind then drop to get a port nothing listens on.
      let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
      let err = WsConnection::connect(&format!("ws://127.0.0.1:{}/", port), None).err().unwrap();
      assert!(matches!(err, BridgeError::ConnectionError(_)));
      let err = WsConnection::connect(&format!("wss://127.0.0.1:{}/", port), None).err().unwrap();
      assert!(matches!(err, BridgeError::ConnectionError(_)));
    }

    #[test]
    fn corrupt_frame_is_skipped_on_live_socket() {
      let listener = TcpListener::bind("127.0.0.1:0").unwrap();
      let port = listener.local_addr().unwrap().port();
      let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = match tungstenite::accept(stream) {
          Ok(ws) => ws,
          Err(e) => panic!("server handshake failed: {}", e),
        };
        let request = match ws.read().unwrap() {
          Message::Binary(data) => data,
          other => panic!("unexpected first frame: {:?}", other),
        };
        ws.send(Message::Binary(vec![0x0a, 0xff, 0xff, 0xff])).unwrap();
        ws.send(Message::Binary(logon_ok().encode_to_vec())).unwrap();
        // Drain until the client goes away.
        while ws.read().is_ok() {}
        request
      });

      let conn = WsConnection::connect(&format!("ws://127.0.0.1:{}/", port), None).unwrap();
      let client = BridgeClient::from_connection(Box::new(conn), None, None);
      assert_eq!(client.session().logon(&creds()).unwrap(), BASE_TIME_MS);
      client.close().unwrap();
      client.close().unwrap();
      assert!(!client.is_connected());

      let request = server.join().unwrap();
      assert_eq!(crate::protocol::ClientMsg::decode(request.as_slice()).unwrap(), logon_msg());
    }
  }
}

/// Serialises outgoing requests onto one connection and hands out request ids.
pub struct MessageBroker {
  connection: Mutex<Box<dyn Connection>>,
  logger: Option<ConnectionLogger>,
  next_request_id: AtomicU32,
}

impl MessageBroker {
  pub fn new(connection: Box<dyn Connection>, logger: Option<ConnectionLogger>) -> Self {
    MessageBroker {
      connection: Mutex::new(connection),
      logger,
      next_request_id: AtomicU32::new(1),
    }
  }

  pub fn send_message(&self, data: &[u8]) -> Result<(), BridgeError> {
    if let Some(logger) = &self.logger {
      logger.log_message(LogDirection::Send, data);
    }
    self.connection.lock().send_message_body(data)
  }

  /// Ids start at 1 and are unique per connection.
  pub fn next_request_id(&self) -> u32 {
    self.next_request_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn set_message_handler(&self, handler: MessageHandler) {
    self.connection.lock().set_message_handler(handler);
  }

  pub fn is_connected(&self) -> bool {
    self.connection.lock().is_connected()
  }

  /// Idempotent.
  pub fn disconnect(&self) -> Result<(), BridgeError> {
    self.connection.lock().disconnect()
  }
}
