//! Blocking socket client for the sysmodule protocol.
//!
//! `IpcClient` is one live connection (a transport session). `SocketConnector`
//! opens new ones on demand so the sync engine can replace a dead session
//! wholesale. Both sit behind the `Transport` and `Connector` traits so the
//! engine can be driven by in-memory fakes in tests.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, Endpoint};
use crate::ipc::framing::{read_message, write_message};

/// IPC-specific error types.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to connect to the sysmodule socket.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] io::Error),

    /// No session is open.
    #[error("Not connected to sysmodule")]
    NotConnected,

    /// A send or receive exceeded the protocol timeout.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// The peer closed the connection.
    #[error("Connection closed by sysmodule")]
    Closed,

    /// Protocol-level error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for IpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                IpcError::ConnectionFailed(err)
            }
            _ => IpcError::Io(err),
        }
    }
}

/// One message-framed, strictly request-then-reply connection.
pub trait Transport: Send {
    /// Send one message. Blocks for at most the protocol timeout.
    fn send(&mut self, message: &str) -> Result<(), IpcError>;

    /// Receive one message. Blocks for at most the protocol timeout.
    fn receive(&mut self) -> Result<String, IpcError>;

    /// Send a request and wait for its reply.
    fn call(&mut self, request: &str) -> Result<String, IpcError> {
        self.send(request)?;
        self.receive()
    }
}

/// Opens transports to a fixed endpoint. Retrying is left to the caller.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Transport>, IpcError>;
}

/// Underlying stream of an [`IpcClient`].
#[derive(Debug)]
enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
        }
    }

    fn set_timeouts(&self, timeout: Duration) -> io::Result<()> {
        match self {
            Stream::Unix(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))
            }
            Stream::Tcp(s) => {
                s.set_read_timeout(Some(timeout))?;
                s.set_write_timeout(Some(timeout))?;
                s.set_nodelay(true)
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

/// Blocking client for one connection to the sysmodule.
///
/// Every read and write is bounded by the timeout given at connect time.
/// A timeout is reported as [`IpcError::Timeout`]; the engine treats it the
/// same as a closed connection.
#[derive(Debug)]
pub struct IpcClient {
    reader: BufReader<Stream>,
    writer: Stream,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the sysmodule at `endpoint`.
    ///
    /// `timeout` bounds the TCP connect and every later read and write. A
    /// Unix socket connect has no timeout of its own; it either succeeds or
    /// fails right away unless the listener's backlog is full.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::ConnectionFailed` if:
    /// - The socket file does not exist
    /// - Connection is refused (sysmodule not running)
    /// - The TCP connect does not complete within `timeout`
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, IpcError> {
        let stream = match endpoint {
            Endpoint::Unix(path) => {
                Stream::Unix(UnixStream::connect(path).map_err(IpcError::ConnectionFailed)?)
            }
            Endpoint::Tcp(addr) => Stream::Tcp(
                TcpStream::connect_timeout(addr, timeout).map_err(IpcError::ConnectionFailed)?,
            ),
        };
        stream.set_timeouts(timeout)?;

        let writer = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Map a framing failure onto the IPC error taxonomy.
    fn classify(&self, err: anyhow::Error, action: &str) -> IpcError {
        if let Some(io_err) = err.root_cause().downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                    return IpcError::Timeout(self.timeout.as_millis() as u64);
                }
                io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof => return IpcError::Closed,
                _ => {}
            }
        }
        IpcError::Protocol(format!("{}: {:#}", action, err))
    }
}

impl Transport for IpcClient {
    fn send(&mut self, message: &str) -> Result<(), IpcError> {
        write_message(&mut self.writer, message)
            .map_err(|e| self.classify(e, "Failed to send request"))
    }

    fn receive(&mut self) -> Result<String, IpcError> {
        read_message(&mut self.reader).map_err(|e| self.classify(e, "Failed to read reply"))
    }
}

/// Opens [`IpcClient`] sessions to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    endpoint: Endpoint,
    timeout: Duration,
}

impl SocketConnector {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Connector for SocketConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, IpcError> {
        tracing::debug!("Connecting to sysmodule at {}", self.endpoint);
        let client = IpcClient::connect(&self.endpoint, self.timeout)?;
        Ok(Box::new(client))
    }
}
