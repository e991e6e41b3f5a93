//! IPC client for communication with the TriPlayer sysmodule.
//!
//! This module provides the transport half of the client: a blocking,
//! message-framed connection to the sysmodule over a Unix domain socket
//! (or a loopback TCP port), and a connector that opens fresh sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      Unix socket / TCP       ┌─────────────────────┐
//! │   Application   │  ◄──────────────────────────►│     sysmodule       │
//! │   (Sysmodule)   │   text requests + framing    │ (playback service)  │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing:
//!
//! ```text
//! Content-Length: 1\r\n
//! \r\n
//! 0
//! ```
//!
//! The protocol is strictly request-then-reply with one request in flight.
//!
//! # Usage
//!
//! ```ignore
//! use triplayer::ipc::{Connector, SocketConnector};
//!
//! let connector = SocketConnector::from_config(&config);
//! let mut session = connector.connect()?;
//! let version = session.call("0")?;
//! ```

mod client;
mod framing;

pub use client::{Connector, IpcClient, IpcError, SocketConnector, Transport};
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
