//! In-memory sysmodule for unit tests.
//!
//! `MockService` answers every opcode with a plausible default, records
//! what was sent, and can be told to refuse connections, report another
//! protocol version, or fail after a number of exchanges.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{lock, Sysmodule};
use crate::config::Config;
use crate::ipc::{Connector, IpcError, Transport};
use crate::protocol::{Opcode, DELIMITER};

#[derive(Debug)]
struct MockInner {
    version: String,
    refuse_connections: bool,
    connects: usize,
    replies: HashMap<Opcode, VecDeque<String>>,
    sent: Vec<String>,
    exchanges_before_failure: Option<usize>,
}

impl MockInner {
    fn reply_for(&mut self, request: &str) -> String {
        let opcode = Opcode::of_request(request);
        if let Some(reply) = opcode
            .and_then(|op| self.replies.get_mut(&op))
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        let mut args = request.split(DELIMITER).skip(1);
        match opcode {
            Some(Opcode::Version) => self.version.clone(),
            Some(Opcode::GetQueue | Opcode::GetSubQueue | Opcode::GetPlayingFrom) => " ".into(),
            Some(Opcode::GetVolume) => "100.000000".into(),
            Some(Opcode::GetPosition) => "0.000000".into(),
            Some(Opcode::GetSong | Opcode::Resume | Opcode::Pause) => "-1".into(),
            Some(Opcode::GetStatus) => "3".into(),
            Some(Opcode::SetQueue) => args.count().to_string(),
            // Setters echo their argument, everything else acknowledges with 0
            _ => args.next().unwrap_or("0").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockService {
    inner: Arc<Mutex<MockInner>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                version: "3".into(),
                refuse_connections: false,
                connects: 0,
                replies: HashMap::new(),
                sent: Vec::new(),
                exchanges_before_failure: None,
            })),
        }
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Connected sysmodule with the initial queue fetches still pending.
    pub fn sysmodule(&self) -> Sysmodule {
        self.sysmodule_with(&Config::default())
    }

    pub fn sysmodule_with(&self, config: &Config) -> Sysmodule {
        Sysmodule::new(self.connector(), config)
    }

    /// Connected sysmodule with nothing pending and nothing recorded.
    pub fn idle_sysmodule(&self) -> Sysmodule {
        let sysmodule = self.sysmodule();
        sysmodule.drain_queue();
        self.take_sent();
        sysmodule
    }

    pub fn set_version(&self, version: &str) {
        lock(&self.inner).version = version.to_string();
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.inner).refuse_connections = refuse;
    }

    /// Answer the next request with `opcode` with `reply`.
    pub fn reply(&self, opcode: Opcode, reply: &str) {
        lock(&self.inner)
            .replies
            .entry(opcode)
            .or_default()
            .push_back(reply.to_string());
    }

    /// Allow `count` more exchanges, then fail every send.
    pub fn fail_after(&self, count: usize) {
        lock(&self.inner).exchanges_before_failure = Some(count);
    }

    pub fn heal(&self) {
        lock(&self.inner).exchanges_before_failure = None;
    }

    pub fn connects(&self) -> usize {
        lock(&self.inner).connects
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.inner).sent.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.inner).sent)
    }

    pub fn sent_opcodes(&self) -> Vec<Opcode> {
        self.sent()
            .iter()
            .filter_map(|request| Opcode::of_request(request))
            .collect()
    }
}

pub(crate) struct MockConnector {
    inner: Arc<Mutex<MockInner>>,
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, IpcError> {
        let mut inner = lock(&self.inner);
        inner.connects += 1;
        if inner.refuse_connections {
            return Err(IpcError::ConnectionFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock refused",
            )));
        }
        Ok(Box::new(MockTransport {
            inner: Arc::clone(&self.inner),
            pending: None,
        }))
    }
}

struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    pending: Option<String>,
}

impl Transport for MockTransport {
    fn send(&mut self, message: &str) -> Result<(), IpcError> {
        let mut inner = lock(&self.inner);
        match inner.exchanges_before_failure {
            Some(0) => return Err(IpcError::Closed),
            Some(n) => inner.exchanges_before_failure = Some(n - 1),
            None => {}
        }
        inner.sent.push(message.to_string());
        self.pending = Some(inner.reply_for(message));
        Ok(())
    }

    fn receive(&mut self) -> Result<String, IpcError> {
        self.pending.take().ok_or(IpcError::Timeout(0))
    }
}
