//! Text protocol spoken with the sysmodule.
//!
//! A request is an opcode followed by zero or more arguments, all joined
//! with [`DELIMITER`]:
//!
//! ```text
//! 6\x1f42.000000
//! ```
//!
//! A reply is a single text blob. Replies carrying several values (queue
//! contents) are joined with the same delimiter.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::models::SongId;

/// Reserved byte separating tokens (ASCII unit separator).
pub const DELIMITER: char = '\u{1f}';

/// Protocol version this client was built against.
pub const PROTOCOL_VERSION: i32 = 3;

/// Upper bound of the page requested when refreshing the queue.
pub const QUEUE_PAGE: usize = 25000;

/// Upper bound of the page requested when refreshing the sub-queue.
pub const SUB_QUEUE_PAGE: usize = 5000;

/// The service's encoding of an empty playing-from label.
pub const EMPTY_LABEL: &str = " ";

/// Operation identifiers understood by the sysmodule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Version = 0,
    Resume = 1,
    Pause = 2,
    Previous = 3,
    Next = 4,
    GetVolume = 5,
    SetVolume = 6,
    Mute = 7,
    Unmute = 8,
    GetSubQueue = 9,
    SubQueueSize = 10,
    AddToSubQueue = 11,
    RemoveFromSubQueue = 12,
    SkipSubQueueSongs = 13,
    QueueSize = 14,
    GetQueue = 15,
    SetQueue = 16,
    QueueIdx = 17,
    SetQueueIdx = 18,
    RemoveFromQueue = 19,
    GetRepeat = 20,
    SetRepeat = 21,
    GetShuffle = 22,
    SetShuffle = 23,
    GetSong = 24,
    GetStatus = 25,
    GetPosition = 26,
    SetPosition = 27,
    GetPlayingFrom = 28,
    SetPlayingFrom = 29,
    RequestDbLock = 30,
    ReleaseDbLock = 31,
    ReloadConfig = 32,
    Reset = 33,
}

impl Opcode {
    /// Every opcode, indexed by its code.
    pub const ALL: [Opcode; 34] = [
        Opcode::Version,
        Opcode::Resume,
        Opcode::Pause,
        Opcode::Previous,
        Opcode::Next,
        Opcode::GetVolume,
        Opcode::SetVolume,
        Opcode::Mute,
        Opcode::Unmute,
        Opcode::GetSubQueue,
        Opcode::SubQueueSize,
        Opcode::AddToSubQueue,
        Opcode::RemoveFromSubQueue,
        Opcode::SkipSubQueueSongs,
        Opcode::QueueSize,
        Opcode::GetQueue,
        Opcode::SetQueue,
        Opcode::QueueIdx,
        Opcode::SetQueueIdx,
        Opcode::RemoveFromQueue,
        Opcode::GetRepeat,
        Opcode::SetRepeat,
        Opcode::GetShuffle,
        Opcode::SetShuffle,
        Opcode::GetSong,
        Opcode::GetStatus,
        Opcode::GetPosition,
        Opcode::SetPosition,
        Opcode::GetPlayingFrom,
        Opcode::SetPlayingFrom,
        Opcode::RequestDbLock,
        Opcode::ReleaseDbLock,
        Opcode::ReloadConfig,
        Opcode::Reset,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Opcode of an encoded request (the text before the first delimiter).
    pub fn of_request(request: &str) -> Option<Self> {
        let head = request.split(DELIMITER).next()?;
        head.trim().parse().ok().and_then(Self::from_code)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised while decoding a reply.
///
/// A decoding failure is fatal to the exchange it belongs to: the reply is
/// discarded and cached state is left as it was.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The reply was not a number of the expected kind.
    #[error("Invalid numeric reply {reply:?}: {reason}")]
    InvalidNumber { reply: String, reason: String },

    /// The reply was a number outside the set the field accepts.
    #[error("Unexpected value {value} for {field}")]
    UnexpectedValue { field: &'static str, value: i64 },

    /// The sysmodule refused the request.
    #[error("Request refused by sysmodule (code {0})")]
    Refused(i64),
}

/// An encoded request, ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    opcode: Opcode,
    text: String,
}

impl Request {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            text: opcode.to_string(),
        }
    }

    /// Append a numeric (or otherwise delimiter-free) argument.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.text.push(DELIMITER);
        self.text.push_str(&value.to_string());
        self
    }

    /// Append a floating point argument with six decimals.
    pub fn float_arg(self, value: f64) -> Self {
        self.arg(format_float(value))
    }

    /// Append free text. Delimiter bytes inside it are replaced with spaces
    /// so the argument cannot be split on the other side.
    pub fn text_arg(self, value: &str) -> Self {
        if value.contains(DELIMITER) {
            tracing::warn!("Stripping protocol delimiter from text argument {:?}", value);
        }
        let cleaned: String = value
            .chars()
            .map(|c| if c == DELIMITER { ' ' } else { c })
            .collect();
        self.arg(cleaned)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Format a float the way the sysmodule prints and expects them.
pub fn format_float(value: f64) -> String {
    format!("{:.6}", value)
}

/// Parse a numeric reply (integer of any width, or float).
pub fn parse_number<T>(reply: &str) -> Result<T, ProtocolError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    reply
        .trim()
        .parse::<T>()
        .map_err(|e| ProtocolError::InvalidNumber {
            reply: reply.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a floating point reply.
pub fn parse_float(reply: &str) -> Result<f64, ProtocolError> {
    parse_number::<f64>(reply)
}

/// Parse a reply that acknowledges with `0` and refuses with anything else.
pub fn parse_ack(reply: &str) -> Result<(), ProtocolError> {
    match parse_number::<i64>(reply)? {
        0 => Ok(()),
        code => Err(ProtocolError::Refused(code)),
    }
}

/// Split a delimiter-joined list of song IDs, preserving order.
///
/// Blank segments are skipped; an empty queue arrives as a blank reply.
pub fn parse_ids(reply: &str) -> Result<Vec<SongId>, ProtocolError> {
    reply
        .split(DELIMITER)
        .filter(|segment| !segment.trim().is_empty())
        .map(parse_number::<SongId>)
        .collect()
}
