//! Data models shared between the sysmodule client and its callers.
//!
//! The wire values of every enum here match the integers the sysmodule
//! sends and accepts. They use serde so that cached state can be dumped
//! as JSON by the command-line client.

use serde::{Deserialize, Serialize};

/// Identifier of a song in the shared database.
///
/// `-1` is used by the sysmodule when nothing is loaded.
pub type SongId = i32;

/// Value of [`SongId`] meaning "no song".
pub const NO_SONG: SongId = -1;

/// Repeat mode of the playback queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    /// Decode the integer used on the wire.
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(RepeatMode::Off),
            1 => Some(RepeatMode::One),
            2 => Some(RepeatMode::All),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            RepeatMode::Off => 0,
            RepeatMode::One => 1,
            RepeatMode::All => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }
}

/// Shuffle mode of the playback queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleMode {
    #[default]
    Off,
    On,
}

impl ShuffleMode {
    /// Decode the integer used on the wire. Anything other than `0` is `On`.
    pub fn from_wire(value: i64) -> Self {
        if value == 0 {
            ShuffleMode::Off
        } else {
            ShuffleMode::On
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            ShuffleMode::Off => 0,
            ShuffleMode::On => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShuffleMode::Off => "off",
            ShuffleMode::On => "on",
        }
    }
}

/// Playback status reported by the sysmodule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Error,
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackStatus {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            0 => Some(PlaybackStatus::Error),
            1 => Some(PlaybackStatus::Playing),
            2 => Some(PlaybackStatus::Paused),
            3 => Some(PlaybackStatus::Stopped),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            PlaybackStatus::Error => 0,
            PlaybackStatus::Playing => 1,
            PlaybackStatus::Paused => 2,
            PlaybackStatus::Stopped => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Error => "error",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Stopped => "stopped",
        }
    }
}

/// Connection-level error state of a [`Sysmodule`](crate::sysmodule::Sysmodule).
///
/// While this is anything other than `None` the worker performs no socket
/// I/O and new commands are refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorState {
    None,
    /// The initial connection (or a reconnect) could not be established.
    NotConnected,
    /// The sysmodule speaks a different protocol version. Not recoverable
    /// without replacing one side.
    DifferentVersion,
    /// The version handshake returned nothing usable.
    #[default]
    Unknown,
    /// A previously good connection failed or timed out.
    LostConnection,
}

impl ErrorState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ErrorState::None => 0,
            ErrorState::NotConnected => 1,
            ErrorState::DifferentVersion => 2,
            ErrorState::Unknown => 3,
            ErrorState::LostConnection => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ErrorState::None,
            1 => ErrorState::NotConnected,
            2 => ErrorState::DifferentVersion,
            4 => ErrorState::LostConnection,
            _ => ErrorState::Unknown,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ErrorState::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorState::None => "none",
            ErrorState::NotConnected => "not connected",
            ErrorState::DifferentVersion => "different protocol version",
            ErrorState::Unknown => "unknown error",
            ErrorState::LostConnection => "lost connection",
        }
    }
}

impl std::fmt::Display for ErrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
