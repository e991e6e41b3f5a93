//! Client-side mirror of the sysmodule's state.
//!
//! Fields are written by completion handlers on the worker thread and read
//! from anywhere. Scalars are atomics; the two song lists and the label each
//! have their own lock so readers of unrelated fields never contend.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use super::lock;
use crate::models::{ErrorState, PlaybackStatus, RepeatMode, ShuffleMode, SongId, NO_SONG};
use crate::protocol::EMPTY_LABEL;

/// `f64` stored as its bit pattern.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::SeqCst);
    }
}

/// Last known values reported by the sysmodule.
///
/// Each value reflects the most recent successful poll or command reply,
/// not necessarily what the service holds right now.
#[derive(Debug)]
pub struct CachedState {
    current_song: AtomicI32,
    playing_from: Mutex<String>,
    position: AtomicF64,
    queue: Mutex<Vec<SongId>>,
    queue_changed: AtomicBool,
    queue_size: AtomicUsize,
    repeat: AtomicU8,
    shuffle: AtomicU8,
    song_idx: AtomicUsize,
    sub_queue: Mutex<Vec<SongId>>,
    sub_queue_changed: AtomicBool,
    sub_queue_size: AtomicUsize,
    status: AtomicU8,
    volume: AtomicF64,
}

impl Default for CachedState {
    fn default() -> Self {
        Self {
            current_song: AtomicI32::new(NO_SONG),
            playing_from: Mutex::new(String::new()),
            position: AtomicF64::new(0.0),
            queue: Mutex::new(Vec::new()),
            queue_changed: AtomicBool::new(false),
            queue_size: AtomicUsize::new(0),
            repeat: AtomicU8::new(RepeatMode::Off.as_wire()),
            shuffle: AtomicU8::new(ShuffleMode::Off.as_wire()),
            song_idx: AtomicUsize::new(0),
            sub_queue: Mutex::new(Vec::new()),
            sub_queue_changed: AtomicBool::new(false),
            sub_queue_size: AtomicUsize::new(0),
            status: AtomicU8::new(PlaybackStatus::Stopped.as_wire()),
            volume: AtomicF64::new(100.0),
        }
    }
}

impl CachedState {
    pub fn current_song(&self) -> SongId {
        self.current_song.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_song(&self, song: SongId) {
        self.current_song.store(song, Ordering::SeqCst);
    }

    /// The service sends a single space for "no label"; that reads as empty.
    pub fn playing_from(&self) -> String {
        let label = lock(&self.playing_from);
        if label.as_str() == EMPTY_LABEL {
            String::new()
        } else {
            label.clone()
        }
    }

    pub(crate) fn set_playing_from(&self, label: &str) {
        *lock(&self.playing_from) = label.to_string();
    }

    pub fn position(&self) -> f64 {
        self.position.load()
    }

    pub(crate) fn set_position(&self, position: f64) {
        self.position.store(position);
    }

    pub fn queue(&self) -> Vec<SongId> {
        lock(&self.queue).clone()
    }

    /// Replace the queue contents and raise the changed flag.
    pub(crate) fn replace_queue(&self, songs: Vec<SongId>) {
        *lock(&self.queue) = songs;
        self.queue_changed.store(true, Ordering::SeqCst);
    }

    /// Read-and-clear: true at most once per queue refresh.
    pub fn take_queue_changed(&self) -> bool {
        self.queue_changed.swap(false, Ordering::SeqCst)
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    /// Store a new queue size, returning the previous one.
    pub(crate) fn swap_queue_size(&self, size: usize) -> usize {
        self.queue_size.swap(size, Ordering::SeqCst)
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        RepeatMode::from_wire(self.repeat.load(Ordering::SeqCst) as i64).unwrap_or_default()
    }

    pub(crate) fn set_repeat_mode(&self, mode: RepeatMode) {
        self.repeat.store(mode.as_wire(), Ordering::SeqCst);
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        ShuffleMode::from_wire(self.shuffle.load(Ordering::SeqCst) as i64)
    }

    pub(crate) fn set_shuffle_mode(&self, mode: ShuffleMode) {
        self.shuffle.store(mode.as_wire(), Ordering::SeqCst);
    }

    pub fn song_idx(&self) -> usize {
        self.song_idx.load(Ordering::SeqCst)
    }

    /// Store a new song index, returning the previous one.
    pub(crate) fn swap_song_idx(&self, idx: usize) -> usize {
        self.song_idx.swap(idx, Ordering::SeqCst)
    }

    pub fn sub_queue(&self) -> Vec<SongId> {
        lock(&self.sub_queue).clone()
    }

    pub(crate) fn replace_sub_queue(&self, songs: Vec<SongId>) {
        *lock(&self.sub_queue) = songs;
        self.sub_queue_changed.store(true, Ordering::SeqCst);
    }

    /// Read-and-clear: true at most once per sub-queue refresh.
    pub fn take_sub_queue_changed(&self) -> bool {
        self.sub_queue_changed.swap(false, Ordering::SeqCst)
    }

    pub fn sub_queue_size(&self) -> usize {
        self.sub_queue_size.load(Ordering::SeqCst)
    }

    pub(crate) fn swap_sub_queue_size(&self, size: usize) -> usize {
        self.sub_queue_size.swap(size, Ordering::SeqCst)
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus::from_wire(self.status.load(Ordering::SeqCst) as i64).unwrap_or_default()
    }

    pub(crate) fn set_status(&self, status: PlaybackStatus) {
        self.status.store(status.as_wire(), Ordering::SeqCst);
    }

    pub fn volume(&self) -> f64 {
        self.volume.load()
    }

    pub(crate) fn set_volume(&self, volume: f64) {
        self.volume.store(volume);
    }

    /// Copy every field. The changed flags are peeked, not consumed.
    pub fn snapshot(&self, error: ErrorState) -> StateSnapshot {
        StateSnapshot {
            error,
            status: self.status(),
            current_song: self.current_song(),
            playing_from: self.playing_from(),
            position: self.position(),
            volume: self.volume(),
            repeat: self.repeat_mode(),
            shuffle: self.shuffle_mode(),
            song_idx: self.song_idx(),
            queue_size: self.queue_size(),
            queue: self.queue(),
            queue_changed: self.queue_changed.load(Ordering::SeqCst),
            sub_queue_size: self.sub_queue_size(),
            sub_queue: self.sub_queue(),
            sub_queue_changed: self.sub_queue_changed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`CachedState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub error: ErrorState,
    pub status: PlaybackStatus,
    pub current_song: SongId,
    pub playing_from: String,
    pub position: f64,
    pub volume: f64,
    pub repeat: RepeatMode,
    pub shuffle: ShuffleMode,
    pub song_idx: usize,
    pub queue_size: usize,
    pub queue: Vec<SongId>,
    pub queue_changed: bool,
    pub sub_queue_size: usize,
    pub sub_queue: Vec<SongId>,
    pub sub_queue_changed: bool,
}
