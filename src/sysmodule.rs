//! Client engine for the TriPlayer sysmodule.
//!
//! A [`Sysmodule`] owns one logical connection to the playback service.
//! Application threads call the typed `send_*` methods, which encode a
//! request, push it onto the command queue together with a completion
//! handler, and return immediately. A single worker thread (see
//! [`SyncWorker`]) drains the queue in FIFO order, performs the blocking
//! exchange, and runs each handler with the raw reply. Handlers write into
//! [`CachedState`], which any thread can read without I/O.
//!
//! ```text
//! caller ─► send_*() ─► CommandQueue ─► worker ─► Transport ─► sysmodule
//!                                          │
//!   caller ◄── accessors ◄── CachedState ◄─┘ handler(reply)
//! ```
//!
//! The worker also polls a fixed battery of getters every
//! `poll_interval_ms` so cached values stay fresh.
//!
//! Connection failures never propagate as errors to producers. They move the
//! engine into an [`ErrorState`]; the owning application observes it via
//! [`Sysmodule::error`] and calls [`Sysmodule::reconnect`].

mod blocking;
mod commands;
mod engine;
mod queue;
mod state;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;

use crate::config::Config;
use crate::ipc::{Connector, SocketConnector, Transport};
use crate::models::{ErrorState, PlaybackStatus, RepeatMode, ShuffleMode, SongId};
use crate::protocol::{ProtocolError, Request, QUEUE_PAGE, SUB_QUEUE_PAGE};

pub use engine::SyncWorker;
pub use queue::{Command, CommandQueue, Handler};
pub use state::{CachedState, StateSnapshot};

/// Failures reported by the blocking calls (`wait_*`).
#[derive(Debug, Error)]
pub enum SysmoduleError {
    /// The engine was already in an error state, so nothing was queued.
    #[error("Command not queued: sysmodule error state is '{0}'")]
    Rejected(ErrorState),

    /// The engine entered an error state before the reply arrived.
    #[error("Sysmodule entered error state '{0}' while waiting for reply")]
    Interrupted(ErrorState),

    /// The command was dropped from the queue before it was answered.
    #[error("Command was discarded before its reply arrived")]
    Discarded,

    /// The worker is shutting down and will not answer.
    #[error("Sysmodule worker is shutting down")]
    ShuttingDown,

    /// The reply could not be decoded, or the sysmodule refused the request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Handlers run under `catch_unwind`, so a poisoned lock only means a
/// handler died mid-update; the cached value is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the playback sysmodule.
///
/// Share it between threads with `Arc<Sysmodule>`; run [`Sysmodule::process`]
/// on exactly one of them (usually via [`SyncWorker::spawn`]).
pub struct Sysmodule {
    connector: Box<dyn Connector>,
    /// Live session. Locked by the worker for each exchange and by reconnect.
    session: Mutex<Option<Box<dyn Transport>>>,
    queue: CommandQueue,
    state: CachedState,
    error: AtomicU8,
    exit: AtomicBool,
    queue_limit: Mutex<Option<usize>>,
    last_update: Mutex<Instant>,
    config: Config,
}

impl Sysmodule {
    /// Create a sysmodule handle and attempt the first connection.
    ///
    /// A failed attempt is not an error here: the handle starts in
    /// [`ErrorState::NotConnected`] and stays there until [`reconnect`]
    /// succeeds. On success the full queue and sub-queue are requested.
    ///
    /// [`reconnect`]: Sysmodule::reconnect
    pub fn new(connector: impl Connector + 'static, config: &Config) -> Self {
        let sysmodule = Self {
            connector: Box::new(connector),
            session: Mutex::new(None),
            queue: CommandQueue::default(),
            state: CachedState::default(),
            error: AtomicU8::new(ErrorState::Unknown.to_u8()),
            exit: AtomicBool::new(false),
            queue_limit: Mutex::new(config.queue_limit),
            last_update: Mutex::new(Instant::now()),
            config: config.clone(),
        };

        sysmodule.reconnect();

        // Fetch queue at launch
        sysmodule.send_get_queue(0, QUEUE_PAGE);
        sysmodule.send_get_sub_queue(0, SUB_QUEUE_PAGE);
        sysmodule
    }

    /// Create a handle talking to the endpoint named in `config`.
    pub fn connect(config: &Config) -> Self {
        Self::new(SocketConnector::from_config(config), config)
    }

    /// Current connection-level error state.
    pub fn error(&self) -> ErrorState {
        ErrorState::from_u8(self.error.load(Ordering::SeqCst))
    }

    pub(crate) fn set_error(&self, state: ErrorState) {
        self.error.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Queue a request with its completion handler.
    ///
    /// Returns `false` without queuing when the engine is in an error state;
    /// the request is then dropped and the caller must not assume delivery.
    /// The handler runs exactly once, on the worker thread, unless the queue
    /// is discarded after a lost connection.
    pub fn enqueue<F>(&self, request: Request, handler: F) -> bool
    where
        F: FnOnce(&Sysmodule, &str) -> Result<(), ProtocolError> + Send + 'static,
    {
        // The worker sets the error before clearing the queue, so checking
        // under the queue lock keeps stale commands out of a new session
        self.queue
            .push_unless(Command::new(request, Box::new(handler)), || {
                !self.error().is_none()
            })
    }

    /// Number of commands waiting for the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Limit the number of songs [`send_set_queue`](Sysmodule::send_set_queue)
    /// transmits. `None` means unlimited; `Some(0)` disables queue replacement.
    pub fn set_queue_limit(&self, limit: Option<usize>) {
        *lock(&self.queue_limit) = limit;
    }

    pub fn queue_limit(&self) -> Option<usize> {
        *lock(&self.queue_limit)
    }

    /// Ask the worker loop to stop after its current iteration.
    pub fn exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// All cached values.
    pub fn state(&self) -> &CachedState {
        &self.state
    }

    // =========================================================================
    // Cached state accessors (no I/O)
    // =========================================================================

    pub fn current_song(&self) -> SongId {
        self.state.current_song()
    }

    /// Label of what the queue is playing from; empty when unset.
    pub fn playing_from(&self) -> String {
        self.state.playing_from()
    }

    pub fn position(&self) -> f64 {
        self.state.position()
    }

    /// True once after the queue contents were refreshed.
    pub fn queue_changed(&self) -> bool {
        self.state.take_queue_changed()
    }

    pub fn queue(&self) -> Vec<SongId> {
        self.state.queue()
    }

    pub fn queue_size(&self) -> usize {
        self.state.queue_size()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.state.repeat_mode()
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.state.shuffle_mode()
    }

    pub fn song_idx(&self) -> usize {
        self.state.song_idx()
    }

    /// True once after the sub-queue contents were refreshed.
    pub fn sub_queue_changed(&self) -> bool {
        self.state.take_sub_queue_changed()
    }

    pub fn sub_queue(&self) -> Vec<SongId> {
        self.state.sub_queue()
    }

    pub fn sub_queue_size(&self) -> usize {
        self.state.sub_queue_size()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status()
    }

    pub fn volume(&self) -> f64 {
        self.state.volume()
    }

    /// Serializable copy of every cached value plus the error state.
    ///
    /// Does not consume the changed flags.
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot(self.error())
    }
}

impl Drop for Sysmodule {
    fn drop(&mut self) {
        let discarded = self.queue.clear();
        if discarded > 0 {
            tracing::debug!("Dropping sysmodule with {} unsent commands", discarded);
        }
    }
}
