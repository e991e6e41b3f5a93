//! Worker side of the sysmodule: connection handshake, queue draining,
//! state polling, and the thread that runs them.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::{lock, Command, Sysmodule};
use crate::ipc::{IpcError, Transport};
use crate::models::ErrorState;
use crate::protocol::{parse_number, Opcode, Request, PROTOCOL_VERSION};

impl Sysmodule {
    /// Drop the current session, open a new one and check the protocol
    /// version.
    ///
    /// Holds the session lock for the whole handshake so the worker cannot
    /// send on a half-open connection. The resulting state is stored and
    /// returned.
    pub fn reconnect(&self) -> ErrorState {
        let mut session = lock(&self.session);
        *session = None;

        let state = match self.connector.connect() {
            Ok(mut transport) => {
                let state = handshake(&mut *transport);
                if state.is_none() {
                    *session = Some(transport);
                }
                state
            }
            Err(e) => {
                error!("Unable to connect to sysmodule: {}", e);
                ErrorState::NotConnected
            }
        };

        self.set_error(state);
        *lock(&self.last_update) = Instant::now();
        state
    }

    /// Reconnect only if the connection was lost after being established.
    ///
    /// Other error states need operator attention (wrong version, service
    /// not running) and are left alone. Returns true if a reconnect
    /// succeeded.
    pub fn reconnect_if_lost(&self) -> bool {
        if self.error() != ErrorState::LostConnection {
            return false;
        }
        info!("Attempting to reconnect to sysmodule");
        self.reconnect().is_none()
    }

    /// Run every queued command until the queue is empty or an error occurs.
    pub(crate) fn drain_queue(&self) {
        while self.error().is_none() {
            let Some(command) = self.queue.pop() else {
                break;
            };

            let reply = {
                let mut session = lock(&self.session);

                // A reconnect may have failed between the pop and the lock
                if !self.error().is_none() {
                    self.queue.restore(command);
                    return;
                }

                let result = exchange(&mut session, command.request());
                match result {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!(
                            "Exchange for opcode {:?} failed: {}",
                            command.request().opcode(),
                            e
                        );
                        *session = None;
                        self.set_error(ErrorState::LostConnection);
                        drop(command);
                        let discarded = self.queue.clear();
                        warn!(
                            "Lost connection to sysmodule, discarded {} queued commands",
                            discarded
                        );
                        return;
                    }
                }
            };

            self.complete(command, &reply);
        }
    }

    /// Run a command's handler, containing decode failures and panics.
    fn complete(&self, command: Command, reply: &str) {
        let opcode = command.request().opcode();
        let result = panic::catch_unwind(AssertUnwindSafe(|| command.complete(self, reply)));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to handle reply to opcode {:?}: {}", opcode, e),
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic in sysmodule handler".to_string()
                };
                error!("Handler for opcode {:?} panicked: {}", opcode, panic_msg);
            }
        }
    }

    /// Queue one request for every polled value.
    pub fn refresh(&self) {
        self.send_get_playing_from();
        self.send_get_position();
        self.send_get_queue_size();
        self.send_get_repeat();
        self.send_get_shuffle();
        self.send_get_song();
        self.send_get_song_idx();
        self.send_get_sub_queue_size();
        self.send_get_status();
        self.send_get_volume();
    }

    /// Queue the polling battery if a poll interval has elapsed.
    fn poll_if_due(&self) -> bool {
        {
            let mut last = lock(&self.last_update);
            if last.elapsed() < self.config.poll_interval() {
                return false;
            }
            *last = Instant::now();
        }
        self.refresh();
        true
    }

    /// One iteration of the worker loop.
    pub fn process_once(&self) {
        if !self.error().is_none() {
            thread::sleep(self.config.error_sleep());
            return;
        }

        let started = Instant::now();
        let pending = self.queue.len();
        self.drain_queue();
        if pending > 0 {
            trace!("Drained {} commands in {:?}", pending, started.elapsed());
        }

        if !self.poll_if_due() {
            thread::sleep(self.config.idle_sleep());
        }
    }

    /// Worker loop. Returns once [`exit`](Sysmodule::exit) has been called.
    pub fn process(&self) {
        info!("Sysmodule worker started");
        while !self.is_exiting() {
            self.process_once();
        }
        info!("Sysmodule worker stopped");
    }
}

/// Send the version request and classify the answer.
fn handshake(transport: &mut dyn Transport) -> ErrorState {
    let reply = match transport.call(Request::new(Opcode::Version).as_str()) {
        Ok(reply) => reply,
        Err(e) => {
            error!("No reply to version request: {}", e);
            return ErrorState::Unknown;
        }
    };

    if reply.trim().is_empty() {
        error!("Empty reply to version request");
        return ErrorState::Unknown;
    }

    match parse_number::<i32>(&reply) {
        Ok(PROTOCOL_VERSION) => {
            info!("Connection established (protocol version {})", PROTOCOL_VERSION);
            ErrorState::None
        }
        Ok(version) => {
            error!(
                "Sysmodule speaks protocol version {}, expected {}",
                version, PROTOCOL_VERSION
            );
            ErrorState::DifferentVersion
        }
        Err(e) => {
            error!("Unreadable reply to version request: {}", e);
            ErrorState::Unknown
        }
    }
}

/// One request/reply round trip. An empty reply counts as a closed peer.
fn exchange(
    session: &mut Option<Box<dyn Transport>>,
    request: &Request,
) -> Result<String, IpcError> {
    let transport = session.as_mut().ok_or(IpcError::NotConnected)?;
    let reply = transport.call(request.as_str())?;
    if reply.is_empty() {
        return Err(IpcError::Closed);
    }
    Ok(reply)
}

/// Runs [`Sysmodule::process`] on a dedicated thread.
///
/// Dropping the worker sets the exit flag and waits briefly for the loop
/// to finish; a worker stuck in a slow exchange is detached instead of
/// blocking the caller.
pub struct SyncWorker {
    sysmodule: Arc<Sysmodule>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(sysmodule: Arc<Sysmodule>) -> io::Result<Self> {
        let worker = Arc::clone(&sysmodule);
        let handle = thread::Builder::new()
            .name("sysmodule-sync".to_string())
            .spawn(move || worker.process())?;

        Ok(Self {
            sysmodule,
            handle: Some(handle),
        })
    }

    pub fn sysmodule(&self) -> &Arc<Sysmodule> {
        &self.sysmodule
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.sysmodule.exit();

        if let Some(handle) = self.handle.take() {
            const QUICK_CHECK_INTERVAL: Duration = Duration::from_millis(10);
            const MAX_QUICK_CHECKS: u32 = 10;

            for _ in 0..MAX_QUICK_CHECKS {
                if handle.is_finished() {
                    if let Err(e) = handle.join() {
                        warn!("Sysmodule worker panicked during shutdown: {:?}", e);
                    } else {
                        debug!("Sysmodule worker shut down gracefully");
                    }
                    return;
                }
                thread::sleep(QUICK_CHECK_INTERVAL);
            }

            debug!(
                "Sysmodule worker still running after {}ms - detaching",
                QUICK_CHECK_INTERVAL.as_millis() * MAX_QUICK_CHECKS as u128
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::ProtocolError;
    use crate::sysmodule::testing::MockService;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn polling_config() -> Config {
        Config {
            poll_interval_ms: 0,
            ..Config::default()
        }
    }

    /// Enqueue a command whose handler records the reply under `tag`.
    fn enqueue_recorded(sys: &Sysmodule, opcode: Opcode, tag: &str, log: &Arc<Mutex<Vec<String>>>) {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        assert!(sys.enqueue(Request::new(opcode), move |_, reply| {
            log.lock().unwrap().push(format!("{}:{}", tag, reply));
            Ok(())
        }));
    }

    #[test]
    fn test_handshake_success_fetches_queues() {
        let service = MockService::new();
        let sys = service.sysmodule();

        assert_eq!(sys.error(), ErrorState::None);
        assert_eq!(sys.pending(), 2);

        sys.drain_queue();
        assert_eq!(
            service.sent(),
            vec![
                "0".to_string(),
                "15\u{1f}0\u{1f}25000".to_string(),
                "9\u{1f}0\u{1f}5000".to_string(),
            ]
        );
    }

    #[test]
    fn test_version_mismatch_stops_io() {
        let service = MockService::new();
        service.set_version("2");
        let sys = service.sysmodule();

        assert_eq!(sys.error(), ErrorState::DifferentVersion);
        assert_eq!(sys.pending(), 0);
        assert!(!sys.enqueue(Request::new(Opcode::GetSong), |_, _| Ok(())));

        sys.drain_queue();
        sys.process_once();
        assert_eq!(service.sent(), vec!["0".to_string()]);
    }

    #[test]
    fn test_empty_version_reply_is_unknown() {
        let service = MockService::new();
        service.set_version("");
        let sys = service.sysmodule();
        assert_eq!(sys.error(), ErrorState::Unknown);
    }

    #[test]
    fn test_garbled_version_reply_is_unknown() {
        let service = MockService::new();
        service.set_version("three");
        assert_eq!(service.sysmodule().error(), ErrorState::Unknown);
    }

    #[test]
    fn test_connect_failure_is_not_connected() {
        let service = MockService::new();
        service.refuse_connections(true);
        let sys = service.sysmodule();

        assert_eq!(sys.error(), ErrorState::NotConnected);
        assert!(service.sent().is_empty());
        assert!(!sys.reconnect_if_lost());
        assert_eq!(service.connects(), 1);
    }

    #[test]
    fn test_replies_dispatched_in_fifo_order() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();
        let log = Arc::new(Mutex::new(Vec::new()));

        service.reply(Opcode::GetSong, "7");
        service.reply(Opcode::GetStatus, "1");
        service.reply(Opcode::GetVolume, "55.000000");
        enqueue_recorded(&sys, Opcode::GetSong, "a", &log);
        enqueue_recorded(&sys, Opcode::GetStatus, "b", &log);
        enqueue_recorded(&sys, Opcode::GetVolume, "c", &log);

        sys.drain_queue();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:7".to_string(), "b:1".to_string(), "c:55.000000".to_string()]
        );
        assert_eq!(sys.pending(), 0);
    }

    #[test]
    fn test_send_failure_discards_remaining_commands() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();
        let log = Arc::new(Mutex::new(Vec::new()));

        enqueue_recorded(&sys, Opcode::GetSong, "a", &log);
        enqueue_recorded(&sys, Opcode::GetStatus, "b", &log);
        enqueue_recorded(&sys, Opcode::GetVolume, "c", &log);
        service.fail_after(0);

        sys.drain_queue();
        assert_eq!(sys.error(), ErrorState::LostConnection);
        assert_eq!(sys.pending(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failure_mid_drain_keeps_earlier_replies() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();
        let log = Arc::new(Mutex::new(Vec::new()));

        enqueue_recorded(&sys, Opcode::GetSong, "a", &log);
        enqueue_recorded(&sys, Opcode::GetStatus, "b", &log);
        enqueue_recorded(&sys, Opcode::GetVolume, "c", &log);
        service.fail_after(1);

        sys.drain_queue();
        assert_eq!(sys.error(), ErrorState::LostConnection);
        assert_eq!(*log.lock().unwrap(), vec!["a:-1".to_string()]);
        assert_eq!(sys.pending(), 0);
        assert!(!sys.enqueue(Request::new(Opcode::GetSong), |_, _| Ok(())));
    }

    #[test]
    fn test_empty_reply_is_lost_connection() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.reply(Opcode::GetSong, "");
        sys.send_get_song();
        sys.send_get_status();
        sys.drain_queue();

        assert_eq!(sys.error(), ErrorState::LostConnection);
        assert_eq!(service.sent_opcodes(), vec![Opcode::GetSong]);
    }

    #[test]
    fn test_reconnect_after_lost_connection() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.fail_after(0);
        sys.send_get_song();
        sys.drain_queue();
        assert_eq!(sys.error(), ErrorState::LostConnection);

        service.heal();
        assert!(sys.reconnect_if_lost());
        assert_eq!(sys.error(), ErrorState::None);
        assert_eq!(service.connects(), 2);
        assert!(sys.send_get_song());
    }

    #[test]
    fn test_request_refused_during_loss_is_not_sent_after_reconnect() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.fail_after(0);
        sys.send_get_song();
        sys.drain_queue();
        assert!(!sys.enqueue(Request::new(Opcode::RequestDbLock), |_, _| Ok(())));

        service.heal();
        assert!(sys.reconnect_if_lost());
        service.take_sent();
        sys.drain_queue();

        assert_eq!(sys.pending(), 0);
        assert!(!service.sent_opcodes().contains(&Opcode::RequestDbLock));
    }

    #[test]
    fn test_handler_can_enqueue_follow_up() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        sys.enqueue(Request::new(Opcode::GetSong), |sys, _| {
            sys.send_get_status();
            Ok(())
        });
        sys.send_get_volume();
        sys.drain_queue();

        assert_eq!(
            service.sent_opcodes(),
            vec![Opcode::GetSong, Opcode::GetVolume, Opcode::GetStatus]
        );
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();
        let log = Arc::new(Mutex::new(Vec::new()));

        sys.enqueue(Request::new(Opcode::GetSong), |_, _| -> Result<(), ProtocolError> {
            panic!("handler exploded")
        });
        enqueue_recorded(&sys, Opcode::GetStatus, "after", &log);
        sys.drain_queue();

        assert_eq!(sys.error(), ErrorState::None);
        assert_eq!(*log.lock().unwrap(), vec!["after:3".to_string()]);
    }

    #[test]
    fn test_decode_failure_leaves_state_unchanged() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.reply(Opcode::GetVolume, "loud");
        sys.send_get_volume();
        sys.drain_queue();

        assert_eq!(sys.volume(), 100.0);
        assert_eq!(sys.error(), ErrorState::None);
    }

    #[test]
    fn test_poll_battery_order() {
        let service = MockService::new();
        let sys = service.sysmodule_with(&polling_config());
        sys.drain_queue();
        service.take_sent();

        assert!(sys.poll_if_due());
        sys.drain_queue();
        assert_eq!(
            service.sent_opcodes(),
            vec![
                Opcode::GetPlayingFrom,
                Opcode::GetPosition,
                Opcode::QueueSize,
                Opcode::GetRepeat,
                Opcode::GetShuffle,
                Opcode::GetSong,
                Opcode::QueueIdx,
                Opcode::SubQueueSize,
                Opcode::GetStatus,
                Opcode::GetVolume,
            ]
        );
    }

    #[test]
    fn test_poll_waits_for_interval() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();
        assert!(!sys.poll_if_due());
        assert_eq!(sys.pending(), 0);
    }

    #[test]
    fn test_queue_size_change_refetches_queue_once() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.reply(Opcode::QueueSize, "3");
        service.reply(Opcode::GetQueue, "1\u{1f}2\u{1f}3");
        sys.send_get_queue_size();
        sys.drain_queue();

        assert_eq!(
            service.take_sent(),
            vec!["14".to_string(), "15\u{1f}0\u{1f}25000".to_string()]
        );
        assert_eq!(sys.queue(), vec![1, 2, 3]);
        assert_eq!(sys.queue_size(), 3);

        // Same size again: no refetch
        service.reply(Opcode::QueueSize, "3");
        sys.send_get_queue_size();
        sys.drain_queue();
        assert_eq!(service.take_sent(), vec!["14".to_string()]);
    }

    #[test]
    fn test_sub_queue_size_change_refetches_sub_queue() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.reply(Opcode::SubQueueSize, "2");
        service.reply(Opcode::GetSubQueue, "8\u{1f}9");
        sys.send_get_sub_queue_size();
        sys.drain_queue();

        assert_eq!(
            service.take_sent(),
            vec!["10".to_string(), "9\u{1f}0\u{1f}5000".to_string()]
        );
        assert_eq!(sys.sub_queue(), vec![8, 9]);
        assert!(sys.sub_queue_changed());
        assert!(!sys.sub_queue_changed());
    }

    #[test]
    fn test_song_idx_change_refetches_both_lists() {
        let service = MockService::new();
        let sys = service.idle_sysmodule();

        service.reply(Opcode::QueueIdx, "4");
        sys.send_get_song_idx();
        sys.drain_queue();

        assert_eq!(sys.song_idx(), 4);
        assert_eq!(
            service.sent_opcodes(),
            vec![Opcode::QueueIdx, Opcode::GetQueue, Opcode::GetSubQueue]
        );
    }

    #[test]
    fn test_process_once_sleeps_in_error_state() {
        let service = MockService::new();
        service.refuse_connections(true);
        let sys = service.sysmodule();

        let started = Instant::now();
        sys.process_once();
        assert!(started.elapsed() >= sys.config().error_sleep());
        assert!(service.sent().is_empty());
    }

    #[test]
    fn test_sync_worker_drains_and_shuts_down() {
        let service = MockService::new();
        let sys = Arc::new(service.sysmodule());
        let worker = SyncWorker::spawn(Arc::clone(&sys)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while sys.pending() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sys.pending(), 0);
        assert!(Arc::ptr_eq(worker.sysmodule(), &sys));

        drop(worker);
        assert!(sys.is_exiting());
        assert_eq!(Arc::strong_count(&sys), 1);
    }
}
