//! Shared helpers for integration tests.
//!
//! `FakePlayer` is a small in-process stand-in for the sysmodule: it listens
//! on a Unix socket, speaks the framed text protocol, and keeps just enough
//! playback state to answer every opcode consistently.

#![allow(dead_code)]

use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use triplayer::config::{Config, Endpoint};
use triplayer::ipc::{read_message, write_message};
use triplayer::protocol::DELIMITER;

/// Generate a unique socket path for this test to avoid conflicts.
pub fn test_socket_path(test_name: &str) -> PathBuf {
    let pid = std::process::id();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    PathBuf::from(format!(
        "/tmp/triplayer-test-{}-{}-{}.sock",
        test_name, pid, timestamp
    ))
}

/// Clean up socket file after test.
pub fn cleanup_socket(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Config pointing at `path` with test-friendly timing.
pub fn config_for(path: &Path) -> Config {
    Config {
        endpoint: Endpoint::Unix(path.to_path_buf()),
        timeout_ms: 1000,
        ..Config::default()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Debug, Clone)]
pub struct PlayerState {
    pub version: String,
    pub volume: f64,
    pub muted_volume: Option<f64>,
    pub queue: Vec<i32>,
    pub sub_queue: Vec<i32>,
    pub song_idx: usize,
    pub repeat: u8,
    pub shuffle: u8,
    pub status: u8,
    pub position: f64,
    pub playing_from: String,
    pub db_locked: bool,
    /// Close the connection instead of answering the next request.
    pub hang_up: bool,
    pub requests: Vec<String>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            version: "3".into(),
            volume: 100.0,
            muted_volume: None,
            queue: Vec::new(),
            sub_queue: Vec::new(),
            song_idx: 0,
            repeat: 0,
            shuffle: 0,
            status: 3,
            position: 0.0,
            playing_from: String::new(),
            db_locked: false,
            hang_up: false,
            requests: Vec::new(),
        }
    }
}

fn join_ids(ids: &[i32]) -> String {
    if ids.is_empty() {
        return " ".into();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}

fn page(ids: &[i32], start: usize, end: usize) -> &[i32] {
    let end = end.min(ids.len());
    let start = start.min(end);
    &ids[start..end]
}

impl PlayerState {
    fn current_song(&self) -> i32 {
        self.queue.get(self.song_idx).copied().unwrap_or(-1)
    }

    /// Answer one request. `None` means hang up.
    fn answer(&mut self, request: &str) -> Option<String> {
        self.requests.push(request.to_string());
        if self.hang_up {
            return None;
        }

        let mut tokens = request.split(DELIMITER);
        let opcode: u8 = tokens.next()?.parse().ok()?;
        let args: Vec<&str> = tokens.collect();
        let num = |i: usize| -> usize { args.get(i).and_then(|a| a.parse().ok()).unwrap_or(0) };
        let float = |i: usize| -> f64 { args.get(i).and_then(|a| a.parse().ok()).unwrap_or(0.0) };

        let reply = match opcode {
            0 => self.version.clone(),
            1 => {
                self.status = 1;
                self.current_song().to_string()
            }
            2 => {
                self.status = 2;
                self.current_song().to_string()
            }
            3 => {
                self.song_idx = self.song_idx.saturating_sub(1);
                "0".into()
            }
            4 => {
                if self.song_idx + 1 < self.queue.len() {
                    self.song_idx += 1;
                }
                "0".into()
            }
            5 => format!("{:.6}", self.volume),
            6 => {
                self.volume = float(0).clamp(0.0, 100.0);
                format!("{:.6}", self.volume)
            }
            7 => {
                self.muted_volume = Some(self.volume);
                self.volume = 0.0;
                format!("{:.6}", self.volume)
            }
            8 => {
                self.volume = self.muted_volume.take().unwrap_or(self.volume);
                format!("{:.6}", self.volume)
            }
            9 => join_ids(page(&self.sub_queue, num(0), num(1))),
            10 => self.sub_queue.len().to_string(),
            11 => {
                let id = args.first().and_then(|a| a.parse().ok()).unwrap_or(-1);
                self.sub_queue.push(id);
                id.to_string()
            }
            12 => {
                let pos = num(0);
                if pos < self.sub_queue.len() {
                    self.sub_queue.remove(pos);
                }
                pos.to_string()
            }
            13 => {
                let n = num(0);
                let skip = n.min(self.sub_queue.len());
                self.sub_queue.drain(..skip);
                n.to_string()
            }
            14 => self.queue.len().to_string(),
            15 => join_ids(page(&self.queue, num(0), num(1))),
            16 => {
                self.queue = args.iter().filter_map(|a| a.parse().ok()).collect();
                self.song_idx = 0;
                self.queue.len().to_string()
            }
            17 => self.song_idx.to_string(),
            18 => {
                let idx = num(0);
                if idx < self.queue.len() {
                    self.song_idx = idx;
                }
                self.song_idx.to_string()
            }
            19 => {
                let pos = num(0);
                if pos < self.queue.len() {
                    self.queue.remove(pos);
                }
                pos.to_string()
            }
            20 => self.repeat.to_string(),
            21 => {
                let mode = num(0) as u8;
                if mode <= 2 {
                    self.repeat = mode;
                }
                self.repeat.to_string()
            }
            22 => self.shuffle.to_string(),
            23 => {
                let mode = u8::from(num(0) != 0);
                if mode != self.shuffle {
                    self.queue.reverse();
                }
                self.shuffle = mode;
                self.shuffle.to_string()
            }
            24 => self.current_song().to_string(),
            25 => self.status.to_string(),
            26 => format!("{:.6}", self.position),
            27 => {
                self.position = float(0);
                format!("{:.6}", self.position)
            }
            28 | 29 => {
                if opcode == 29 {
                    let label = args.first().copied().unwrap_or(" ");
                    self.playing_from = label.trim().to_string();
                }
                if self.playing_from.is_empty() {
                    " ".into()
                } else {
                    self.playing_from.clone()
                }
            }
            30 => {
                if self.db_locked {
                    "1".into()
                } else {
                    self.db_locked = true;
                    "0".into()
                }
            }
            31 => {
                self.db_locked = false;
                "0".into()
            }
            32 => "0".into(),
            33 => {
                let version = std::mem::take(&mut self.version);
                let requests = std::mem::take(&mut self.requests);
                *self = PlayerState {
                    version,
                    requests,
                    ..PlayerState::default()
                };
                "0".into()
            }
            _ => String::new(),
        };
        Some(reply)
    }
}

/// Fake sysmodule serving on a Unix socket until dropped.
pub struct FakePlayer {
    path: PathBuf,
    state: Arc<Mutex<PlayerState>>,
    shutdown: Arc<AtomicBool>,
}

impl FakePlayer {
    pub fn start(test_name: &str, state: PlayerState) -> Self {
        let path = test_socket_path(test_name);
        cleanup_socket(&path);
        let listener = UnixListener::bind(&path).expect("bind fake player socket");

        let state = Arc::new(Mutex::new(state));
        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let state = Arc::clone(&state);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    let state = Arc::clone(&state);
                    thread::spawn(move || serve(stream, state));
                }
            });
        }

        Self {
            path,
            state,
            shutdown,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> Config {
        config_for(&self.path)
    }

    pub fn state(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FakePlayer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the accept loop so it sees the flag
        let _ = UnixStream::connect(&self.path);
        cleanup_socket(&self.path);
    }
}

fn serve(stream: UnixStream, state: Arc<Mutex<PlayerState>>) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);

    while let Ok(request) = read_message(&mut reader) {
        let reply = state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .answer(&request);
        match reply {
            Some(reply) => {
                if write_message(&mut writer, &reply).is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}
