//! TriPlayer client library
//!
//! This library lets a foreground application control and observe the
//! TriPlayer playback sysmodule over a local socket:
//!
//! - `sysmodule` - command queue, sync worker, cached state and typed facade
//! - `ipc` - framed transport to the sysmodule
//! - `protocol` - request encoding and reply decoding
//! - `models` - playback enums and error states
//! - `config` - endpoint and timing settings
//! - `database` - database lock handshake with the sysmodule
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use triplayer::config::Config;
//! use triplayer::sysmodule::{Sysmodule, SyncWorker};
//!
//! let config = Config::from_env()?;
//! let worker = SyncWorker::spawn(Arc::new(Sysmodule::connect(&config)))?;
//! let sysmodule = worker.sysmodule();
//!
//! sysmodule.send_set_volume(42.0);
//! sysmodule.wait_song_idx()?;
//! println!("volume is now {}", sysmodule.volume());
//! ```

pub mod config;
pub mod database;
pub mod ipc;
pub mod models;
pub mod protocol;
pub mod sysmodule;
