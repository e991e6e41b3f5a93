//! triplayer-ctl - command line client for the TriPlayer sysmodule.
//!
//! Connects, sends one command, refreshes the cached state and prints it
//! as JSON.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use triplayer::config::{Config, Endpoint};
use triplayer::models::{RepeatMode, ShuffleMode, SongId};
use triplayer::sysmodule::{SyncWorker, Sysmodule};

#[derive(Parser)]
#[command(name = "triplayer-ctl")]
#[command(about = "Control the TriPlayer playback sysmodule")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket of the sysmodule
    #[arg(long, conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// TCP address of the sysmodule
    #[arg(long)]
    tcp: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current state
    Status,
    /// Resume playback
    Play,
    /// Pause playback
    Pause,
    /// Skip to the next song
    Next,
    /// Go back to the previous song
    Previous,
    /// Set the volume (0-100)
    Volume { level: f64 },
    /// Mute output
    Mute,
    /// Restore the volume from before muting
    Unmute,
    /// Set the repeat mode
    Repeat {
        #[arg(value_enum)]
        mode: RepeatArg,
    },
    /// Turn shuffle on or off
    Shuffle {
        #[arg(value_enum)]
        mode: ShuffleArg,
    },
    /// Seek within the current song (seconds)
    Seek { position: f64 },
    /// Play the song at this queue index
    Jump { index: usize },
    /// Replace the queue with these song IDs
    Queue {
        #[arg(required = true)]
        songs: Vec<SongId>,

        /// Send at most this many songs
        #[arg(long)]
        limit: Option<usize>,

        /// Label shown as the queue's source
        #[arg(long)]
        from: Option<String>,
    },
    /// Remove the song at this queue index
    Remove { index: usize },
    /// Play this song after the current one
    Enqueue { song: SongId },
    /// Skip songs queued with `enqueue`
    Skip { count: usize },
    /// Reset the sysmodule's playback state
    Reset,
    /// Ask the sysmodule to reload its configuration
    ReloadConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RepeatArg {
    Off,
    One,
    All,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::Off => RepeatMode::Off,
            RepeatArg::One => RepeatMode::One,
            RepeatArg::All => RepeatMode::All,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ShuffleArg {
    Off,
    On,
}

impl From<ShuffleArg> for ShuffleMode {
    fn from(arg: ShuffleArg) -> Self {
        match arg {
            ShuffleArg::Off => ShuffleMode::Off,
            ShuffleArg::On => ShuffleMode::On,
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(path) = &cli.socket {
        config.endpoint = Endpoint::Unix(path.clone());
    }
    if let Some(addr) = cli.tcp {
        config.endpoint = Endpoint::Tcp(addr);
    }

    config.validate()?;
    Ok(config)
}

fn run_command(sysmodule: &Sysmodule, command: &Commands) -> Result<()> {
    let queued = match command {
        Commands::Status => true,
        Commands::Play => sysmodule.send_resume(),
        Commands::Pause => sysmodule.send_pause(),
        Commands::Next => sysmodule.send_next(),
        Commands::Previous => sysmodule.send_previous(),
        Commands::Volume { level } => sysmodule.send_set_volume(*level),
        Commands::Mute => sysmodule.send_mute(),
        Commands::Unmute => sysmodule.send_unmute(),
        Commands::Repeat { mode } => sysmodule.send_set_repeat((*mode).into()),
        Commands::Shuffle { mode } => sysmodule.send_set_shuffle((*mode).into()),
        Commands::Seek { position } => sysmodule.send_set_position(*position),
        Commands::Jump { index } => sysmodule.send_set_song_idx(*index),
        Commands::Queue { songs, limit, from } => {
            if limit.is_some() {
                sysmodule.set_queue_limit(*limit);
            }
            sysmodule.send_set_queue(songs)
                && from
                    .as_deref()
                    .map_or(true, |label| sysmodule.send_set_playing_from(label))
        }
        Commands::Remove { index } => sysmodule.send_remove_from_queue(*index),
        Commands::Enqueue { song } => sysmodule.send_add_to_sub_queue(*song),
        Commands::Skip { count } => sysmodule.send_skip_sub_queue_songs(*count),
        Commands::Reset => {
            sysmodule.wait_reset().context("Reset failed")?;
            true
        }
        Commands::ReloadConfig => sysmodule.send_reload_config(),
    };

    if !queued {
        bail!("Command not sent (sysmodule error: {})", sysmodule.error());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "triplayer=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::debug!("Using sysmodule endpoint {}", config.endpoint);

    let sysmodule = Sysmodule::connect(&config);
    let error = sysmodule.error();
    if !error.is_none() {
        bail!(
            "Unable to reach sysmodule at {}: {}",
            config.endpoint,
            error
        );
    }

    let worker =
        SyncWorker::spawn(Arc::new(sysmodule)).context("Failed to start sysmodule worker")?;
    let sysmodule = worker.sysmodule();

    run_command(sysmodule, &cli.command)?;

    sysmodule.refresh();
    // Refetches triggered by the poll queue up behind the first barrier
    sysmodule.wait_song_idx()?;
    sysmodule.wait_song_idx()?;

    println!("{}", serde_json::to_string_pretty(&sysmodule.snapshot())?);
    Ok(())
}
