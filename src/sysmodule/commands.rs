//! Fire-and-forget facade.
//!
//! Every `send_*` method encodes one request and queues it with a handler
//! that updates [`CachedState`](super::CachedState) from the reply. They
//! return `false` when nothing was queued because the engine is in an
//! error state.

use std::fmt::Display;
use std::str::FromStr;

use tracing::warn;

use super::Sysmodule;
use crate::models::{PlaybackStatus, RepeatMode, ShuffleMode, SongId};
use crate::protocol::{
    parse_ack, parse_float, parse_ids, parse_number, Opcode, ProtocolError, Request, EMPTY_LABEL,
    QUEUE_PAGE, SUB_QUEUE_PAGE,
};

impl Sysmodule {
    // =========================================================================
    // Playback
    // =========================================================================

    pub fn send_resume(&self) -> bool {
        self.enqueue(Request::new(Opcode::Resume), |sys, reply| {
            sys.state.set_current_song(parse_number(reply)?);
            Ok(())
        })
    }

    pub fn send_pause(&self) -> bool {
        self.enqueue(Request::new(Opcode::Pause), |sys, reply| {
            sys.state.set_current_song(parse_number(reply)?);
            Ok(())
        })
    }

    pub fn send_previous(&self) -> bool {
        self.enqueue(Request::new(Opcode::Previous), |_, reply| {
            verify_ack("Previous", reply)
        })
    }

    pub fn send_next(&self) -> bool {
        self.enqueue(Request::new(Opcode::Next), |_, reply| verify_ack("Next", reply))
    }

    pub fn send_get_song(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetSong), |sys, reply| {
            sys.state.set_current_song(parse_number(reply)?);
            Ok(())
        })
    }

    pub fn send_get_status(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetStatus), |sys, reply| {
            let value = parse_number::<i64>(reply)?;
            let status = PlaybackStatus::from_wire(value).ok_or(ProtocolError::UnexpectedValue {
                field: "status",
                value,
            })?;
            sys.state.set_status(status);
            Ok(())
        })
    }

    pub fn send_get_position(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetPosition), |sys, reply| {
            sys.state.set_position(parse_float(reply)?);
            Ok(())
        })
    }

    /// Seek to `position` seconds.
    ///
    /// The cached position moves immediately so a seek bar does not jump
    /// back while the request is in flight; the reply then replaces it.
    pub fn send_set_position(&self, position: f64) -> bool {
        self.state.set_position(position);
        let request = Request::new(Opcode::SetPosition).float_arg(position);
        self.enqueue(request, |sys, reply| {
            sys.state.set_position(parse_float(reply)?);
            Ok(())
        })
    }

    // =========================================================================
    // Volume
    // =========================================================================

    pub fn send_get_volume(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetVolume), store_volume)
    }

    /// Request a new volume. The cache takes whatever the service reports
    /// back, which may differ from `volume` if it was clamped.
    pub fn send_set_volume(&self, volume: f64) -> bool {
        let request = Request::new(Opcode::SetVolume).float_arg(volume);
        self.enqueue(request, store_volume)
    }

    pub fn send_mute(&self) -> bool {
        self.enqueue(Request::new(Opcode::Mute), store_volume)
    }

    pub fn send_unmute(&self) -> bool {
        self.enqueue(Request::new(Opcode::Unmute), store_volume)
    }

    // =========================================================================
    // Queue
    // =========================================================================

    pub fn send_get_song_idx(&self) -> bool {
        self.enqueue(Request::new(Opcode::QueueIdx), |sys, reply| {
            let idx = parse_number::<usize>(reply)?;
            if sys.state.swap_song_idx(idx) != idx {
                sys.send_get_queue(0, QUEUE_PAGE);
                sys.send_get_sub_queue(0, SUB_QUEUE_PAGE);
            }
            Ok(())
        })
    }

    pub fn send_set_song_idx(&self, idx: usize) -> bool {
        let request = Request::new(Opcode::SetQueueIdx).arg(idx);
        self.enqueue(request, |sys, reply| {
            sys.state.swap_song_idx(parse_number(reply)?);
            Ok(())
        })
    }

    pub fn send_get_queue_size(&self) -> bool {
        self.enqueue(Request::new(Opcode::QueueSize), |sys, reply| {
            let size = parse_number::<usize>(reply)?;
            if sys.state.swap_queue_size(size) != size {
                sys.send_get_queue(0, QUEUE_PAGE);
            }
            Ok(())
        })
    }

    pub fn send_remove_from_queue(&self, pos: usize) -> bool {
        let request = Request::new(Opcode::RemoveFromQueue).arg(pos);
        self.enqueue(request, move |_, reply| {
            verify_echo("Remove from queue", pos, reply)
        })
    }

    /// Fetch queue entries `start..end` and replace the cached queue.
    pub fn send_get_queue(&self, start: usize, end: usize) -> bool {
        let request = Request::new(Opcode::GetQueue).arg(start).arg(end);
        self.enqueue(request, |sys, reply| {
            sys.state.replace_queue(parse_ids(reply)?);
            Ok(())
        })
    }

    /// Replace the service's queue with `songs`.
    ///
    /// At most [`queue_limit`](Sysmodule::queue_limit) songs are sent.
    /// Nothing is queued for an empty list or a limit of zero.
    pub fn send_set_queue(&self, songs: &[SongId]) -> bool {
        let limit = self.queue_limit();
        if songs.is_empty() || limit == Some(0) {
            return false;
        }

        let count = limit.map_or(songs.len(), |limit| songs.len().min(limit));
        let request = songs[..count]
            .iter()
            .fold(Request::new(Opcode::SetQueue), |request, id| request.arg(id));
        self.enqueue(request, move |_, reply| {
            verify_echo("Set queue", count, reply)
        })
    }

    // =========================================================================
    // Sub-queue
    // =========================================================================

    pub fn send_add_to_sub_queue(&self, id: SongId) -> bool {
        let request = Request::new(Opcode::AddToSubQueue).arg(id);
        self.enqueue(request, move |_, reply| {
            verify_echo("Add to sub-queue", id, reply)
        })
    }

    pub fn send_remove_from_sub_queue(&self, pos: usize) -> bool {
        let request = Request::new(Opcode::RemoveFromSubQueue).arg(pos);
        self.enqueue(request, move |_, reply| {
            verify_echo("Remove from sub-queue", pos, reply)
        })
    }

    pub fn send_get_sub_queue_size(&self) -> bool {
        self.enqueue(Request::new(Opcode::SubQueueSize), |sys, reply| {
            let size = parse_number::<usize>(reply)?;
            if sys.state.swap_sub_queue_size(size) != size {
                sys.send_get_sub_queue(0, SUB_QUEUE_PAGE);
            }
            Ok(())
        })
    }

    pub fn send_get_sub_queue(&self, start: usize, end: usize) -> bool {
        let request = Request::new(Opcode::GetSubQueue).arg(start).arg(end);
        self.enqueue(request, |sys, reply| {
            sys.state.replace_sub_queue(parse_ids(reply)?);
            Ok(())
        })
    }

    pub fn send_skip_sub_queue_songs(&self, count: usize) -> bool {
        let request = Request::new(Opcode::SkipSubQueueSongs).arg(count);
        self.enqueue(request, move |_, reply| {
            verify_echo("Skip sub-queue songs", count, reply)
        })
    }

    // =========================================================================
    // Repeat / shuffle
    // =========================================================================

    pub fn send_get_repeat(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetRepeat), |sys, reply| {
            sys.state.set_repeat_mode(decode_repeat(reply)?);
            Ok(())
        })
    }

    /// A reply naming a different mode is logged and not cached.
    pub fn send_set_repeat(&self, mode: RepeatMode) -> bool {
        let request = Request::new(Opcode::SetRepeat).arg(mode.as_wire());
        self.enqueue(request, move |sys, reply| {
            let reported = decode_repeat(reply)?;
            if reported == mode {
                sys.state.set_repeat_mode(reported);
            } else {
                warn!(
                    "Requested repeat mode {} but sysmodule reports {}",
                    mode.as_str(),
                    reported.as_str()
                );
            }
            Ok(())
        })
    }

    pub fn send_get_shuffle(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetShuffle), |sys, reply| {
            sys.state
                .set_shuffle_mode(ShuffleMode::from_wire(parse_number(reply)?));
            Ok(())
        })
    }

    /// Shuffling reorders the queue, so the reply also triggers a refetch.
    pub fn send_set_shuffle(&self, mode: ShuffleMode) -> bool {
        let request = Request::new(Opcode::SetShuffle).arg(mode.as_wire());
        self.enqueue(request, move |sys, reply| {
            let reported = ShuffleMode::from_wire(parse_number(reply)?);
            if reported != mode {
                warn!(
                    "Requested shuffle {} but sysmodule reports {}",
                    mode.as_str(),
                    reported.as_str()
                );
            }
            sys.send_get_queue(0, QUEUE_PAGE);
            sys.state.set_shuffle_mode(reported);
            Ok(())
        })
    }

    // =========================================================================
    // Playing-from label
    // =========================================================================

    pub fn send_get_playing_from(&self) -> bool {
        self.enqueue(Request::new(Opcode::GetPlayingFrom), |sys, reply| {
            sys.state.set_playing_from(reply);
            Ok(())
        })
    }

    pub fn send_set_playing_from(&self, label: &str) -> bool {
        let label = if label.is_empty() { EMPTY_LABEL } else { label };
        let request = Request::new(Opcode::SetPlayingFrom).text_arg(label);
        self.enqueue(request, |sys, reply| {
            sys.state.set_playing_from(reply);
            Ok(())
        })
    }

    // =========================================================================
    // Service control
    // =========================================================================

    pub fn send_release_db_lock(&self) -> bool {
        self.enqueue(Request::new(Opcode::ReleaseDbLock), |_, reply| {
            verify_ack("Release database lock", reply)
        })
    }

    pub fn send_reload_config(&self) -> bool {
        self.enqueue(Request::new(Opcode::ReloadConfig), |_, reply| {
            verify_ack("Reload config", reply)
        })
    }
}

fn store_volume(sys: &Sysmodule, reply: &str) -> Result<(), ProtocolError> {
    sys.state.set_volume(parse_float(reply)?);
    Ok(())
}

fn decode_repeat(reply: &str) -> Result<RepeatMode, ProtocolError> {
    let value = parse_number::<i64>(reply)?;
    RepeatMode::from_wire(value).ok_or(ProtocolError::UnexpectedValue {
        field: "repeat",
        value,
    })
}

/// Check that the reply echoes `expected`. A different value is logged only.
fn verify_echo<T>(what: &str, expected: T, reply: &str) -> Result<(), ProtocolError>
where
    T: FromStr + PartialEq + Display,
    T::Err: Display,
{
    let echoed = parse_number::<T>(reply)?;
    if echoed != expected {
        warn!("{}: sent {} but sysmodule echoed {}", what, expected, echoed);
    }
    Ok(())
}

/// Check for a `0` acknowledgement. A refusal is logged only.
fn verify_ack(what: &str, reply: &str) -> Result<(), ProtocolError> {
    match parse_ack(reply) {
        Err(ProtocolError::Refused(code)) => {
            warn!("{}: sysmodule refused with code {}", what, code);
            Ok(())
        }
        other => other,
    }
}
