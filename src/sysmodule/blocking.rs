//! Blocking veneer over the command queue.
//!
//! Each call queues one request and parks the caller on a single-slot
//! channel until the worker has run its handler. The wait re-checks the
//! error state every `wait_interval_ms`, so a caller is released soon after
//! the connection breaks. These calls must not be made from a handler: the
//! worker would wait on itself.

use std::sync::mpsc::{self, RecvTimeoutError};

use super::{Sysmodule, SysmoduleError};
use crate::protocol::{parse_ack, parse_number, Opcode, ProtocolError, Request};

impl Sysmodule {
    fn wait_for<T, D>(&self, request: Request, decode: D) -> Result<T, SysmoduleError>
    where
        T: Send + 'static,
        D: FnOnce(&Sysmodule, &str) -> Result<T, ProtocolError> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let queued = self.enqueue(request, move |sys, reply| {
            // The caller may have given up already
            let _ = tx.send(decode(sys, reply));
            Ok(())
        });
        if !queued {
            return Err(SysmoduleError::Rejected(self.error()));
        }

        loop {
            match rx.recv_timeout(self.config.wait_interval()) {
                Ok(result) => return result.map_err(SysmoduleError::from),
                Err(RecvTimeoutError::Timeout) => {
                    let error = self.error();
                    if !error.is_none() {
                        return Err(SysmoduleError::Interrupted(error));
                    }
                    if self.is_exiting() {
                        return Err(SysmoduleError::ShuttingDown);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let error = self.error();
                    return Err(if error.is_none() {
                        SysmoduleError::Discarded
                    } else {
                        SysmoduleError::Interrupted(error)
                    });
                }
            }
        }
    }

    /// Ask the service to release the database so this process can write
    /// to it. Blocks until the service answers.
    pub fn wait_request_db_lock(&self) -> Result<(), SysmoduleError> {
        self.wait_for(Request::new(Opcode::RequestDbLock), |_, reply| {
            parse_ack(reply)
        })
    }

    /// Reset the service's playback state. Any reply counts as done.
    pub fn wait_reset(&self) -> Result<(), SysmoduleError> {
        self.wait_for(Request::new(Opcode::Reset), |_, _| Ok(()))
    }

    /// Query the song index and return it once the service has answered.
    ///
    /// Everything queued before this call has been processed when it
    /// returns, which makes it usable as a barrier.
    pub fn wait_song_idx(&self) -> Result<usize, SysmoduleError> {
        self.wait_for(Request::new(Opcode::QueueIdx), |sys, reply| {
            let idx = parse_number::<usize>(reply)?;
            sys.state.swap_song_idx(idx);
            Ok(idx)
        })
    }
}
