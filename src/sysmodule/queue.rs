//! Pending commands awaiting the worker.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use super::{lock, Sysmodule};
use crate::protocol::{ProtocolError, Request};

/// Completion handler of a command. Receives the raw reply.
pub type Handler = Box<dyn FnOnce(&Sysmodule, &str) -> Result<(), ProtocolError> + Send>;

/// A request together with the handler that consumes its reply.
pub struct Command {
    request: Request,
    handler: Handler,
}

impl Command {
    pub fn new(request: Request, handler: Handler) -> Self {
        Self { request, handler }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Run the handler with the reply. Consumes the command.
    pub(crate) fn complete(self, sysmodule: &Sysmodule, reply: &str) -> Result<(), ProtocolError> {
        (self.handler)(sysmodule, reply)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// FIFO of commands shared by any number of producers and one consumer.
///
/// The lock is held only for the push or pop itself, never across I/O or a
/// handler call.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn push(&self, command: Command) {
        lock(&self.inner).push_back(command);
    }

    /// Push `command` unless `refuse` returns true.
    ///
    /// `refuse` runs with the queue locked, so a concurrent [`clear`] either
    /// removes the pushed command or happens before the check. A refused
    /// command is dropped after the lock is released.
    ///
    /// [`clear`]: CommandQueue::clear
    pub fn push_unless<F>(&self, command: Command, refuse: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut queue = lock(&self.inner);
        if refuse() {
            drop(queue);
            return false;
        }
        queue.push_back(command);
        true
    }

    pub fn pop(&self) -> Option<Command> {
        lock(&self.inner).pop_front()
    }

    /// Put a command that was popped but not sent back at the head.
    pub(crate) fn restore(&self, command: Command) {
        lock(&self.inner).push_front(command);
    }

    /// Drop every queued command without running its handler.
    /// Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<Command> = lock(&self.inner).drain(..).collect();
        // Handlers are dropped after the lock is released
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}
