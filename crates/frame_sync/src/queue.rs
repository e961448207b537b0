//! Deferred command queue
//!
//! Any thread may push; only the simulation thread drains, once per frame,
//! while it holds the engine exclusively.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::lock_unpoisoned;

/// A deferred engine mutation
pub type Command<E> = Box<dyn FnOnce(&mut E) + Send + 'static>;

/// FIFO of deferred engine mutations
pub struct CommandQueue<E> {
    pending: Mutex<VecDeque<Command<E>>>,
}

impl<E> Default for CommandQueue<E> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

impl<E> fmt::Debug for CommandQueue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl<E> CommandQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command for the next drain
    pub fn push<F>(&self, command: F)
    where
        F: FnOnce(&mut E) + Send + 'static,
    {
        lock_unpoisoned(&self.pending).push_back(Box::new(command));
    }

    /// Run every queued command in FIFO order, exactly once each.
    ///
    /// The queue lock is released before the commands run, so a command
    /// that enqueues another one schedules it for the next drain.
    pub fn drain_into(&self, engine: &mut E) -> usize {
        let batch = std::mem::take(&mut *lock_unpoisoned(&self.pending));
        let count = batch.len();
        for command in batch {
            command(engine);
        }
        count
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
