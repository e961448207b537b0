//! Bounded engine step
//!
//! The step runs on a dedicated worker thread holding the engine lock; the
//! simulation thread waits at most `timeout` per call, including the time
//! spent collecting a previous overrun reply. A step that
//! overruns keeps the engine locked until it returns, and the next request is
//! not sent before its reply has been collected.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::{lock_unpoisoned, FrameError, Result, StepStatus};

/// Error returned by a step function
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

type StepReply = std::result::Result<(), StepError>;

/// Runs engine steps on a worker thread with a per-step timeout
pub struct TimedStepper {
    name: String,
    requests: Option<Sender<()>>,
    replies: Receiver<StepReply>,
    in_flight: bool,
    worker: Option<JoinHandle<()>>,
}

impl TimedStepper {
    /// Spawn the worker thread
    pub fn spawn<E, F>(name: impl Into<String>, engine: Arc<Mutex<E>>, mut step: F) -> Result<Self>
    where
        E: Send + 'static,
        F: FnMut(&mut E) -> std::result::Result<(), StepError> + Send + 'static,
    {
        let name = name.into();
        let (req_tx, req_rx) = bounded::<()>(1);
        let (reply_tx, reply_rx) = bounded::<StepReply>(1);

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while req_rx.recv().is_ok() {
                    let reply = {
                        let mut guard = lock_unpoisoned(&engine);
                        step(&mut guard)
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })
            .map_err(|source| FrameError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            requests: Some(req_tx),
            replies: reply_rx,
            in_flight: false,
            worker: Some(worker),
        })
    }

    /// Advance the engine once, waiting at most `timeout`
    pub fn step(&mut self, timeout: Duration) -> Result<StepStatus> {
        // 两段等待共用一个截止时间
        let deadline = Instant::now() + timeout;
        if self.in_flight {
            // 上一次超时的 step 尚未返回，先收回它的结果
            match self.replies.recv_deadline(deadline) {
                Ok(_) => self.in_flight = false,
                Err(RecvTimeoutError::Timeout) => return Ok(StepStatus::TimedOut),
                Err(RecvTimeoutError::Disconnected) => return Err(self.gone()),
            }
        }

        let sender = self.requests.as_ref().ok_or_else(|| self.gone())?;
        sender.send(()).map_err(|_| self.gone())?;
        self.in_flight = true;

        match self.replies.recv_deadline(deadline) {
            Ok(Ok(())) => {
                self.in_flight = false;
                Ok(StepStatus::Stepped)
            }
            Ok(Err(e)) => {
                self.in_flight = false;
                Ok(StepStatus::Failed(e.to_string()))
            }
            Err(RecvTimeoutError::Timeout) => Ok(StepStatus::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(self.gone()),
        }
    }

    fn gone(&self) -> FrameError {
        FrameError::StepperGone {
            name: self.name.clone(),
        }
    }
}

impl Drop for TimedStepper {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if !self.in_flight {
                let _ = worker.join();
            }
        }
    }
}
