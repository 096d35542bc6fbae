//! Retrying with exponential backoff, interruptible through an abort handshake.
//!
//! An abort is requested by sending a fresh reply channel ([`AbortReply`]) to
//! the worker. The worker answers exactly once on it: with the last error it
//! saw when the request caught it waiting to retry, or with `None` when the
//! request caught it between rows. After answering it stops.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, warn};

use crate::error::{CodingError, Result};

/// The reply channel carried by an abort request.
pub type AbortReply = Sender<Option<CodingError>>;

/// Requests an abort and blocks until the worker replies. A worker that has
/// already finished counts as a reply of `None`.
pub fn request_abort(abort: &Sender<AbortReply>) -> Option<CodingError> {
    let (reply, response) = bounded(1);
    if abort.send(reply).is_err() {
        return None;
    }
    response.recv().ok().flatten()
}

/// Delay schedule `base × 2^attempt`, saturating instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(10) }
    }
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
    pub fn base(&self) -> Duration {
        self.base
    }
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
    /// Waits out the delay for `attempt` while listening for an abort.
    /// Returns false when the caller should stop: an abort request arrived
    /// (and was answered with `error`) or the abort sender is gone.
    pub fn wait(&self, abort: &Receiver<AbortReply>, attempt: u32, error: CodingError) -> bool {
        let delay = self.delay(attempt);
        warn!(attempt, ?delay, %error, "attempt failed, backing off");
        match abort.recv_timeout(delay) {
            Ok(reply) => {
                debug!(attempt, "abort requested during backoff");
                let _ = reply.send(Some(error));
                false
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
    /// Calls `op` until it succeeds or an abort request arrives while waiting
    /// between attempts. Every error is retried; there is no attempt limit.
    ///
    /// Returns `None` when aborted, after replying with the error of the last
    /// attempt. A dropped abort sender also ends the loop, since nobody is left
    /// to wait for the result.
    pub fn run<T>(&self, abort: &Receiver<AbortReply>, mut op: impl FnMut() -> Result<T>) -> Option<T> {
        let mut attempt: u32 = 0;
        loop {
            match op() {
                Ok(value) => return Some(value),
                Err(error) => {
                    if !self.wait(abort, attempt, error) {
                        return None;
                    }
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
