//! Deadline-bounded polling with an outcome classifier.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::FetchError;

/// Classification of a single poll attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Terminal success: stop polling and return the value.
    Ready(T),
    /// The awaited condition does not hold yet.
    Pending,
    /// The read itself failed; retried like `Pending`.
    Transient(FetchError),
    /// Terminal failure: stop polling immediately.
    Fatal(E),
}

/// One side of a polling loop: performs a read and classifies it.
///
/// A condition owns whatever state it accumulates between attempts, so callers
/// can inspect it after [`PollPolicy::run`] returns (e.g. which hashes are
/// still unresolved on timeout).
#[async_trait]
pub trait Condition: Send {
    type Output: Send;
    type Error: Send;

    /// Short label used in log fields.
    fn name(&self) -> &'static str;

    async fn attempt(&mut self) -> Attempt<Self::Output, Self::Error>;
}

/// Why a [`PollPolicy::run`] call ended without a value.
#[derive(Debug, PartialEq, Eq)]
pub enum PollError<E> {
    /// The condition classified an attempt as terminal failure.
    Fatal(E),
    /// The deadline passed with the condition still unmet.
    DeadlineExceeded { elapsed: Duration, attempts: u32 },
}

/// Overall deadline plus retry interval for one polling loop.
///
/// The deadline is measured once per [`run`](Self::run), from its first
/// attempt. Every attempt is itself bounded by the remaining time, so a hung
/// read cannot stretch the call past `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Drive `condition` until it is ready, fails fatally, or the deadline passes.
    ///
    /// Dropping the returned future stops polling at the next await point.
    pub async fn run<P: Condition>(
        &self,
        condition: &mut P,
    ) -> Result<P::Output, PollError<P::Error>> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout_at(deadline, condition.attempt()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(condition = condition.name(), attempts, "attempt overran the deadline");
                    return Err(PollError::DeadlineExceeded {
                        elapsed: started.elapsed(),
                        attempts,
                    });
                }
            };

            match outcome {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(PollError::Fatal(err)),
                Attempt::Pending => {
                    trace!(condition = condition.name(), attempt = attempts, "not ready");
                }
                Attempt::Transient(err) => {
                    debug!(
                        condition = condition.name(),
                        attempt = attempts,
                        error = %err,
                        "transient fetch failure, retrying"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::DeadlineExceeded {
                    elapsed: now - started,
                    attempts,
                });
            }
            tokio::time::sleep_until((now + self.interval).min(deadline)).await;
        }
    }
}
