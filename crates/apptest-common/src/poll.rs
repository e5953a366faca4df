//! Readiness polling
//!
//! Every synchronization point of a suite (cluster nodes, baseline apps,
//! installed app version and status) is a probe retried on a fixed interval
//! against a wall-clock budget.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::Error;

/// Interval and overall budget for a readiness wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between two probe invocations
    pub interval: Duration,
    /// Total time allowed for the probe to report ready
    pub timeout: Duration,
}

impl PollConfig {
    /// Create a poll config from a timeout and an interval
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, shorter budget
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// Poll `probe` until it reports ready, the timeout elapses or `cancel` fires.
///
/// The probe is invoked at t=0, t=interval, t=2*interval, ... and a new
/// invocation is only started while the elapsed time is below the timeout.
/// An in-flight invocation is bounded by the remaining budget.
///
/// - `Ok(true)` ends the wait successfully
/// - `Ok(false)` and ordinary errors are retried on the next tick
/// - errors for which [`Error::aborts_polling`] holds are returned immediately
///
/// Returns [`Error::Timeout`] once the budget is spent and [`Error::Cancelled`]
/// when the token is cancelled.
pub async fn poll_until_ready<F, Fut>(
    description: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut attempt = 0u32;

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(
                operation = %description,
                attempts = attempt,
                timeout_secs = config.timeout.as_secs(),
                "readiness wait timed out"
            );
            return Err(Error::timeout(description, config.timeout));
        }
        attempt += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(description)),
            res = tokio::time::timeout(deadline - now, probe()) => res,
        };

        match outcome {
            Ok(Ok(true)) => {
                debug!(
                    operation = %description,
                    attempts = attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "ready"
                );
                return Ok(());
            }
            Ok(Ok(false)) => trace!(operation = %description, attempt, "not ready yet"),
            Ok(Err(e)) if e.aborts_polling() => return Err(e),
            // Probe failures are expected while resources come up
            Ok(Err(e)) => {
                trace!(operation = %description, attempt, error = %e, "probe failed, retrying")
            }
            Err(_) => return Err(Error::timeout(description, config.timeout)),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(description)),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
