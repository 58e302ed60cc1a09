//! Backoff retry for integration calls
//!
//! Every outbound request to the indexer aggregator or the torrent daemon
//! goes through [`with_backoff`], which retries transient failures and
//! gives up immediately on permanent ones. Whether a failure is transient
//! is decided by [`Error::is_transient`], gamearr's own classification:
//! network-level connect/timeout errors and upstream "busy" responses are
//! worth another attempt; rejected credentials, validation failures, and
//! daemon rejections are not.
//!
//! The delay before attempt `n` is `initial_delay * multiplier^n`, capped
//! at `max_delay`. When jitter is enabled the delay is stretched by a
//! random factor in `[1.0, 2.0)` so a fleet of instances sharing one
//! indexer does not retry in lockstep.

use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry behavior for outbound requests
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 1 second)
    pub initial_delay: Duration,
    /// Ceiling on the computed delay (default: 30 seconds)
    pub max_delay: Duration,
    /// Growth factor per failed attempt (default: 2.0)
    pub backoff_multiplier: f64,
    /// Stretch each delay by a random factor in [1.0, 2.0) (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Error {
    /// Whether this failure is worth retrying
    ///
    /// Transient: the collaborator was unreachable or overloaded. Permanent:
    /// our request (or our configuration) is wrong, so repeating it would
    /// only repeat the failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Upstream failures are classified by what the service reported:
            // overload and gateway trouble clear up, rejections do not
            Error::Integration { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("timeout")
                    || m.contains("busy")
                    || m.contains("temporar")
                    || m.contains("connection")
                    || m.contains("502")
                    || m.contains("503")
                    || m.contains("429")
            }
            // Missing configuration needs user action, not retries
            Error::NotConfigured { .. } => false,
            Error::NotFound(_) | Error::Validation(_) | Error::Conflict(_) => false,
            // A traversal attempt must never be retried
            Error::PathTraversal { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Serialization(_) => false,
            Error::Shared(inner) => inner.is_transient(),
            Error::Other(_) => false,
        }
    }
}

/// Delay before retrying after `failures` failed attempts
fn backoff_delay(policy: &RetryConfig, failures: u32) -> Duration {
    // powi keeps the growth exact for whole multipliers; the exponent is
    // clamped so a pathological max_attempts cannot overflow to infinity
    let growth = policy.backoff_multiplier.powi(failures.min(16) as i32);
    let uncapped = policy.initial_delay.as_secs_f64() * growth;
    let capped = uncapped.min(policy.max_delay.as_secs_f64());

    let stretched = if policy.jitter {
        capped * (1.0 + rand::thread_rng().gen_range(0.0..1.0))
    } else {
        capped
    };
    Duration::from_secs_f64(stretched)
}

/// Run an integration call, retrying transient failures with backoff
///
/// `operation` names the guarded call in log output ("prowlarr search",
/// "qbittorrent add"). Returns the first success, or the error that ended
/// the attempts: a permanent failure immediately, a transient one once
/// `max_attempts` retries are spent.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut attempt_call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;

    loop {
        match attempt_call().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!(operation, retries = failures, "Upstream call recovered");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_transient() {
                    tracing::error!(operation, error = %err, "Upstream call failed permanently");
                    return Err(err);
                }
                if failures >= policy.max_attempts {
                    tracing::error!(
                        operation,
                        error = %err,
                        attempts = failures + 1,
                        "Upstream call still failing, out of retries"
                    );
                    return Err(err);
                }

                let pause = backoff_delay(policy, failures);
                failures += 1;
                tracing::warn!(
                    operation,
                    error = %err,
                    attempt = failures,
                    pause_ms = pause.as_millis() as u64,
                    "Transient upstream failure, backing off"
                );
                tokio::time::sleep(pause).await;
            }
        }
    }
}
