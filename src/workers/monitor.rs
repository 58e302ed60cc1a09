//! Download monitor: periodic daemon-state reconciliation
//!
//! Every 30 seconds the monitor delegates to
//! [`DownloadService::sync_download_status`]. Because the daemon being
//! down is common and uninteresting, connection failures follow a silent
//! reconnection discipline: one WARN on the transition to disconnected, a
//! DEBUG reminder at most every five minutes while down, and one INFO when
//! the connection comes back. Everything else is a real error and logs at
//! ERROR.

use crate::download::DownloadService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time between reconciliation passes
const SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum gap between reminder logs while disconnected
const REMINDER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What a connection failure should emit, given the current state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogDirective {
    /// First failure after being connected: one WARN
    WarnFirst,
    /// Still down and the reminder interval elapsed: one DEBUG
    DebugReminder,
    /// Still down, reminder not yet due: say nothing
    Suppress,
}

/// Connection-state bookkeeping for the silent reconnection discipline
struct ConnectionState {
    connected: bool,
    last_error_log: Option<Instant>,
    consecutive_failures: u32,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            connected: true,
            last_error_log: None,
            consecutive_failures: 0,
        }
    }

    /// Register a connection failure at `now`; returns what to log
    fn on_connection_error(&mut self, now: Instant) -> LogDirective {
        self.consecutive_failures += 1;

        if self.connected {
            self.connected = false;
            self.last_error_log = Some(now);
            return LogDirective::WarnFirst;
        }

        match self.last_error_log {
            Some(last) if now.duration_since(last) >= REMINDER_INTERVAL => {
                self.last_error_log = Some(now);
                LogDirective::DebugReminder
            }
            Some(_) => LogDirective::Suppress,
            None => {
                self.last_error_log = Some(now);
                LogDirective::DebugReminder
            }
        }
    }

    /// Register a successful sync; returns true when this ends an outage
    fn on_success(&mut self) -> bool {
        let was_disconnected = !self.connected;
        self.connected = true;
        self.consecutive_failures = 0;
        self.last_error_log = None;
        was_disconnected
    }
}

/// Periodic reconciler of daemon state into releases and games
pub struct DownloadMonitor {
    download: Arc<DownloadService>,
    state: Mutex<ConnectionState>,
    is_running: AtomicBool,
    shutdown: CancellationToken,
}

impl DownloadMonitor {
    /// Create the worker over the download service
    pub fn new(download: Arc<DownloadService>, shutdown: CancellationToken) -> Self {
        Self {
            download,
            state: Mutex::new(ConnectionState::new()),
            is_running: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self: Arc<Self>) {
        info!("Download monitor started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(SYNC_INTERVAL) => {}
            }
            self.tick().await;
        }

        info!("Download monitor stopped");
    }

    /// One reconciliation pass; concurrent invocations collapse to one
    pub async fn tick(&self) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Monitor tick already running, skipping");
            return;
        }

        match self.download.sync_download_status().await {
            Ok(summary) => {
                let restored = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.on_success()
                };
                if restored {
                    info!("Connection to download client restored");
                }
                if summary.completed > 0 || summary.failed > 0 {
                    info!(
                        examined = summary.examined,
                        completed = summary.completed,
                        failed = summary.failed,
                        "Download status sync finished"
                    );
                }
            }
            Err(e) if e.is_connection_error() => {
                let directive = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.on_connection_error(Instant::now())
                };
                match directive {
                    LogDirective::WarnFirst => {
                        warn!(error = %e, "Download client unreachable, suppressing repeats");
                    }
                    LogDirective::DebugReminder => {
                        debug!(error = %e, "Download client still unreachable");
                    }
                    LogDirective::Suppress => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Download status sync failed");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// The daemon is down for twelve 30-second ticks, then comes back:
    /// one WARN on the first failure, one DEBUG reminder once five minutes
    /// have passed, nothing else, then one restore on recovery.
    #[test]
    fn outage_emits_one_warn_and_spaced_reminders() {
        let mut state = ConnectionState::new();
        let start = Instant::now();
        let tick = Duration::from_secs(30);

        let mut directives = Vec::new();
        for i in 0..12u32 {
            directives.push(state.on_connection_error(start + tick * i));
        }

        assert_eq!(directives[0], LogDirective::WarnFirst);
        let warns = directives
            .iter()
            .filter(|d| **d == LogDirective::WarnFirst)
            .count();
        assert_eq!(warns, 1, "exactly one WARN per outage");

        let reminders: Vec<usize> = directives
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == LogDirective::DebugReminder)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(
            reminders,
            vec![10],
            "one reminder once five minutes have elapsed (tick 11 of 12)"
        );

        assert!(state.on_success(), "recovery ends the outage");
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn success_while_connected_is_not_a_restore() {
        let mut state = ConnectionState::new();
        assert!(!state.on_success());
        assert!(!state.on_success());
    }

    #[test]
    fn each_new_outage_warns_again() {
        let mut state = ConnectionState::new();
        let now = Instant::now();

        assert_eq!(state.on_connection_error(now), LogDirective::WarnFirst);
        assert!(state.on_success());
        assert_eq!(
            state.on_connection_error(now + Duration::from_secs(60)),
            LogDirective::WarnFirst,
            "a fresh outage after recovery warns again"
        );
    }

    #[test]
    fn failures_inside_reminder_window_are_suppressed() {
        let mut state = ConnectionState::new();
        let start = Instant::now();

        state.on_connection_error(start);
        assert_eq!(
            state.on_connection_error(start + Duration::from_secs(30)),
            LogDirective::Suppress
        );
        assert_eq!(
            state.on_connection_error(start + Duration::from_secs(299)),
            LogDirective::Suppress
        );
        assert_eq!(
            state.on_connection_error(start + Duration::from_secs(300)),
            LogDirective::DebugReminder
        );
        // The reminder clock resets after each emitted reminder
        assert_eq!(
            state.on_connection_error(start + Duration::from_secs(330)),
            LogDirective::Suppress
        );
    }
}
