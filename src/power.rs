//! # Low-Power Scheduler
//!
//! After every cycle the node arms a wake timer and suspends. On a host the
//! suspend is an async wait that ends either when the timer fires or when a
//! shutdown signal (Ctrl+C / SIGTERM) arrives, whichever comes first.
//!
//! ## Signal Handling:
//! [`install_signal_handlers`] spawns one task that flips a process-wide flag.
//! A capture in progress is never interrupted; the flag is only consulted
//! while suspended and between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Set once a shutdown signal has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// How often a suspended node re-checks the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Why [`PowerScheduler::suspend_now`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The scheduled interval elapsed
    Timer,
    /// A shutdown signal arrived; the node should stop cycling
    Shutdown,
}

pub struct PowerScheduler {
    wake_after: Option<Duration>,
    shutdown: &'static AtomicBool,
}

impl PowerScheduler {
    pub fn new() -> Self {
        Self::with_shutdown_flag(&SHUTDOWN_SIGNAL)
    }

    /// Scheduler watching a caller-owned shutdown flag.
    pub fn with_shutdown_flag(shutdown: &'static AtomicBool) -> Self {
        Self {
            wake_after: None,
            shutdown,
        }
    }

    /// Arm the wake timer for the next suspend.
    pub fn schedule_wake_after(&mut self, interval: Duration) {
        self.wake_after = Some(interval);
    }

    /// Suspend until the armed timer fires or shutdown is requested.
    ///
    /// The timer is consumed; suspending again without re-arming wakes
    /// immediately.
    pub async fn suspend_now(&mut self) -> WakeReason {
        let interval = self.wake_after.take().unwrap_or(Duration::ZERO);
        if self.shutdown.load(Ordering::SeqCst) {
            return WakeReason::Shutdown;
        }
        info!(sleep_secs = interval.as_secs_f64(), "Entering low-power wait");

        tokio::select! {
            _ = tokio::time::sleep(interval) => WakeReason::Timer,
            _ = wait_for_flag(self.shutdown) => WakeReason::Shutdown,
        }
    }
}

impl Default for PowerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on the first one.
pub fn install_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Received SIGINT"),
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
                },
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}
