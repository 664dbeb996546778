//! # Watchdog
//!
//! Liveness timer which forces an emergency stop if heartbeats stop arriving.
//!
//! States: stopped -> running -> (timeout) -> stopped, re-armable with [`Watchdog::start`]. The loop
//! polls at 1% of the timeout, bounded to [1 ms, 10 ms], so a timeout is detected at most one poll
//! interval late. On timeout the emergency stop is triggered exactly once and the loop exits.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::{EstopHandler, SafetyTriggerManager};
use crate::task::{guarded_tick, MonitorTask, TaskError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const MIN_POLL: Duration = Duration::from_millis(1);
const MAX_POLL: Duration = Duration::from_millis(10);

/// Reason given to the emergency stop on timeout.
pub const WATCHDOG_TIMEOUT_REASON: &str = "watchdog_timeout";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Watchdog {
    inner: Arc<Inner>,
    task: MonitorTask,
}

struct Inner {
    timeout: Duration,
    last_heartbeat: Mutex<Instant>,
    estop: Arc<EstopHandler>,
    triggers: Option<Arc<SafetyTriggerManager>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Cannot start the watchdog: {0}")]
    StartError(#[from] TaskError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Watchdog {
    pub fn new(timeout: Duration, estop: Arc<EstopHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                timeout,
                last_heartbeat: Mutex::new(Instant::now()),
                estop,
                triggers: None,
            }),
            task: MonitorTask::new(),
        }
    }

    /// Also record a `watchdog_timeout` interlock when the watchdog fires.
    pub fn with_triggers(mut self, triggers: Arc<SafetyTriggerManager>) -> Self {
        // Only called during construction, before the inner state is shared
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.triggers = Some(triggers);
        }
        self
    }

    /// Interval at which the loop checks for a timeout.
    pub fn poll_interval(&self) -> Duration {
        (self.inner.timeout / 100).clamp(MIN_POLL, MAX_POLL)
    }

    /// Arm the watchdog. Counts as a heartbeat. Does nothing if already running.
    pub fn start(&self) -> Result<(), WatchdogError> {
        self.heartbeat();

        let inner = self.inner.clone();
        let poll = self.poll_interval();

        let started = self.task.spawn(|shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(poll) => {}
                }

                if guarded_tick("Watchdog", || inner.tick()) == Some(true) {
                    break;
                }
            }
        })?;

        if started {
            info!(
                "Watchdog started (timeout {} ms, poll {} ms)",
                self.inner.timeout.as_millis(),
                poll.as_millis()
            );
        }

        Ok(())
    }

    /// Record that the supervised component is alive.
    ///
    /// Does not restart a stopped watchdog.
    pub fn heartbeat(&self) {
        *self.inner.last_heartbeat.lock() = Instant::now();
    }

    /// Stop the watchdog and wait for the loop to exit, no trigger can fire afterwards.
    pub async fn stop(&self) {
        self.task.stop().await;
        info!("Watchdog stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

impl Inner {
    /// Returns true if the watchdog fired.
    fn tick(&self) -> Result<bool, std::convert::Infallible> {
        let elapsed = self.last_heartbeat.lock().elapsed();

        if elapsed <= self.timeout {
            return Ok(false);
        }

        self.estop.trigger_estop(WATCHDOG_TIMEOUT_REASON);

        if let Some(triggers) = &self.triggers {
            triggers.trigger_watchdog_timeout(elapsed);
        }

        warn!(
            "Watchdog timed out, no heartbeat for {} ms",
            elapsed.as_millis()
        );

        Ok(true)
    }
}
