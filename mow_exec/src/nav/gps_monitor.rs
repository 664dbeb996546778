//! # GPS degradation monitor
//!
//! Periodically checks the quality of the GPS fix while the mower is autonomous. A fix which is too
//! inaccurate or too old downgrades the mower to `Manual`. The age of a fix is measured from when
//! it was written, other state updates do not refresh it. The monitor never promotes the mode back
//! to `Autonomous`, that is left to the operator.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use super::params::GpsMonitorParams;
use crate::bus::MessageBus;
use crate::params::ParamsError;
use crate::state::{NavigationMode, RobotStateManager, StateError};
use crate::task::{guarded_tick, MonitorTask, TaskError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Topic on which downgrades are announced.
pub const GPS_DEGRADED_TOPIC: &str = "nav.gps_degraded";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct GpsDegradationMonitor {
    inner: Arc<Inner>,
    task: MonitorTask,
}

struct Inner {
    state: RobotStateManager,
    params: GpsMonitorParams,
    bus: Option<Arc<MessageBus>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GpsMonitorError {
    #[error("Cannot start the GPS monitor: {0}")]
    StartError(#[from] TaskError),

    #[error("Invalid monitor parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("Cannot downgrade the navigation mode: {0}")]
    State(#[from] StateError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GpsDegradationMonitor {
    pub fn new(state: RobotStateManager, params: GpsMonitorParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                params,
                bus: None,
            }),
            task: MonitorTask::new(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.bus = Some(bus);
        }
        self
    }

    /// Start the periodic check. Does nothing if already running.
    pub fn start(&self) -> Result<(), GpsMonitorError> {
        self.inner.params.validate()?;
        let interval = self.inner.params.check_interval()?;

        let inner = self.inner.clone();
        let started = self.task.spawn(|shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                guarded_tick("GPS monitor", || inner.tick());
            }
        })?;

        if started {
            info!(
                "GPS degradation monitor started (every {:.1} s)",
                interval.as_secs_f64()
            );
        }
        Ok(())
    }

    /// Stop the monitor and wait for its loop to exit.
    pub async fn stop(&self) {
        self.task.stop().await;
        info!("GPS degradation monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Run one check now.
    ///
    /// Returns the downgrade reason if the mode was changed.
    pub fn tick(&self) -> Result<Option<String>, GpsMonitorError> {
        self.inner.tick()
    }
}

impl Inner {
    fn tick(&self) -> Result<Option<String>, GpsMonitorError> {
        let reason = {
            let state_lock = self.state.get_state();
            let mut state = state_lock.write();

            if state.navigation_mode() != NavigationMode::Autonomous {
                return Ok(None);
            }

            let reason = match state.position.accuracy_m {
                Some(acc) if acc > self.params.max_accuracy_m => format!(
                    "GPS accuracy {:.2} m above {:.2} m",
                    acc, self.params.max_accuracy_m
                ),
                _ => {
                    let age_s = state
                        .fix_age()
                        .to_std()
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);

                    if age_s > self.params.max_fix_age_s {
                        format!(
                            "GPS fix {:.1} s old, limit {:.1} s",
                            age_s, self.params.max_fix_age_s
                        )
                    } else {
                        return Ok(None);
                    }
                }
            };

            state.set_navigation_mode(NavigationMode::Manual)?;
            reason
        };

        warn!("GPS degraded, switching to manual: {}", reason);

        if let Some(bus) = &self.bus {
            let mut payload = comms_if::bus::Payload::new();
            payload.insert("reason".into(), json!(reason));
            bus.publish_detached(GPS_DEGRADED_TOPIC, payload, false);
        }

        Ok(Some(reason))
    }
}
