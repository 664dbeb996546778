//! # Simulated drive
//!
//! A differential drive simulator standing in for the motor hardware. Commanded wheel speeds are
//! integrated into the robot state's position, heading and velocity by a stepping task, so the
//! navigation loop can be exercised end to end.
//!
//! The simulator also records every command it receives and can be told to fail commands or to
//! drop the GPS fix, for testing.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use util::maths::wrap_deg_360;

use crate::nav::{DriveError, GeoPoint, MotorDriver};
use crate::params::{non_negative, period, positive, ParamsError};
use crate::state::RobotStateManager;
use crate::task::{guarded_tick, MonitorTask, TaskError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Distance between the wheels
    pub wheel_base_m: f64,

    /// Integration step
    pub step_period_s: f64,

    /// Simulated seconds per real second
    pub time_scale: f64,

    /// Horizontal accuracy reported with simulated fixes
    pub gps_accuracy_m: f64,
}

/// One command received by the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCommand {
    Speed { left: f64, right: f64 },
    Blade(bool),
}

pub struct SimDrive {
    inner: Arc<Inner>,
    task: MonitorTask,
}

struct Inner {
    state: RobotStateManager,
    params: SimParams,
    body: Mutex<Body>,
    commands: Mutex<Vec<SimCommand>>,
    fail_commands: Mutex<bool>,
    gps_available: Mutex<bool>,
}

/// True pose of the simulated robot, independent of what GPS reports.
#[derive(Debug, Clone, Copy)]
struct Body {
    position: Option<GeoPoint>,
    heading_deg: f64,
    left_mps: f64,
    right_mps: f64,
    blade_on: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SimParams {
    fn default() -> Self {
        Self {
            wheel_base_m: 0.4,
            step_period_s: 0.02,
            time_scale: 1.0,
            gps_accuracy_m: 0.3,
        }
    }
}

impl SimParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        positive("sim.wheel_base_m", self.wheel_base_m)?;
        self.step_period()?;
        positive("sim.time_scale", self.time_scale)?;
        non_negative("sim.gps_accuracy_m", self.gps_accuracy_m)?;
        Ok(())
    }

    pub fn step_period(&self) -> Result<Duration, ParamsError> {
        period("sim.step_period_s", self.step_period_s)
    }
}

impl SimDrive {
    pub fn new(state: RobotStateManager, params: SimParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                params,
                body: Mutex::new(Body {
                    position: None,
                    heading_deg: 0.0,
                    left_mps: 0.0,
                    right_mps: 0.0,
                    blade_on: false,
                }),
                commands: Mutex::new(Vec::new()),
                fail_commands: Mutex::new(false),
                gps_available: Mutex::new(true),
            }),
            task: MonitorTask::new(),
        }
    }

    /// Place the robot and publish the pose to the robot state.
    pub fn place(&self, position: GeoPoint, heading_deg: f64) {
        {
            let mut body = self.inner.body.lock();
            body.position = Some(position);
            body.heading_deg = wrap_deg_360(heading_deg);
        }
        self.inner.publish();
    }

    /// Start integrating the commanded speeds. Does nothing if already running.
    pub fn start(&self) -> Result<(), TaskError> {
        let inner = self.inner.clone();
        let period = self.inner.params.step_period()?;

        let started = self.task.spawn(|shutdown| async move {
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                let dt_s = last.elapsed().as_secs_f64() * inner.params.time_scale;
                last = Instant::now();
                guarded_tick("Simulator", || inner.step(dt_s));
            }
        })?;

        if started {
            info!("Drive simulator started");
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.task.stop().await;
        debug!("Drive simulator stopped");
    }

    /// Every command received, oldest first.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.inner.commands.lock().clone()
    }

    /// Make subsequent commands fail.
    pub fn set_fail_commands(&self, fail: bool) {
        *self.inner.fail_commands.lock() = fail;
    }

    /// Stop or resume reporting GPS fixes. Without GPS the position in the robot state is unknown.
    pub fn set_gps_available(&self, available: bool) {
        *self.inner.gps_available.lock() = available;
        self.inner.publish();
    }

    /// The simulated robot's true position.
    pub fn true_position(&self) -> Option<GeoPoint> {
        self.inner.body.lock().position
    }

    pub fn blade_on(&self) -> bool {
        self.inner.body.lock().blade_on
    }
}

impl Inner {
    /// Advance the simulation by `dt_s` seconds.
    fn step(&self, dt_s: f64) -> Result<(), std::convert::Infallible> {
        {
            let mut body = self.body.lock();
            let v = 0.5 * (body.left_mps + body.right_mps);
            let omega_deg = ((body.left_mps - body.right_mps) / self.params.wheel_base_m).to_degrees();

            // Integrate at the mid point heading
            let mid_heading = body.heading_deg + 0.5 * omega_deg * dt_s;
            if let Some(p) = body.position {
                let (sin, cos) = mid_heading.to_radians().sin_cos();
                body.position = Some(p.offset(v * dt_s * sin, v * dt_s * cos));
            }
            body.heading_deg = wrap_deg_360(body.heading_deg + omega_deg * dt_s);
        }

        self.publish();
        Ok(())
    }

    /// Write the simulated pose into the robot state.
    fn publish(&self) {
        let body = *self.body.lock();
        let gps = *self.gps_available.lock();

        let state_lock = self.state.get_state();
        let mut state = state_lock.write();

        let fixed = match (gps, body.position) {
            (true, Some(p)) => {
                state.position.latitude = Some(p.lat);
                state.position.longitude = Some(p.lon);
                state.position.accuracy_m = Some(self.params.gps_accuracy_m);
                true
            }
            _ => {
                state.position.latitude = None;
                state.position.longitude = None;
                state.position.accuracy_m = None;
                false
            }
        };

        state.heading_deg = body.heading_deg;
        state.velocity_mps = 0.5 * (body.left_mps + body.right_mps);
        state.angular_velocity_dps =
            ((body.left_mps - body.right_mps) / self.params.wheel_base_m).to_degrees();

        if fixed {
            state.mark_fix();
        } else {
            state.touch();
        }
    }
}

#[async_trait]
impl MotorDriver for SimDrive {
    async fn set_speed(&self, left_mps: f64, right_mps: f64) -> Result<(), DriveError> {
        self.inner.commands.lock().push(SimCommand::Speed {
            left: left_mps,
            right: right_mps,
        });

        if *self.inner.fail_commands.lock() {
            return Err(DriveError::CommandRejected("simulated fault".into()));
        }

        let mut body = self.inner.body.lock();
        body.left_mps = left_mps;
        body.right_mps = right_mps;
        Ok(())
    }

    async fn set_blade(&self, on: bool) -> Result<(), DriveError> {
        self.inner.commands.lock().push(SimCommand::Blade(on));

        if *self.inner.fail_commands.lock() {
            return Err(DriveError::CommandRejected("simulated fault".into()));
        }

        self.inner.body.lock().blade_on = on;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_straight_and_turn() -> Result<(), DriveError> {
        let state = RobotStateManager::new();
        let sim = SimDrive::new(state.clone(), SimParams::default());
        let origin = GeoPoint::new(52.0, 4.0);
        sim.place(origin, 90.0);

        block_on(sim.set_speed(0.5, 0.5))?;
        for _ in 0..10 {
            sim.inner.step(0.2).unwrap();
        }

        // 1 m due east
        let (e, n) = origin.enu_to(&sim.true_position().unwrap());
        assert!((e - 1.0).abs() < 1e-3);
        assert!(n.abs() < 1e-3);
        assert!((state.snapshot().velocity_mps - 0.5).abs() < 1e-12);

        // Spin on the spot, clockwise
        block_on(sim.set_speed(0.1, -0.1))?;
        sim.inner.step(1.0).unwrap();
        let heading = state.snapshot().heading_deg;
        assert!((heading - (90.0 + (0.2f64 / 0.4).to_degrees())).abs() < 1e-9);

        Ok(())
    }

    #[test]
    fn test_gps_dropout_and_faults() {
        let state = RobotStateManager::new();
        let sim = SimDrive::new(state.clone(), SimParams::default());
        sim.place(GeoPoint::new(52.0, 4.0), 0.0);
        assert!(state.snapshot().position.fix().is_some());

        sim.set_gps_available(false);
        assert!(state.snapshot().position.fix().is_none());

        sim.set_fail_commands(true);
        assert!(block_on(sim.set_blade(true)).is_err());
        assert!(!sim.blade_on());
        assert_eq!(sim.commands(), vec![SimCommand::Blade(true)]);
    }

    /// Drive a future which never suspends to completion.
    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[tokio::test]
    async fn test_unusable_step_period_refused() {
        let params = SimParams {
            step_period_s: f64::INFINITY,
            ..Default::default()
        };
        let sim = SimDrive::new(RobotStateManager::new(), params);

        assert!(matches!(
            sim.start(),
            Err(TaskError::InvalidPeriod(ParamsError::NotPositive(
                "sim.step_period_s",
                _
            )))
        ));
        assert!(!sim.task.is_running());
    }
}
