//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use mow_lib::{
    bus::MessageBus,
    mission::MissionService,
    nav::{GeoPoint, NavParams, NavigationService, WeatherAdvisor},
    safety::{SafetyGate, SafetyLimits},
    sim::{SimCommand, SimDrive, SimParams},
    state::RobotStateManager,
};

/// Start point of every simulated run.
pub const ORIGIN: GeoPoint = GeoPoint {
    lat: 51.4545,
    lon: -2.5879,
};

/// A complete core on a running simulator.
pub struct Core {
    pub state: RobotStateManager,
    pub sim: Arc<SimDrive>,
    pub gate: SafetyGate,
    pub nav: Arc<NavigationService>,
    pub missions: MissionService,
}

/// Simulator running at ten times real time.
pub fn fast_sim() -> SimParams {
    SimParams {
        step_period_s: 0.005,
        time_scale: 10.0,
        ..Default::default()
    }
}

/// Build a core with fast control on a fast simulator.
pub fn core(bus: Option<Arc<MessageBus>>) -> Core {
    core_with(fast_sim(), bus)
}

pub fn core_with(sim_params: SimParams, bus: Option<Arc<MessageBus>>) -> Core {
    build(sim_params, bus, None)
}

/// Build a fast core which consults a weather advisor before going autonomous.
pub fn core_with_weather(weather: Arc<dyn WeatherAdvisor>) -> Core {
    build(fast_sim(), None, Some(weather))
}

fn build(
    sim_params: SimParams,
    bus: Option<Arc<MessageBus>>,
    weather: Option<Arc<dyn WeatherAdvisor>>,
) -> Core {
    let state = RobotStateManager::new();

    let sim = Arc::new(SimDrive::new(state.clone(), sim_params));
    sim.place(ORIGIN, 0.0);
    sim.start().expect("simulator needs a runtime");

    let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), bus.clone());
    gate.motor_auth.authorize();

    let params = NavParams {
        control_period_s: 0.01,
        ..Default::default()
    };
    let mut nav = NavigationService::new(state.clone(), gate.clone(), sim.clone(), params);
    if let Some(weather) = weather {
        nav = nav.with_weather(weather);
    }
    let nav = Arc::new(nav);

    let mut missions = MissionService::new(nav.clone());
    if let Some(bus) = bus {
        missions = missions.with_bus(bus);
    }

    Core {
        state,
        sim,
        gate,
        nav,
        missions,
    }
}

/// Speed commands which would move the robot.
pub fn motion_commands(commands: &[SimCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, SimCommand::Speed { left, right } if *left != 0.0 || *right != 0.0))
        .count()
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
