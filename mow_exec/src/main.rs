//! Main mower executable entry point.
//!
//! # Architecture
//!
//! The executable builds the mower core around the simulated drive:
//!
//!     - Session, logging and parameters
//!     - Message bus over the persistent archive, replaying the critical safety topics
//!     - Robot state, safety gate, navigation and mission services
//!     - Background loops: drive simulation, watchdog (fed by a heartbeat task), GPS monitor
//!
//! If a mission file is given it is run to a terminal status, otherwise the core idles until
//! Ctrl-C. Everything is then stopped in reverse order.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

// Internal
use comms_if::{bus::MessageBusEvent, tc::mission::MissionSpec};
use mow_lib::{
    bus::{ArchiveStore, MessageBus, PersistenceLayer},
    mission::MissionService,
    nav::{AlwaysProceed, Geofence, GpsDegradationMonitor, NavigationService},
    params::MowExecParams,
    safety::{SafetyGate, SafetyLimits},
    sim::SimDrive,
    state::RobotStateManager,
};
use util::{
    host,
    logger::{logger_init, parse_level},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Heartbeats sent per watchdog timeout.
const HEARTBEATS_PER_TIMEOUT: u64 = 4;

/// Polling period while waiting for the mission to end.
const MISSION_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "mow_exec", about = "Autonomous mower safety and navigation core")]
struct Args {
    /// Mission file (JSON) to run
    #[structopt(long, parse(from_os_str))]
    mission: Option<PathBuf>,

    /// Minimum log level, info or more verbose
    #[structopt(long, default_value = "debug")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;
    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("mow_exec", "sessions").wrap_err("Failed to create the session")?;

    let level = parse_level(&args.log_level).wrap_err("Invalid log level")?;
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("Mower Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let limits = SafetyLimits::load("safety_limits.toml")
        .wrap_err("Could not load the safety limits")?;
    let params =
        MowExecParams::load("mow_exec.toml").wrap_err("Could not load the exec params")?;

    info!("Parameters loaded");

    // ---- MESSAGE BUS ----

    // The archive lives outside the session so critical events survive restarts
    let archive_root = host::get_mower_sw_root()
        .wrap_err("MOWER_SW_ROOT is not set")?
        .join("bus_archive");
    let store = Arc::new(
        ArchiveStore::new(&archive_root, params.bus.max_records_per_topic)
            .wrap_err("Could not open the bus archive")?,
    );
    for topic in &params.bus.replay_topics {
        let dropped = store
            .compact(topic)
            .wrap_err_with(|| format!("Could not compact the {} archive", topic))?;
        if dropped > 0 {
            info!("Dropped {} old {} records", dropped, topic);
        }
    }

    let store: Arc<dyn PersistenceLayer> = store;
    let bus = Arc::new(MessageBus::new("mow_exec", Some(store)));

    for topic in &params.bus.replay_topics {
        bus.subscribe_fn(topic, |event: MessageBusEvent| async move {
            let payload = serde_json::Value::Object(event.payload.clone());
            info!("[{}] {} {}", event.topic(), event.timestamp_us, payload);
        });
        let count = bus
            .replay_persistent(topic)
            .await
            .wrap_err_with(|| format!("Could not replay {}", topic))?;
        info!("Replayed {} {} events from previous runs", count, topic);
    }

    // ---- CORE ----

    let state = RobotStateManager::global().clone();
    let heartbeat_period =
        Duration::from_millis((limits.watchdog_timeout_ms / HEARTBEATS_PER_TIMEOUT).max(1));

    let sim = Arc::new(SimDrive::new(state.clone(), params.sim.clone()));
    sim.place(params.home, 0.0);
    sim.start().wrap_err("Could not start the drive simulator")?;

    let gate = SafetyGate::new(state.clone(), limits, Some(bus.clone()));

    let mut nav = NavigationService::new(
        state.clone(),
        gate.clone(),
        sim.clone(),
        params.nav.clone(),
    )
    .with_weather(Arc::new(AlwaysProceed));
    if !params.geofence.is_empty() {
        nav = nav.with_geofence(
            Geofence::new(params.geofence.clone()).wrap_err("Invalid geofence")?,
        );
    }
    nav.set_home(params.home);
    let nav = Arc::new(nav);

    let missions = MissionService::new(nav.clone()).with_bus(bus.clone());

    // ---- MONITORS ----

    let watchdog = Arc::new(gate.watchdog());
    watchdog.start().wrap_err("Could not start the watchdog")?;

    let heartbeat = {
        let watchdog = watchdog.clone();
        tokio::spawn(async move {
            loop {
                watchdog.heartbeat();
                tokio::time::sleep(heartbeat_period).await;
            }
        })
    };

    let gps_monitor = GpsDegradationMonitor::new(state.clone(), params.gps_monitor.clone())
        .with_bus(bus.clone());
    gps_monitor
        .start()
        .wrap_err("Could not start the GPS monitor")?;

    gate.motor_auth.authorize();
    info!("Initialisation complete, motors authorized\n");

    // ---- RUN ----

    match args.mission {
        Some(path) => {
            info!("Loading mission from {:?}", path);
            let json = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("Could not read {:?}", path))?;
            let request: MissionSpec =
                serde_json::from_str(&json).wrap_err("Invalid mission file")?;

            let mission = missions
                .create_mission(&request.name, request.waypoints)
                .wrap_err("Mission rejected")?;
            missions
                .start_mission(&mission.id)
                .await
                .wrap_err("Could not start the mission")?;

            let status = tokio::select! {
                status = missions.wait_for_terminal(&mission.id, MISSION_POLL) => status?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, aborting the mission");
                    missions.abort_mission(&mission.id).await?
                }
            };

            match status.error {
                Some(ref e) => error!("Mission ended {}: {}", status.status, e),
                None => info!(
                    "Mission ended {} ({:.0}% complete)",
                    status.status, status.completion_percentage
                ),
            }
        }
        None => {
            info!("No mission given, idling until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .wrap_err("Could not wait for Ctrl-C")?;
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    heartbeat.abort();
    watchdog.stop().await;
    gps_monitor.stop().await;

    if let Err(e) = nav.stop().await {
        error!("Could not stop the drive: {}", e);
    }
    gate.motor_auth.revoke();
    sim.stop().await;

    info!("End of execution");
    Ok(())
}
