//! Safety gate behaviour across the motor gate, emergency stop, watchdog and triggers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mow_lib::{
    safety::{EstopHandler, MotorAuthorization, SafetyGate, SafetyLimits, WatchdogError},
    state::{InterlockType, NavigationMode, RobotStateManager},
};

#[test]
fn test_fresh_gate_is_disabled() {
    for _ in 0..100 {
        assert!(!MotorAuthorization::new().is_enabled());
    }
}

#[test]
fn test_estop_latency() {
    for reason in ["operator", "", "battery_critical", "a much longer reason string"] {
        let auth = Arc::new(MotorAuthorization::new());
        auth.authorize();
        let estop = EstopHandler::new(auth.clone());

        let start = Instant::now();
        estop.trigger_estop(reason);
        let disabled = !auth.is_enabled();

        assert!(disabled);
        assert!(start.elapsed() <= Duration::from_millis(100));
        assert_eq!(estop.last_reason().as_deref(), Some(reason));
    }
}

#[test]
fn test_interlock_gating_regardless_of_authorization() {
    let gate = SafetyGate::new(RobotStateManager::new(), SafetyLimits::default(), None);

    for authorized in [false, true] {
        if authorized {
            gate.motor_auth.authorize();
        } else {
            gate.motor_auth.revoke();
        }

        gate.validator.set_interlock("tilt_detected", true);
        gate.validator.set_interlock("obstacle_detected", true);
        assert!(gate.validator.assert_safe_to_move().is_err());

        gate.validator.set_interlock("tilt_detected", false);
        assert!(gate.validator.assert_safe_to_move().is_err());

        gate.validator.set_interlock("obstacle_detected", false);
        assert!(gate.validator.assert_safe_to_move().is_ok());
    }
}

#[test]
fn test_estop_latches_until_reset() {
    let state = RobotStateManager::new();
    let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), None);
    gate.motor_auth.authorize();
    state
        .set_navigation_mode(NavigationMode::Autonomous)
        .unwrap();

    gate.estop.trigger_estop("operator");
    assert_eq!(state.navigation_mode(), NavigationMode::EmergencyStop);
    assert!(state
        .set_navigation_mode(NavigationMode::Autonomous)
        .is_err());
    assert!(gate.validator.assert_safe_to_move().is_err());

    gate.estop.reset().unwrap();
    assert_eq!(state.navigation_mode(), NavigationMode::Idle);
    assert!(gate.validator.assert_safe_to_move().is_ok());

    // Reset never re-authorizes
    assert!(!gate.motor_auth.is_enabled());
}

#[test]
fn test_triggers_visible_within_latency() {
    let state = RobotStateManager::new();
    let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), None);

    let start = Instant::now();
    assert!(gate.triggers.trigger_tilt(40.0, 0.0, 30.0));
    assert!(state.snapshot().interlock(InterlockType::TiltDetected).is_some());
    assert!(start.elapsed() <= Duration::from_millis(200));

    let start = Instant::now();
    assert!(gate.triggers.trigger_obstacle(0.1, 0.3));
    assert!(state
        .snapshot()
        .interlock(InterlockType::ObstacleDetected)
        .is_some());
    assert!(start.elapsed() <= Duration::from_millis(200));
}

#[test]
fn test_critical_battery_stops() {
    let state = RobotStateManager::new();
    let gate = SafetyGate::new(state.clone(), SafetyLimits::default(), None);
    gate.motor_auth.authorize();

    assert!(gate.triggers.evaluate_battery(21.0));
    assert!(gate.motor_auth.is_enabled());

    assert!(gate.triggers.evaluate_battery(19.0));
    assert!(!gate.motor_auth.is_enabled());
    assert_eq!(state.navigation_mode(), NavigationMode::EmergencyStop);
}

#[tokio::test]
async fn test_watchdog_fires_after_silence() -> Result<(), WatchdogError> {
    let timeout = Duration::from_millis(50);
    let auth = Arc::new(MotorAuthorization::new());
    auth.authorize();
    let estop = Arc::new(EstopHandler::new(auth.clone()));

    let wd = mow_lib::safety::Watchdog::new(timeout, estop.clone());
    let start = Instant::now();
    wd.start()?;

    while auth.is_enabled() && start.elapsed() < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let fired_after = start.elapsed();

    assert!(!auth.is_enabled());
    assert!(fired_after >= timeout);
    // One poll interval plus scheduling slack
    assert!(fired_after <= timeout + wd.poll_interval() + Duration::from_millis(40));
    assert_eq!(estop.last_reason().as_deref(), Some("watchdog_timeout"));

    // The loop exits after firing, heartbeats do not restart it
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!wd.is_running());
    wd.heartbeat();
    assert!(!wd.is_running());
    Ok(())
}

#[tokio::test]
async fn test_watchdog_fed_stays_enabled() -> Result<(), WatchdogError> {
    let auth = Arc::new(MotorAuthorization::new());
    auth.authorize();
    let estop = Arc::new(EstopHandler::new(auth.clone()));

    let wd = mow_lib::safety::Watchdog::new(Duration::from_millis(100), estop);
    wd.start()?;

    for _ in 0..30 {
        wd.heartbeat();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(auth.is_enabled());

    wd.stop().await;
    assert!(!wd.is_running());

    // Stopped means no trigger even after a long silence
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(auth.is_enabled());
    Ok(())
}
