//! Real-time pacing behavior, driven by a recording fake clock.

mod common;

use std::time::{Duration as StdDuration, Instant};

use hem_sim::engine::{NoClock, RtEngine, SimulationError};
use hem_sim::model::RunParameters;
use hem_sim::runner::{household_architecture, household_factories};
use hem_sim::telemetry::telemetry_log;
use hem_sim::time::{Duration, Time, TimeUnit};

fn composed_simulation(
    config: &hem_sim::config::ScenarioConfig,
    log: hem_sim::telemetry::TelemetryLog,
) -> hem_sim::engine::Simulation {
    let arch = household_architecture(config, false);
    let factories = household_factories(config, log);
    arch.construct_simulator(&factories, &RunParameters::default())
        .expect("composition should succeed")
}

#[test]
fn pacing_deadlines_scale_with_the_acceleration_factor() {
    let config = common::short_config();
    let simulation = composed_simulation(&config, telemetry_log());
    let clock = common::RecordingClock::default();
    let mut engine = RtEngine::new(simulation, 60.0, Box::new(clock.clone()))
        .expect("valid acceleration");
    engine
        .run(
            Instant::now(),
            Time::new(0.0, TimeUnit::Minutes),
            Duration::new(60.0, TimeUnit::Minutes),
        )
        .expect("run should succeed");

    let offsets = clock.recorded();
    assert!(!offsets.is_empty());
    for pair in offsets.windows(2) {
        assert!(pair[0] <= pair[1], "deadlines must be nondecreasing");
    }
    // 60 simulated minutes at 60x is one wall-clock minute; the final
    // synchronize waits out the full window.
    assert_eq!(*offsets.last().expect("offsets present"), StdDuration::from_secs(60));
}

#[test]
fn first_deadline_matches_the_first_scheduled_event() {
    let config = common::short_config();
    let simulation = composed_simulation(&config, telemetry_log());
    let clock = common::RecordingClock::default();
    let mut engine = RtEngine::new(simulation, 60.0, Box::new(clock.clone()))
        .expect("valid acceleration");
    engine
        .run(
            Instant::now(),
            Time::new(0.0, TimeUnit::Minutes),
            Duration::new(60.0, TimeUnit::Minutes),
        )
        .expect("run should succeed");

    // The continuous models sample every 5 simulated minutes, so nothing is
    // due before 5 min / 60 = 5 s of wall-clock time.
    let first = clock.recorded()[0];
    assert_eq!(first, StdDuration::from_secs(5));
}

#[test]
fn no_clock_runs_a_real_time_scenario_in_logical_time() {
    let config = common::short_config();
    let log = telemetry_log();
    let simulation = composed_simulation(&config, log.clone());
    let mut engine =
        RtEngine::new(simulation, 1.0, Box::new(NoClock)).expect("valid acceleration");
    let started = Instant::now();
    engine
        .run(
            Instant::now(),
            Time::new(0.0, TimeUnit::Minutes),
            Duration::new(60.0, TimeUnit::Minutes),
        )
        .expect("run should succeed");
    assert!(
        started.elapsed() < StdDuration::from_secs(10),
        "a no-op clock must not pace"
    );

    let rows = log.lock().expect("telemetry lock poisoned");
    assert!(!rows.is_empty(), "the meter still samples without pacing");
}

#[test]
fn zero_acceleration_is_rejected() {
    let config = common::short_config();
    let simulation = composed_simulation(&config, telemetry_log());
    let result = RtEngine::new(simulation, 0.0, Box::new(NoClock));
    assert!(matches!(
        result.err(),
        Some(SimulationError::InvalidAcceleration { .. })
    ));
}

#[test]
fn infinite_run_window_is_rejected() {
    let config = common::short_config();
    let simulation = composed_simulation(&config, telemetry_log());
    let mut engine =
        RtEngine::new(simulation, 1.0, Box::new(NoClock)).expect("valid acceleration");
    let result = engine.run(
        Instant::now(),
        Time::new(0.0, TimeUnit::Minutes),
        Duration::infinity(TimeUnit::Minutes),
    );
    assert!(matches!(
        result.err(),
        Some(SimulationError::InfiniteRtDuration)
    ));
}
